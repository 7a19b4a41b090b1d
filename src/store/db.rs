//! SQLite schema and row ↔ struct conversions.
//!
//! One `rusqlite` connection per process backs the entry/link/embedding
//! tables, an FTS5 shadow table kept in lock-step inside the same
//! transaction as every mutation, and the `sync_lock` coordinator table.
//! All mutations run inside a single [`rusqlite::Transaction`] — on any
//! error nothing is applied.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::entry::Entry;
use super::ids::{EntryId, EntryType, LinkId, LinkType, Scope, Status};
use super::link::Link;
use crate::error::KbaseError;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS entries (
    id               TEXT PRIMARY KEY,
    entry_type       TEXT NOT NULL,
    title            TEXT NOT NULL,
    content          TEXT NOT NULL,
    tags             TEXT NOT NULL,
    declaration      TEXT,
    deprecation_reason TEXT,
    flag_reason      TEXT,
    scope            TEXT NOT NULL,
    project          TEXT,
    parent_page_id   TEXT,
    source           TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    status           TEXT NOT NULL,
    inaccuracy       REAL NOT NULL,
    version          INTEGER NOT NULL,
    synced_version   INTEGER,
    synced_at        TEXT,
    access_count     INTEGER NOT NULL,
    last_accessed_at TEXT,
    updated_at       TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    id UNINDEXED, title, content, tags, tokenize = 'porter unicode61'
);

CREATE TABLE IF NOT EXISTS links (
    id          TEXT PRIMARY KEY,
    source_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    link_type   TEXT NOT NULL,
    description TEXT,
    source      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(source_id, target_id, link_type)
);
CREATE INDEX IF NOT EXISTS links_by_source ON links(source_id);
CREATE INDEX IF NOT EXISTS links_by_target ON links(target_id);

CREATE TABLE IF NOT EXISTS embeddings (
    entry_id TEXT PRIMARY KEY,
    vector   BLOB NOT NULL,
    dim      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_lock (
    name        TEXT PRIMARY KEY,
    holder_pid  INTEGER NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);
";

/// Open (creating if necessary) the SQLite index at `path` and apply the
/// schema. Idempotent: safe to call on every process start.
pub fn open(path: &Path) -> Result<Connection, KbaseError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open an in-memory index, used by tests and by `kbase-cli --ephemeral`.
pub fn open_in_memory() -> Result<Connection, KbaseError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub(super) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let tags_json: String = row.get("tags")?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let id: String = row.get("id")?;
    let entry_type: String = row.get("entry_type")?;
    let scope: String = row.get("scope")?;
    let status: String = row.get("status")?;
    let parent_page_id: Option<String> = row.get("parent_page_id")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let synced_at: Option<String> = row.get("synced_at")?;
    let last_accessed_at: Option<String> = row.get("last_accessed_at")?;

    Ok(Entry {
        id: parse_uuid_col(&id, "entries.id")?,
        entry_type: parse_entry_type(&entry_type)?,
        title: row.get("title")?,
        content: row.get("content")?,
        tags,
        declaration: row.get("declaration")?,
        deprecation_reason: row.get("deprecation_reason")?,
        flag_reason: row.get("flag_reason")?,
        scope: parse_scope(&scope)?,
        project: row.get("project")?,
        parent_page_id: parent_page_id.map(|s| parse_uuid_col(&s, "entries.parent_page_id")).transpose()?,
        source: row.get("source")?,
        created_at: parse_timestamp(&created_at)?,
        status: parse_status(&status)?,
        inaccuracy: row.get("inaccuracy")?,
        version: row.get::<_, i64>("version")? as u64,
        synced_version: row.get::<_, Option<i64>>("synced_version")?.map(|v| v as u64),
        synced_at: synced_at.map(|s| parse_timestamp(&s)).transpose()?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        last_accessed_at: last_accessed_at.map(|s| parse_timestamp(&s)).transpose()?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(super) fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    let id: String = row.get("id")?;
    let source_id: String = row.get("source_id")?;
    let target_id: String = row.get("target_id")?;
    let link_type: String = row.get("link_type")?;
    let created_at: String = row.get("created_at")?;
    Ok(Link {
        id: parse_uuid_col(&id, "links.id")?,
        source_id: parse_uuid_col(&source_id, "links.source_id")?,
        target_id: parse_uuid_col(&target_id, "links.target_id")?,
        link_type: LinkType::from_str(&link_type)
            .map_err(|_| col_error("links.link_type", &link_type))?,
        description: row.get("description")?,
        source: row.get("source")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_uuid_col<T>(s: &str, col: &'static str) -> rusqlite::Result<T>
where
    T: FromStr,
{
    s.parse().map_err(|_| col_error(col, s))
}

fn parse_entry_type(s: &str) -> rusqlite::Result<EntryType> {
    match s {
        "convention" => Ok(EntryType::Convention),
        "decision" => Ok(EntryType::Decision),
        "pattern" => Ok(EntryType::Pattern),
        "pitfall" => Ok(EntryType::Pitfall),
        "fact" => Ok(EntryType::Fact),
        "debug_note" => Ok(EntryType::DebugNote),
        "process" => Ok(EntryType::Process),
        "wiki" => Ok(EntryType::Wiki),
        _ => Err(col_error("entries.entry_type", s)),
    }
}

fn parse_scope(s: &str) -> rusqlite::Result<Scope> {
    match s {
        "company" => Ok(Scope::Company),
        "project" => Ok(Scope::Project),
        "repo" => Ok(Scope::Repo),
        _ => Err(col_error("entries.scope", s)),
    }
}

fn parse_status(s: &str) -> rusqlite::Result<Status> {
    match s {
        "active" => Ok(Status::Active),
        "deprecated" => Ok(Status::Deprecated),
        _ => Err(col_error("entries.status", s)),
    }
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| col_error("timestamp", s))
}

fn col_error(col: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, format!("{col}={value:?}"), rusqlite::types::Type::Text)
}

pub(super) fn tags_json(tags: &BTreeSet<String>) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Bind every column of `e` as named parameters and upsert it in one
/// statement. Used by both `insert` and `update` (the latter after applying
/// field changes in memory) so the write path has a single source of truth
/// for the entries table's column list.
pub(super) fn upsert_entry(conn: &Connection, e: &Entry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO entries (
            id, entry_type, title, content, tags, declaration, deprecation_reason,
            flag_reason, scope, project, parent_page_id, source, created_at, status,
            inaccuracy, version, synced_version, synced_at, access_count,
            last_accessed_at, updated_at
        ) VALUES (
            :id, :entry_type, :title, :content, :tags, :declaration, :deprecation_reason,
            :flag_reason, :scope, :project, :parent_page_id, :source, :created_at, :status,
            :inaccuracy, :version, :synced_version, :synced_at, :access_count,
            :last_accessed_at, :updated_at
        )
        ON CONFLICT(id) DO UPDATE SET
            entry_type = excluded.entry_type, title = excluded.title,
            content = excluded.content, tags = excluded.tags,
            declaration = excluded.declaration, deprecation_reason = excluded.deprecation_reason,
            flag_reason = excluded.flag_reason, scope = excluded.scope,
            project = excluded.project, parent_page_id = excluded.parent_page_id,
            source = excluded.source, status = excluded.status,
            inaccuracy = excluded.inaccuracy, version = excluded.version,
            synced_version = excluded.synced_version, synced_at = excluded.synced_at,
            access_count = excluded.access_count, last_accessed_at = excluded.last_accessed_at,
            updated_at = excluded.updated_at",
        params![
            e.id.to_string(),
            e.entry_type.as_str(),
            e.title,
            e.content,
            tags_json(&e.tags),
            e.declaration,
            e.deprecation_reason,
            e.flag_reason,
            e.scope.to_string(),
            e.project,
            e.parent_page_id.map(|i| i.to_string()),
            e.source,
            e.created_at.to_rfc3339(),
            e.status.to_string(),
            e.inaccuracy,
            i64::try_from(e.version).unwrap_or(i64::MAX),
            e.synced_version.map(|v| i64::try_from(v).unwrap_or(i64::MAX)),
            e.synced_at.map(|t| t.to_rfc3339()),
            i64::try_from(e.access_count).unwrap_or(i64::MAX),
            e.last_accessed_at.map(|t| t.to_rfc3339()),
            e.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Re-index an entry's `{title, content, tags}` into the FTS5 shadow table,
/// replacing any prior row for the same id. Called in the same transaction
/// as every entry mutation so I4 holds after commit.
pub(super) fn reindex_fts(conn: &Connection, e: &Entry) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM entries_fts WHERE id = ?1", params![e.id.to_string()])?;
    let tags_text = e.tags.iter().cloned().collect::<Vec<_>>().join(" ");
    conn.execute(
        "INSERT INTO entries_fts (id, title, content, tags) VALUES (?1, ?2, ?3, ?4)",
        params![e.id.to_string(), e.title, e.content, tags_text],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_applies_schema() {
        let conn = open_in_memory().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM sqlite_master WHERE type='table' AND name='entries'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
    }
}
