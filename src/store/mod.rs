//! The local index: persistent typed storage for entries and links.
//!
//! [`Store`] wraps a single `rusqlite` connection and exposes the typed
//! entry/link operations. Every mutation runs inside one transaction that
//! updates the `entries`/`links` tables and the FTS5 shadow table together,
//! so the full-text index stays in sync with `{title, content, tags}` after
//! every commit.
//!
//! Propagation is deliberately NOT performed here — `Store::update` reports
//! the before/after pair so [`crate::graph`] can decide whether a
//! content-relevant field changed and run the propagator. Keeping that
//! decision out of the Store keeps it a plain typed index, separate from the
//! engine that interprets what a change means.

pub mod db;
pub mod entry;
pub mod ids;
pub mod link;
pub mod sync_lock;

pub use entry::{Entry, EntryUpdate, NewEntry, INACCURACY_CAP, INACCURACY_THRESHOLD};
pub use ids::{EntryId, EntryType, IdParseError, LinkId, LinkType, Scope, Status};
pub use link::{Link, NewLink};

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::KbaseError;

/// The typed local index: entries, links, and their FTS shadow table.
pub struct Store {
    conn: Connection,
}

/// The result of [`Store::update`]: the entry's state immediately before and
/// immediately after the mutation. Callers (the Graph propagator, the Mirror)
/// diff these themselves rather than the Store deciding what's "content
/// relevant" on their behalf.
#[derive(Clone, Debug)]
pub struct Updated {
    pub before: Entry,
    pub after: Entry,
}

/// Fields whose change increments `version`. `access_count` and
/// `last_accessed_at` are deliberately excluded — access is local-only.
fn content_relevant_change(before: &Entry, after: &Entry) -> bool {
    before.title != after.title
        || before.content != after.content
        || before.tags != after.tags
        || before.entry_type != after.entry_type
        || before.scope != after.scope
        || before.project != after.project
        || before.declaration != after.declaration
        || before.parent_page_id != after.parent_page_id
        || before.status != after.status
        || before.deprecation_reason != after.deprecation_reason
        || before.flag_reason != after.flag_reason
        || (before.inaccuracy - after.inaccuracy).abs() > f64::EPSILON
}

impl Store {
    /// Open (creating if necessary) the SQLite index at `path`.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, KbaseError> {
        Ok(Self { conn: db::open(path)? })
    }

    /// Open an ephemeral in-memory index. Used by tests and `--ephemeral`.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, KbaseError> {
        Ok(Self { conn: db::open_in_memory()? })
    }

    /// Insert a new entry.
    ///
    /// Assigns a fresh UUID, `version = 1`, `inaccuracy = 0`, `status =
    /// active`, `synced_version = None`.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] if `title` is empty, or
    /// [`KbaseError::Store`] on a database error.
    pub fn insert(&self, new: NewEntry) -> Result<Entry, KbaseError> {
        if new.title.trim().is_empty() {
            return Err(KbaseError::ValidationFailed {
                field: "title".into(),
                reason: "must not be empty".into(),
            });
        }
        let now = Utc::now();
        let entry = Entry {
            id: EntryId::new_random(),
            entry_type: new.entry_type,
            title: new.title,
            content: new.content,
            tags: new.tags,
            declaration: new.declaration,
            deprecation_reason: None,
            flag_reason: None,
            scope: new.scope,
            project: new.project,
            parent_page_id: new.parent_page_id,
            source: new.source,
            created_at: now,
            status: Status::Active,
            inaccuracy: 0.0,
            version: 1,
            synced_version: None,
            synced_at: None,
            access_count: 0,
            last_accessed_at: None,
            updated_at: now,
        };
        let tx = self.conn.unchecked_transaction()?;
        db::upsert_entry(&tx, &entry)?;
        db::reindex_fts(&tx, &entry)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Look up an entry by its full id.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn get(&self, id: EntryId) -> Result<Option<Entry>, KbaseError> {
        self.conn
            .query_row("SELECT * FROM entries WHERE id = ?1", params![id.to_string()], db::row_to_entry)
            .optional()
            .map_err(KbaseError::from)
    }

    /// Resolve a short-ID prefix to its entry.
    ///
    /// Prefixes shorter than 4 hex characters are rejected; zero matches is
    /// [`KbaseError::NotFound`]; more than one is [`KbaseError::Ambiguous`].
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] for a too-short prefix,
    /// [`KbaseError::NotFound`] for zero matches, [`KbaseError::Ambiguous`]
    /// for more than one match, or [`KbaseError::Store`] on a database error.
    pub fn resolve(&self, prefix: &str) -> Result<Entry, KbaseError> {
        if prefix.len() < 4 {
            return Err(KbaseError::ValidationFailed {
                field: "id".into(),
                reason: "short ID prefix must be at least 4 characters".into(),
            });
        }
        let like = format!("{prefix}%");
        let mut stmt = self.conn.prepare("SELECT * FROM entries WHERE id LIKE ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![like], db::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        match rows.len() {
            0 => Err(KbaseError::NotFound { kind: "entry", id: prefix.to_string() }),
            1 => Ok(rows.into_iter().next().expect("len checked")),
            _ => Err(KbaseError::Ambiguous {
                prefix: prefix.to_string(),
                candidates: rows.iter().map(|e| e.id.to_string()).collect(),
            }),
        }
    }

    /// Apply a sparse set of field updates.
    ///
    /// Only fields present in `fields` are touched. If any of them actually
    /// changes the stored value, `version` is incremented and `updated_at`
    /// is refreshed. Returns both the pre- and post-update entry so the
    /// caller can decide whether to run the propagator.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist, or
    /// [`KbaseError::Store`] on a database error.
    pub fn update(&self, id: EntryId, fields: EntryUpdate) -> Result<Updated, KbaseError> {
        let before = self.get(id)?.ok_or(KbaseError::NotFound { kind: "entry", id: id.to_string() })?;
        let mut after = before.clone();

        if let Some(v) = fields.title {
            after.title = v;
        }
        if let Some(v) = fields.content {
            after.content = v;
        }
        if let Some(v) = fields.tags {
            after.tags = v;
        }
        if let Some(v) = fields.entry_type {
            after.entry_type = v;
        }
        if let Some(v) = fields.scope {
            after.scope = v;
        }
        if let Some(v) = fields.project {
            after.project = v;
        }
        if let Some(v) = fields.declaration {
            after.declaration = v;
        }
        if let Some(v) = fields.parent_page_id {
            after.parent_page_id = v;
        }
        if let Some(v) = fields.status {
            after.status = v;
        }
        if let Some(v) = fields.deprecation_reason {
            after.deprecation_reason = v;
        }
        if let Some(v) = fields.flag_reason {
            after.flag_reason = v;
        }
        if let Some(v) = fields.inaccuracy {
            after.inaccuracy = Entry::clamp_inaccuracy(v);
        }

        if content_relevant_change(&before, &after) {
            after.version += 1;
            after.updated_at = Utc::now();
        }

        let tx = self.conn.unchecked_transaction()?;
        db::upsert_entry(&tx, &after)?;
        db::reindex_fts(&tx, &after)?;
        tx.commit()?;
        Ok(Updated { before, after })
    }

    /// Record that an entry was returned/used by a caller: bumps
    /// `access_count` by `boost` and sets `last_accessed_at = now`. Never
    /// changes `version` — access is local-only.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist, or
    /// [`KbaseError::Store`] on a database error.
    pub fn record_access(&self, id: EntryId, boost: u64) -> Result<(), KbaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE entries SET access_count = access_count + ?1, last_accessed_at = ?2 WHERE id = ?3",
            params![i64::try_from(boost).unwrap_or(i64::MAX), now, id.to_string()],
        )?;
        if changed == 0 {
            return Err(KbaseError::NotFound { kind: "entry", id: id.to_string() });
        }
        Ok(())
    }

    /// Flip `status` to `deprecated`, record `reason`, bump `version`.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn deprecate(&self, id: EntryId, reason: String) -> Result<Updated, KbaseError> {
        self.update(
            id,
            EntryUpdate {
                status: Some(Status::Deprecated),
                deprecation_reason: Some(Some(reason)),
                ..EntryUpdate::default()
            },
        )
    }

    /// Reset `inaccuracy` to 0 and clear `flag_reason` (reinforcement).
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn reset_inaccuracy(&self, id: EntryId) -> Result<Updated, KbaseError> {
        self.update(
            id,
            EntryUpdate { inaccuracy: Some(0.0), flag_reason: Some(None), ..EntryUpdate::default() },
        )
    }

    /// Set `inaccuracy` to a clamped value, bumping `version` only if the
    /// clamped value actually changes.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn set_inaccuracy(&self, id: EntryId, value: f64) -> Result<Updated, KbaseError> {
        self.update(id, EntryUpdate { inaccuracy: Some(value), ..EntryUpdate::default() })
    }

    /// Insert a directed typed edge.
    ///
    /// Idempotent on `(source_id, target_id, link_type)`: if the edge already
    /// exists, the existing row is returned unchanged rather than erroring —
    /// this lets sync's link reconciliation (§4.7) call `insert_link`
    /// unconditionally with deterministic ids.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] for a self-link with a type
    /// other than `conflicts_with`, [`KbaseError::NotFound`] if either
    /// endpoint does not exist, or [`KbaseError::Store`] on a database error.
    pub fn insert_link(&self, new: NewLink) -> Result<Link, KbaseError> {
        if new.source_id == new.target_id && new.link_type != LinkType::ConflictsWith {
            return Err(KbaseError::ValidationFailed {
                field: "target_id".into(),
                reason: "self-links are only allowed for conflicts_with".into(),
            });
        }
        if self.get(new.source_id)?.is_none() {
            return Err(KbaseError::NotFound { kind: "entry", id: new.source_id.to_string() });
        }
        if self.get(new.target_id)?.is_none() {
            return Err(KbaseError::NotFound { kind: "entry", id: new.target_id.to_string() });
        }

        if let Some(existing) = self.find_link(new.source_id, new.target_id, new.link_type)? {
            return Ok(existing);
        }

        let id = new.id.unwrap_or_else(LinkId::new_random);
        let link = Link {
            id,
            source_id: new.source_id,
            target_id: new.target_id,
            link_type: new.link_type,
            description: new.description,
            source: new.source,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO links (id, source_id, target_id, link_type, description, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, target_id, link_type) DO NOTHING",
            params![
                link.id.to_string(),
                link.source_id.to_string(),
                link.target_id.to_string(),
                link.link_type.as_str(),
                link.description,
                link.source,
                link.created_at.to_rfc3339(),
            ],
        )?;
        match self.find_link(new.source_id, new.target_id, new.link_type)? {
            Some(stored) => Ok(stored),
            None => Ok(link),
        }
    }

    /// Delete a link by id.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn delete_link(&self, id: LinkId) -> Result<(), KbaseError> {
        let changed = self.conn.execute("DELETE FROM links WHERE id = ?1", params![id.to_string()])?;
        if changed == 0 {
            return Err(KbaseError::NotFound { kind: "link", id: id.to_string() });
        }
        Ok(())
    }

    /// Look up a link by id.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn get_link(&self, id: LinkId) -> Result<Option<Link>, KbaseError> {
        self.conn
            .query_row("SELECT * FROM links WHERE id = ?1", params![id.to_string()], db::row_to_link)
            .optional()
            .map_err(KbaseError::from)
    }

    fn find_link(&self, source: EntryId, target: EntryId, link_type: LinkType) -> Result<Option<Link>, KbaseError> {
        self.conn
            .query_row(
                "SELECT * FROM links WHERE source_id = ?1 AND target_id = ?2 AND link_type = ?3",
                params![source.to_string(), target.to_string(), link_type.as_str()],
                db::row_to_link,
            )
            .optional()
            .map_err(KbaseError::from)
    }

    /// All outgoing edges from `id` (used by the Propagator's forward BFS
    /// and the Serializer's `links:` frontmatter array).
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn links_from(&self, id: EntryId) -> Result<Vec<Link>, KbaseError> {
        let mut stmt = self.conn.prepare("SELECT * FROM links WHERE source_id = ?1")?;
        Ok(stmt.query_map(params![id.to_string()], db::row_to_link)?.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All incoming edges to `id`.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn links_to(&self, id: EntryId) -> Result<Vec<Link>, KbaseError> {
        let mut stmt = self.conn.prepare("SELECT * FROM links WHERE target_id = ?1")?;
        Ok(stmt.query_map(params![id.to_string()], db::row_to_link)?.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete an entry and every link that touches it.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn delete(&self, id: EntryId) -> Result<Entry, KbaseError> {
        let entry = self.get(id)?.ok_or(KbaseError::NotFound { kind: "entry", id: id.to_string() })?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM links WHERE source_id = ?1 OR target_id = ?1", params![id.to_string()])?;
        tx.execute("DELETE FROM entries_fts WHERE id = ?1", params![id.to_string()])?;
        tx.execute("DELETE FROM entries WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(entry)
    }

    /// All entries currently in the index, unfiltered. Used by the Mirror's
    /// push pass and the legacy migration.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn all_entries(&self) -> Result<Vec<Entry>, KbaseError> {
        let mut stmt = self.conn.prepare("SELECT * FROM entries")?;
        Ok(stmt.query_map([], db::row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert or overwrite an entry at its own id, bypassing the sparse
    /// update/version-bump logic in [`Store::update`]. Used by the sync
    /// engine to import a peer's entry state and by the legacy migration,
    /// both of which already know the exact row they want written.
    ///
    /// # Errors
    /// Returns [`KbaseError::Store`] on a database error.
    pub fn put(&self, entry: &Entry) -> Result<(), KbaseError> {
        let tx = self.conn.unchecked_transaction()?;
        db::upsert_entry(&tx, entry)?;
        db::reindex_fts(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    /// Record that `id` has been synced at `version`: `synced_version`/
    /// `synced_at` are local bookkeeping, not content, so this never bumps
    /// `version`.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist, or
    /// [`KbaseError::Store`] on a database error.
    pub fn mark_synced(&self, id: EntryId, version: u64) -> Result<(), KbaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE entries SET synced_version = ?1, synced_at = ?2 WHERE id = ?3",
            params![i64::try_from(version).unwrap_or(i64::MAX), now, id.to_string()],
        )?;
        if changed == 0 {
            return Err(KbaseError::NotFound { kind: "entry", id: id.to_string() });
        }
        Ok(())
    }

    /// Direct access to the underlying connection, for modules ([`crate::search`],
    /// [`crate::store::sync_lock`]) that need raw SQL the typed API above
    /// doesn't cover.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn new_entry(title: &str) -> NewEntry {
        NewEntry {
            entry_type: EntryType::Fact,
            title: title.to_string(),
            content: "body".to_string(),
            tags: BTreeSet::new(),
            declaration: None,
            scope: Scope::Repo,
            project: None,
            parent_page_id: None,
            source: "agent".to_string(),
        }
    }

    #[test]
    fn insert_assigns_defaults() {
        let store = Store::open_in_memory().unwrap();
        let e = store.insert(new_entry("Title")).unwrap();
        assert_eq!(e.version, 1);
        assert_eq!(e.inaccuracy, 0.0);
        assert_eq!(e.status, Status::Active);
        assert!(e.synced_version.is_none());
    }

    #[test]
    fn insert_rejects_empty_title() {
        let store = Store::open_in_memory().unwrap();
        let err = store.insert(new_entry("   ")).unwrap_err();
        assert!(matches!(err, KbaseError::ValidationFailed { .. }));
    }

    #[test]
    fn update_bumps_version_only_on_real_change() {
        let store = Store::open_in_memory().unwrap();
        let e = store.insert(new_entry("Title")).unwrap();
        let same = store
            .update(e.id, EntryUpdate { title: Some("Title".into()), ..EntryUpdate::default() })
            .unwrap();
        assert_eq!(same.after.version, 1);

        let changed = store
            .update(e.id, EntryUpdate { title: Some("New Title".into()), ..EntryUpdate::default() })
            .unwrap();
        assert_eq!(changed.after.version, 2);
        assert_eq!(changed.before.title, "Title");
    }

    #[test]
    fn record_access_does_not_bump_version() {
        let store = Store::open_in_memory().unwrap();
        let e = store.insert(new_entry("Title")).unwrap();
        store.record_access(e.id, 1).unwrap();
        let after = store.get(e.id).unwrap().unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.access_count, 1);
        assert!(after.last_accessed_at.is_some());
    }

    #[test]
    fn short_id_resolution_boundaries() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(new_entry("A")).unwrap();
        let b = store.insert(new_entry("B")).unwrap();

        let too_short = &a.id.to_string()[..3];
        assert!(matches!(store.resolve(too_short).unwrap_err(), KbaseError::ValidationFailed { .. }));

        let a4 = &a.id.to_string()[..4];
        let b4 = &b.id.to_string()[..4];
        if a4 == b4 {
            assert!(matches!(store.resolve(a4).unwrap_err(), KbaseError::Ambiguous { .. }));
        } else {
            assert_eq!(store.resolve(a4).unwrap().id, a.id);
        }

        assert!(matches!(store.resolve("ffffffff").unwrap_err(), KbaseError::NotFound { .. }));
    }

    #[test]
    fn insert_link_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(new_entry("A")).unwrap();
        let b = store.insert(new_entry("B")).unwrap();
        let new = NewLink {
            id: None,
            source_id: a.id,
            target_id: b.id,
            link_type: LinkType::Related,
            description: None,
            source: "agent".into(),
        };
        let first = store.insert_link(new.clone()).unwrap();
        let second = store.insert_link(new).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.links_from(a.id).unwrap().len(), 1);
    }

    #[test]
    fn insert_link_rejects_self_link_unless_conflicts_with() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(new_entry("A")).unwrap();
        let bad = NewLink {
            id: None,
            source_id: a.id,
            target_id: a.id,
            link_type: LinkType::Related,
            description: None,
            source: "agent".into(),
        };
        assert!(store.insert_link(bad).is_err());

        let ok = NewLink {
            id: None,
            source_id: a.id,
            target_id: a.id,
            link_type: LinkType::ConflictsWith,
            description: None,
            source: "agent".into(),
        };
        assert!(store.insert_link(ok).is_ok());
    }

    #[test]
    fn delete_removes_entry_and_incident_links() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert(new_entry("A")).unwrap();
        let b = store.insert(new_entry("B")).unwrap();
        store
            .insert_link(NewLink {
                id: None,
                source_id: a.id,
                target_id: b.id,
                link_type: LinkType::Related,
                description: None,
                source: "agent".into(),
            })
            .unwrap();
        store.delete(a.id).unwrap();
        assert!(store.get(a.id).unwrap().is_none());
        assert!(store.links_to(b.id).unwrap().is_empty());
    }
}
