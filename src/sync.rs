//! The sync engine: pull and push pipelines between the local index and a
//! routed mirror repo, plus the one-shot legacy JSON migration.
//!
//! Git-level conflicts are resolved "remote always wins" at the file level —
//! [`pull`] checks out the remote version of any path git leaves conflicted
//! and commits that resolution itself, a fixed policy rather than a
//! pluggable strategy. Conflicts in the *data* (two peers diverging on the
//! same entry between syncs) are a separate, higher-level concept handled by
//! [`classify`] and resolved by keeping the remote version canonical while
//! preserving the local divergence as a new, local-only conflict-copy entry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::commit::CommitScheduler;
use crate::error::KbaseError;
use crate::mirror::Mirror;
use crate::serializer::{self, ParsedEntry};
use crate::store::{Entry, EntryId, Link, NewLink, Status, Store, INACCURACY_THRESHOLD};

const COMMIT_AUTHOR: &str = "kbase <kbase@local>";
const DEFAULT_BRANCH: &str = "main";

/// Outcome of reconciling one remote entry against local state. `SV` is the
/// entry's `synced_version` (the version last agreed with this remote), `LV`
/// its current local `version`, `RV` the version read off the remote file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Classification {
    /// Neither side changed since the last sync.
    NoChange,
    /// Only the remote changed; its state becomes canonical.
    RemoteWins,
    /// Only the local side changed; nothing to do on pull, it will be
    /// pushed later.
    LocalWins,
    /// Both sides changed since the last sync: remote becomes canonical and
    /// the local divergence survives as a conflict copy.
    Conflict,
}

fn classify(sv: Option<u64>, lv: u64, rv: u64) -> Classification {
    let Some(sv) = sv else {
        // Never synced before: treat any existing remote state as the
        // baseline, same as a brand-new import.
        return Classification::RemoteWins;
    };
    match (lv > sv, rv > sv) {
        (false, false) => Classification::NoChange,
        (false, true) => Classification::RemoteWins,
        (true, false) => Classification::LocalWins,
        (true, true) => Classification::Conflict,
    }
}

/// `true` if `local`'s shared fields already equal `remote`'s: any
/// classification other than `no_change` collapses to `no_change` when
/// the content is actually identical, since there's nothing to reconcile.
/// Numeric `inaccuracy` tolerates the 3-decimal rounding applied on
/// serialization; trailing whitespace on `content` is ignored.
fn shared_content_equal(local: &Entry, remote: &ParsedEntry) -> bool {
    local.entry_type == remote.entry_type
        && local.title == remote.title
        && local.content.trim_end() == remote.content.trim_end()
        && local.tags == remote.tags
        && local.declaration == remote.declaration
        && local.deprecation_reason == remote.deprecation_reason
        && local.flag_reason == remote.flag_reason
        && local.scope == remote.scope
        && local.project == remote.project
        && local.parent_page_id == remote.parent_page_id
        && local.status == remote.status
        && (local.inaccuracy - remote.inaccuracy).abs() < 1e-3
}

/// Result of one [`pull`] call.
#[derive(Clone, Debug, Default)]
pub struct PullOutcome {
    pub imported: usize,
    pub updated: usize,
    pub conflicts: usize,
    pub tombstoned: usize,
    pub warnings: Vec<String>,
}

/// Result of one [`push`] call.
#[derive(Clone, Debug, Default)]
pub struct PushOutcome {
    pub written: usize,
    pub removed: usize,
    pub pushed: bool,
}

/// Pull remote state for `repo_name` into the local index.
///
/// # Errors
/// Returns [`KbaseError::NotFound`] if `repo_name` isn't configured,
/// [`KbaseError::Git`] on a git failure, or [`KbaseError::Store`] on a
/// database error.
pub fn pull(store: &Store, mirror: &Mirror, repo_name: &str) -> Result<PullOutcome, KbaseError> {
    let route = mirror.route(repo_name).ok_or_else(|| KbaseError::NotFound { kind: "repo", id: repo_name.into() })?;
    let route = route.clone();
    let git = mirror.git(repo_name).expect("route exists implies git handle exists");

    if let Some(remote) = &route.remote {
        if let Some(their_oid) = git.fetch(remote, DEFAULT_BRANCH)? {
            if let kbase_git::MergeOutcome::Conflicted { paths } = git.merge(their_oid)? {
                git.checkout_paths_from(their_oid, &paths)?;
                git.stage_all()?;
                git.commit("sync: resolve conflicts, remote wins", COMMIT_AUTHOR)?;
            }
        }
    }

    let mut outcome = PullOutcome::default();
    let mut seen: HashSet<EntryId> = HashSet::new();
    let mut remote_link_ids: HashSet<crate::store::LinkId> = HashSet::new();

    for path in walk_markdown_files(&route.path)? {
        let content = std::fs::read_to_string(&path)?;
        if serializer::parse_redirect(&content).is_some() {
            continue;
        }
        let parsed = match serializer::parse(&content) {
            Ok(p) => p,
            Err(e) => {
                outcome.warnings.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        seen.insert(parsed.id);
        remote_link_ids.extend(parsed.links.iter().map(|l| l.id));
        reconcile_one(store, &parsed, &mut outcome)?;
    }

    for entry in store.all_entries()? {
        if mirror.repo_name_for(entry.scope, entry.project.as_deref()) != Some(repo_name) {
            continue;
        }
        if entry.is_conflict_copy() {
            continue;
        }
        let previously_synced = entry.synced_at.is_some();
        if previously_synced && !seen.contains(&entry.id) {
            store.delete(entry.id)?;
            outcome.tombstoned += 1;
        }
    }

    // Any locally-synced, non-conflict link whose deterministic id didn't
    // reappear in this pull's remote frontmatter is gone upstream and must
    // go here too.
    for id in &seen {
        for link in store.links_from(*id)? {
            if link.source == "sync" && !link.is_local_only() && !remote_link_ids.contains(&link.id) {
                store.delete_link(link.id)?;
            }
        }
    }

    Ok(outcome)
}

fn reconcile_one(store: &Store, parsed: &ParsedEntry, outcome: &mut PullOutcome) -> Result<(), KbaseError> {
    let existing = store.get(parsed.id)?;

    let classification = match &existing {
        None => Classification::RemoteWins,
        Some(local) => {
            let initial = classify(local.synced_version, local.version, parsed.version);
            if initial != Classification::NoChange && shared_content_equal(local, parsed) {
                Classification::NoChange
            } else {
                initial
            }
        }
    };

    match classification {
        Classification::NoChange | Classification::LocalWins => {}
        Classification::RemoteWins => {
            let merged = merge_remote_into(existing.as_ref(), parsed);
            store.put(&merged)?;
            if existing.is_some() {
                outcome.updated += 1;
            } else {
                outcome.imported += 1;
            }
        }
        Classification::Conflict => {
            let local = existing.expect("Conflict classification implies a local entry exists");
            let copy = conflict_copy(&local);
            store.put(&copy)?;
            let merged = merge_remote_into(Some(&local), parsed);
            store.put(&merged)?;
            store.insert_link(NewLink {
                id: None,
                source_id: copy.id,
                target_id: merged.id,
                link_type: crate::store::LinkType::ConflictsWith,
                description: None,
                source: "sync:conflict".to_string(),
            })?;
            outcome.conflicts += 1;
        }
    }

    for link in &parsed.links {
        store.insert_link(NewLink {
            id: Some(link.id),
            source_id: parsed.id,
            target_id: link.target,
            link_type: link.link_type,
            description: link.description.clone(),
            source: "sync".to_string(),
        })?;
    }

    Ok(())
}

/// Build the canonical, post-pull entry: remote's shared fields plus
/// whatever local-only fields (access stats, prior sync bookkeeping aside)
/// already existed.
fn merge_remote_into(existing: Option<&Entry>, remote: &ParsedEntry) -> Entry {
    let now = Utc::now();
    Entry {
        id: remote.id,
        entry_type: remote.entry_type,
        title: remote.title.clone(),
        content: remote.content.clone(),
        tags: remote.tags.clone(),
        declaration: remote.declaration.clone(),
        deprecation_reason: remote.deprecation_reason.clone(),
        flag_reason: remote.flag_reason.clone(),
        scope: remote.scope,
        project: remote.project.clone(),
        parent_page_id: remote.parent_page_id,
        source: remote.source.clone(),
        created_at: remote.created_at,
        status: remote.status,
        inaccuracy: remote.inaccuracy,
        version: remote.version,
        synced_version: Some(remote.version),
        synced_at: Some(now),
        access_count: existing.map_or(0, |e| e.access_count),
        last_accessed_at: existing.and_then(|e| e.last_accessed_at),
        updated_at: now,
    }
}

/// Preserve a diverging local version as a new, local-only entry: never
/// mirrored, title prefixed, `source = "sync:conflict"`.
fn conflict_copy(local: &Entry) -> Entry {
    let now = Utc::now();
    Entry {
        id: EntryId::new_random(),
        entry_type: local.entry_type,
        title: format!("[Sync Conflict] {}", local.title),
        content: local.content.clone(),
        tags: local.tags.clone(),
        declaration: local.declaration.clone(),
        deprecation_reason: None,
        flag_reason: None,
        scope: local.scope,
        project: local.project.clone(),
        parent_page_id: None,
        source: "sync:conflict".to_string(),
        created_at: now,
        status: Status::Active,
        inaccuracy: INACCURACY_THRESHOLD,
        version: 1,
        synced_version: None,
        synced_at: None,
        access_count: 0,
        last_accessed_at: None,
        updated_at: now,
    }
}

/// Push local state for `repo_name` to its mirror repo.
///
/// Flushes any pending debounced commit first so the push doesn't race an
/// in-flight commit, writes every routed, non-conflict entry's current
/// Markdown file, removes files for entries that no longer exist or no
/// longer route here, commits if anything changed, and pushes if a remote
/// is configured.
///
/// # Errors
/// Returns [`KbaseError::NotFound`] if `repo_name` isn't configured,
/// [`KbaseError::Git`] on a git failure, or [`KbaseError::Store`] on a
/// database error.
pub fn push(
    store: &Store,
    mirror: &Mirror,
    commit_scheduler: &Arc<CommitScheduler>,
    repo_name: &str,
) -> Result<PushOutcome, KbaseError> {
    commit_scheduler.flush()?;

    let route = mirror.route(repo_name).ok_or_else(|| KbaseError::NotFound { kind: "repo", id: repo_name.into() })?;
    let route = route.clone();
    let git = mirror.git(repo_name).expect("route exists implies git handle exists");

    let mut outcome = PushOutcome::default();
    let mut live_ids: HashSet<EntryId> = HashSet::new();

    for entry in store.all_entries()? {
        if entry.is_conflict_copy() {
            continue;
        }
        if mirror.repo_name_for(entry.scope, entry.project.as_deref()) != Some(repo_name) {
            continue;
        }
        live_ids.insert(entry.id);
        let links: Vec<Link> = store.links_from(entry.id)?;
        mirror.write(None, &entry, &links)?;
        store.mark_synced(entry.id, entry.version)?;
        outcome.written += 1;
    }

    for path in walk_markdown_files(&route.path)? {
        let content = std::fs::read_to_string(&path)?;
        let stale = match serializer::parse_redirect(&content) {
            Some(_) => false, // redirect markers are cleaned up below, once their target is confirmed live
            None => match serializer::parse(&content) {
                Ok(parsed) => !live_ids.contains(&parsed.id),
                Err(_) => false,
            },
        };
        if stale {
            std::fs::remove_file(&path)?;
            outcome.removed += 1;
        }
    }
    remove_resolved_redirects(&route.path, &live_ids, &mut outcome)?;

    if git.is_dirty()? {
        git.stage_all()?;
        git.commit("sync: push", COMMIT_AUTHOR)?;
    }
    if let Some(remote) = &route.remote {
        git.push(remote, DEFAULT_BRANCH)?;
        outcome.pushed = true;
    }

    Ok(outcome)
}

/// Remove redirect markers whose target file now exists and is live: once
/// the renamed file has landed, the marker has done its job and a freshly
/// cloning peer only needs the new file, never the breadcrumb.
fn remove_resolved_redirects(root: &Path, live_ids: &HashSet<EntryId>, outcome: &mut PushOutcome) -> Result<(), KbaseError> {
    for path in walk_markdown_files(root)? {
        let content = std::fs::read_to_string(&path)?;
        let Some(target_basename) = serializer::parse_redirect(&content) else { continue };
        let Some(parent) = path.parent() else { continue };
        let target_path = parent.join(target_basename);
        let target_is_live = std::fs::read_to_string(&target_path)
            .ok()
            .and_then(|c| serializer::parse(&c).ok())
            .is_some_and(|p| live_ids.contains(&p.id));
        if target_is_live {
            std::fs::remove_file(&path)?;
            outcome.removed += 1;
        }
    }
    Ok(())
}

fn walk_markdown_files(repo_root: &Path) -> Result<Vec<PathBuf>, KbaseError> {
    let entries_dir = repo_root.join("entries");
    let mut out = Vec::new();
    walk_dir(&entries_dir, &mut out)?;
    Ok(out)
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), KbaseError> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_dir(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

/// Legacy JSON document shape this migration knows how to read: a flat array
/// of records carrying the same shared fields an [`Entry`] does, minus the
/// fields introduced later (inaccuracy propagation, sync bookkeeping).
#[derive(Clone, Debug, serde::Deserialize)]
struct LegacyDocument {
    #[serde(default = "legacy_schema_v1")]
    schema_version: u32,
    entries: Vec<LegacyEntry>,
}

const fn legacy_schema_v1() -> u32 {
    1
}

#[derive(Clone, Debug, serde::Deserialize)]
struct LegacyEntry {
    id: Option<String>,
    #[serde(rename = "type")]
    entry_type: String,
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    scope: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default = "legacy_source")]
    source: String,
}

fn legacy_source() -> String {
    "legacy".to_string()
}

/// One-shot, idempotent migration of a pre-schema-v2 JSON export into the
/// index and its mirror. A repo already at schema v2 (no `legacy.json`, or
/// one with `schema_version >= 2`) is left untouched.
///
/// # Errors
/// Returns [`KbaseError::Io`] on a file system error, or
/// [`KbaseError::ValidationFailed`] if the legacy document doesn't parse.
pub fn migrate_legacy(store: &Store, mirror: &Mirror, repo_name: &str) -> Result<usize, KbaseError> {
    let Some(route) = mirror.route(repo_name) else {
        return Err(KbaseError::NotFound { kind: "repo", id: repo_name.into() });
    };
    let legacy_path = route.path.join("legacy.json");
    let contents = match std::fs::read_to_string(&legacy_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let doc: LegacyDocument = serde_json::from_str(&contents)
        .map_err(|e| KbaseError::ValidationFailed { field: "legacy.json".into(), reason: e.to_string() })?;
    if doc.schema_version >= 2 {
        return Ok(0);
    }

    let mut migrated = 0;
    for legacy in doc.entries {
        let entry_type = serializer::parse_entry_type(&legacy.entry_type).map_err(|_| KbaseError::ValidationFailed {
            field: "legacy.entries[].type".into(),
            reason: format!("unknown entry type {:?}", legacy.entry_type),
        })?;
        let scope = serializer::parse_scope(&legacy.scope).map_err(|_| KbaseError::ValidationFailed {
            field: "legacy.entries[].scope".into(),
            reason: format!("unknown scope {:?}", legacy.scope),
        })?;
        let id = legacy
            .id
            .as_deref()
            .map(str::parse::<EntryId>)
            .transpose()
            .map_err(|_| KbaseError::ValidationFailed { field: "legacy.entries[].id".into(), reason: "invalid id".into() })?
            .unwrap_or_else(EntryId::new_random);

        let now = Utc::now();
        let entry = Entry {
            id,
            entry_type,
            title: legacy.title,
            content: legacy.content,
            tags: legacy.tags.into_iter().collect(),
            declaration: None,
            deprecation_reason: None,
            flag_reason: None,
            scope,
            project: legacy.project,
            parent_page_id: None,
            source: legacy.source,
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
        store.put(&entry)?;
        mirror.write(None, &entry, &[])?;
        migrated += 1;
    }

    let migrated_doc = serde_json::json!({ "schema_version": 2, "entries": [] });
    std::fs::write(&legacy_path, serde_json::to_string_pretty(&migrated_doc).unwrap_or_default())?;

    Ok(migrated)
}
