//! The Tool surface: thin, validating adapters — one per agent operation —
//! that wire the Store, Propagator, Mirror, Commit scheduler, and Sync
//! engine into the single call an agent makes.
//!
//! Every adapter here does exactly three things, in order: validate the raw
//! (string-shaped, as an agent or CLI would send it) input into a typed
//! value, call exactly one Store/Sync operation, then format the result into
//! a uniform `{results, warnings[], not_found[], errors[]}` envelope.
//! Mirroring and commit scheduling are not a fourth step tacked onto each
//! adapter by hand — they're driven by [`Tools::propagate_and_mirror`], the
//! single place that turns a `Store::update`'s before/after pair into the
//! bump set the Graph produces and the mirror writes that follow it, rather
//! than duplicating that apply-then-materialize step per command.

use std::sync::Arc;

use crate::commit::CommitScheduler;
use crate::error::KbaseError;
use crate::graph::{self, BumpSet};
use crate::mirror::Mirror;
use crate::search::{self, SearchParams};
use crate::store::sync_lock;
use crate::store::{Entry, EntryId, EntryType, EntryUpdate, Link, LinkId, LinkType, NewEntry, NewLink, Scope, Store};
use crate::sync::{self, PullOutcome, PushOutcome};

/// Uniform result envelope every adapter returns.
#[derive(Clone, Debug, Default)]
pub struct ToolEnvelope<T> {
    pub results: Vec<T>,
    pub warnings: Vec<String>,
    pub not_found: Vec<String>,
    pub errors: Vec<String>,
}

impl<T> ToolEnvelope<T> {
    fn ok(result: T) -> Self {
        Self { results: vec![result], ..Self::default() }
    }
}

/// Raw, string-shaped input for [`Tools::remember`] — the shape an agent's
/// tool call or the CLI hands in before any parsing happens.
#[derive(Clone, Debug, Default)]
pub struct RememberInput {
    pub entry_type: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub declaration: Option<String>,
    pub scope: String,
    pub project: Option<String>,
    pub parent_page_id: Option<String>,
    pub source: String,
}

/// Raw, string-shaped sparse update for [`Tools::update`]. `None` fields are
/// left untouched; the nullable fields use the same `Option<Option<_>>`
/// "unset" convention as [`EntryUpdate`] but at the string layer.
#[derive(Clone, Debug, Default)]
pub struct UpdateInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub entry_type: Option<String>,
    pub scope: Option<String>,
    pub project: Option<Option<String>>,
    pub declaration: Option<Option<String>>,
    pub parent_page_id: Option<Option<String>>,
}

/// Status snapshot returned by [`Tools::sync_status`].
#[derive(Clone, Debug)]
pub struct SyncStatus {
    pub lock_held: bool,
    pub commit_pending: bool,
}

fn invalid(field: &str, reason: impl Into<String>) -> KbaseError {
    KbaseError::ValidationFailed { field: field.to_string(), reason: reason.into() }
}

fn parse_entry_type(s: &str) -> Result<EntryType, KbaseError> {
    match s {
        "convention" => Ok(EntryType::Convention),
        "decision" => Ok(EntryType::Decision),
        "pattern" => Ok(EntryType::Pattern),
        "pitfall" => Ok(EntryType::Pitfall),
        "fact" => Ok(EntryType::Fact),
        "debug_note" => Ok(EntryType::DebugNote),
        "process" => Ok(EntryType::Process),
        "wiki" => Ok(EntryType::Wiki),
        other => Err(invalid("entry_type", format!("unknown entry type {other:?}"))),
    }
}

fn parse_scope(s: &str) -> Result<Scope, KbaseError> {
    match s {
        "company" => Ok(Scope::Company),
        "project" => Ok(Scope::Project),
        "repo" => Ok(Scope::Repo),
        other => Err(invalid("scope", format!("unknown scope {other:?}"))),
    }
}

fn parse_link_type(s: &str) -> Result<LinkType, KbaseError> {
    s.parse().map_err(|_| invalid("link_type", format!("unknown link type {s:?}")))
}

fn parse_entry_id(field: &str, s: &str) -> Result<EntryId, KbaseError> {
    s.parse().map_err(|_| invalid(field, format!("{s:?} is not a UUID")))
}

/// Bundles the Store, Mirror, and Commit scheduler behind the single-call
/// agent-facing operations.
pub struct Tools {
    store: Store,
    mirror: Arc<Mirror>,
    commit: Arc<CommitScheduler>,
}

impl Tools {
    #[must_use]
    pub fn new(store: Store, mirror: Arc<Mirror>) -> Self {
        let commit = CommitScheduler::new(Arc::clone(&mirror));
        Self { store, mirror, commit }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// `remember` — insert a new entry.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] if any field fails closed-enum
    /// or non-empty validation, or a Store error on failure to insert.
    pub fn remember(&self, input: RememberInput) -> Result<ToolEnvelope<Entry>, KbaseError> {
        let entry_type = parse_entry_type(&input.entry_type)?;
        let scope = parse_scope(&input.scope)?;
        if input.title.trim().is_empty() {
            return Err(invalid("title", "must not be empty"));
        }
        let parent_page_id = input
            .parent_page_id
            .as_deref()
            .map(|s| parse_entry_id("parent_page_id", s))
            .transpose()?;

        let entry = self.store.insert(NewEntry {
            entry_type,
            title: input.title,
            content: input.content,
            tags: input.tags.into_iter().collect(),
            declaration: input.declaration,
            scope,
            project: input.project,
            parent_page_id,
            source: input.source,
        })?;

        self.mirror.write(None, &entry, &[])?;
        self.commit.schedule_commit(format!("remember: {}", entry.title));
        Ok(ToolEnvelope::ok(entry))
    }

    /// `recall` — search or list entries.
    ///
    /// # Errors
    /// Returns a Store error on a database failure.
    pub fn recall(&self, params: &SearchParams) -> Result<ToolEnvelope<Entry>, KbaseError> {
        let results = search::search(&self.store, params)?;
        let mut warnings = Vec::new();
        for entry in &results {
            if entry.needs_revalidation() {
                warnings.push(format!("{} is flagged for revalidation", entry.id));
            }
        }
        Ok(ToolEnvelope { results, warnings, ..ToolEnvelope::default() })
    }

    /// `resolve` — short-ID lookup.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] or [`KbaseError::Ambiguous`] per the
    /// Store's short-ID resolution rules.
    pub fn resolve(&self, prefix: &str) -> Result<ToolEnvelope<Entry>, KbaseError> {
        let entry = self.store.resolve(prefix)?;
        Ok(ToolEnvelope::ok(entry))
    }

    /// `update` — apply a sparse update, then propagate and mirror if the
    /// change was content-relevant.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] on a malformed field,
    /// [`KbaseError::NotFound`] if `id` does not exist, or a Store error.
    pub fn update(&self, id: EntryId, input: UpdateInput) -> Result<ToolEnvelope<Entry>, KbaseError> {
        let entry_type = input.entry_type.as_deref().map(parse_entry_type).transpose()?;
        let scope = input.scope.as_deref().map(parse_scope).transpose()?;
        if let Some(title) = &input.title {
            if title.trim().is_empty() {
                return Err(invalid("title", "must not be empty"));
            }
        }
        let parent_page_id = match input.parent_page_id {
            None => None,
            Some(None) => Some(None),
            Some(Some(s)) => Some(Some(parse_entry_id("parent_page_id", &s)?)),
        };

        let fields = EntryUpdate {
            title: input.title,
            content: input.content,
            tags: input.tags.map(|ts| ts.into_iter().collect()),
            entry_type,
            scope,
            project: input.project,
            declaration: input.declaration,
            parent_page_id,
            status: None,
            deprecation_reason: None,
            flag_reason: None,
            inaccuracy: None,
        };

        let updated = self.store.update(id, fields)?;
        let (after, warnings) = self.propagate_and_mirror(&updated.before, updated.after)?;
        Ok(ToolEnvelope { results: vec![after], warnings, ..ToolEnvelope::default() })
    }

    /// `link` — create a directed edge, running supersedes-flagging if
    /// applicable.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] on a malformed `link_type`,
    /// [`KbaseError::NotFound`] if either endpoint doesn't exist, or a Store
    /// error (including a `UNIQUE(source_id, target_id, link_type)`
    /// violation on a duplicate edge).
    pub fn link(
        &self,
        source_id: EntryId,
        target_id: EntryId,
        link_type: &str,
        description: Option<String>,
    ) -> Result<ToolEnvelope<Link>, KbaseError> {
        let link_type = parse_link_type(link_type)?;
        let link = self.store.insert_link(NewLink {
            id: None,
            source_id,
            target_id,
            link_type,
            description,
            source: "agent".to_string(),
        })?;

        let mut warnings = Vec::new();
        if link_type == LinkType::Supersedes {
            graph::flag_superseded(&self.store, source_id, target_id)?;
            if let Some(bumped) = self.store.get(target_id)? {
                self.mirror_bumped(&[bumped])?;
                warnings.push(format!("{target_id} flagged superseded"));
            }
        }

        let source_entry = self.store.get(source_id)?;
        if let Some(entry) = source_entry {
            self.mirror.write(Some(&entry), &entry, &self.store.links_from(source_id)?)?;
            self.commit.schedule_commit(format!("link: {source_id} -> {target_id}"));
        }

        Ok(ToolEnvelope { results: vec![link], warnings, ..ToolEnvelope::default() })
    }

    /// `unlink` — delete a link by id.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist, or a Store
    /// error.
    pub fn unlink(&self, id: LinkId) -> Result<ToolEnvelope<()>, KbaseError> {
        let link = self.store.get_link(id)?;
        self.store.delete_link(id)?;
        if let Some(link) = link {
            if let Some(entry) = self.store.get(link.source_id)? {
                self.mirror.write(Some(&entry), &entry, &self.store.links_from(link.source_id)?)?;
                self.commit.schedule_commit(format!("unlink: {id}"));
            }
        }
        Ok(ToolEnvelope::ok(()))
    }

    /// `deprecate` — flip status, append a reason, bump version.
    ///
    /// # Errors
    /// Returns [`KbaseError::ValidationFailed`] if `reason` is empty, or
    /// [`KbaseError::NotFound`] if `id` does not exist.
    pub fn deprecate(&self, id: EntryId, reason: String) -> Result<ToolEnvelope<Entry>, KbaseError> {
        if reason.trim().is_empty() {
            return Err(invalid("reason", "must not be empty"));
        }
        let updated = self.store.deprecate(id, reason)?;
        self.mirror.write(Some(&updated.before), &updated.after, &self.store.links_from(id)?)?;
        self.commit.schedule_commit(format!("deprecate: {}", updated.after.title));
        Ok(ToolEnvelope::ok(updated.after))
    }

    /// `reinforce` — reset inaccuracy to 0 and clear `flag_reason`. An
    /// explicit signal that an entry is still correct, distinct from the
    /// passive decay [`crate::graph::flag_superseded`] applies over time.
    ///
    /// # Errors
    /// Returns [`KbaseError::NotFound`] if `id` does not exist.
    pub fn reinforce(&self, id: EntryId) -> Result<ToolEnvelope<Entry>, KbaseError> {
        let updated = self.store.reset_inaccuracy(id)?;
        self.mirror.write(Some(&updated.before), &updated.after, &self.store.links_from(id)?)?;
        self.commit.schedule_commit(format!("reinforce: {}", updated.after.title));
        Ok(ToolEnvelope::ok(updated.after))
    }

    /// `sync_now` — manual pull then push against one configured repo.
    /// Acquires the coordinator lock for the duration of the call and
    /// releases it before returning, succeeding or not.
    ///
    /// # Errors
    /// Returns [`KbaseError::Busy`] if another live process holds the
    /// coordinator lock, or a Git/Store error from the underlying pull/push.
    pub fn sync_now(&self, repo_name: &str, ttl_secs: i64) -> Result<ToolEnvelope<(PullOutcome, PushOutcome)>, KbaseError> {
        if !sync_lock::try_acquire(&self.store, ttl_secs)? {
            return Err(KbaseError::Busy { resource: repo_name.to_string(), holder: "another process".to_string() });
        }
        let result = (|| {
            let pull = sync::pull(&self.store, &self.mirror, repo_name)?;
            let push = sync::push(&self.store, &self.mirror, &self.commit, repo_name)?;
            Ok::<_, KbaseError>((pull, push))
        })();
        sync_lock::release(&self.store)?;

        let (pull, push) = result?;
        let mut warnings = pull.warnings.clone();
        if pull.conflicts > 0 {
            warnings.push(format!("{} conflict(s) recorded as conflict-copy entries", pull.conflicts));
        }
        Ok(ToolEnvelope { results: vec![(pull, push)], warnings, ..ToolEnvelope::default() })
    }

    /// `sync_status` — whether the coordinator lock is held and whether a
    /// commit is queued.
    ///
    /// # Errors
    /// Returns a Store error on a database failure reading the lock row.
    pub fn sync_status(&self) -> Result<ToolEnvelope<SyncStatus>, KbaseError> {
        let lock_held = sync_lock::is_held(&self.store)?;
        let commit_pending = self.commit.has_pending();
        Ok(ToolEnvelope::ok(SyncStatus { lock_held, commit_pending }))
    }

    /// Runs the propagator when `before`/`after` differ in a content-relevant
    /// way, then mirrors `after` plus every bumped neighbor so peers see the
    /// updated score. Returns the (possibly further-mutated-by-reinforcement)
    /// entry and any warnings worth surfacing.
    fn propagate_and_mirror(&self, before: &Entry, after: Entry) -> Result<(Entry, Vec<String>), KbaseError> {
        let mut warnings = Vec::new();
        let content_changed = before.title != after.title
            || before.content != after.content
            || before.tags != after.tags
            || before.entry_type != after.entry_type
            || before.scope != after.scope
            || before.project != after.project
            || before.declaration != after.declaration
            || before.parent_page_id != after.parent_page_id;

        if !content_changed {
            self.mirror.write(Some(before), &after, &self.store.links_from(after.id)?)?;
            self.commit.schedule_commit(format!("update: {}", after.title));
            return Ok((after, warnings));
        }

        let diff = graph::diff_factor(before, &after);
        let bumped: BumpSet = graph::propagate(&self.store, after.id, diff)?;
        let refreshed =
            self.store.get(after.id)?.ok_or(KbaseError::NotFound { kind: "entry", id: after.id.to_string() })?;

        self.mirror.write(Some(before), &refreshed, &self.store.links_from(after.id)?)?;
        self.commit.schedule_commit(format!("update: {}", refreshed.title));

        let bumped_entries: Vec<Entry> = bumped.into_iter().filter_map(|id| self.store.get(id).transpose()).collect::<Result<_, _>>()?;
        for entry in &bumped_entries {
            if entry.needs_revalidation() {
                warnings.push(format!("{} flagged for revalidation", entry.id));
            }
        }
        self.mirror_bumped(&bumped_entries)?;

        Ok((refreshed, warnings))
    }

    fn mirror_bumped(&self, entries: &[Entry]) -> Result<(), KbaseError> {
        for entry in entries {
            self.mirror.write(Some(entry), entry, &self.store.links_from(entry.id)?)?;
        }
        if !entries.is_empty() {
            self.commit.schedule_commit("propagate inaccuracy".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoRoute;
    use crate::mirror::MirrorRepo;
    use kbase_git::{CommitInfo, GitOid, GitRepo, MergeOutcome, RefName, StatusEntry};

    struct NoopGit;
    impl GitRepo for NoopGit {
        fn read_ref(&self, _name: &RefName) -> Result<Option<GitOid>, kbase_git::GitError> {
            Ok(None)
        }
        fn rev_parse(&self, _spec: &str) -> Result<GitOid, kbase_git::GitError> {
            Ok(GitOid::ZERO)
        }
        fn rev_parse_opt(&self, _spec: &str) -> Result<Option<GitOid>, kbase_git::GitError> {
            Ok(None)
        }
        fn read_commit(&self, _oid: GitOid) -> Result<CommitInfo, kbase_git::GitError> {
            unimplemented!()
        }
        fn is_dirty(&self) -> Result<bool, kbase_git::GitError> {
            Ok(false)
        }
        fn status(&self) -> Result<Vec<StatusEntry>, kbase_git::GitError> {
            Ok(vec![])
        }
        fn stage_all(&self) -> Result<bool, kbase_git::GitError> {
            Ok(true)
        }
        fn commit(&self, _message: &str, _author: &str) -> Result<GitOid, kbase_git::GitError> {
            Ok(GitOid::ZERO)
        }
        fn fetch(&self, _remote: &str, _branch: &str) -> Result<Option<GitOid>, kbase_git::GitError> {
            Ok(None)
        }
        fn merge(&self, _their_oid: GitOid) -> Result<MergeOutcome, kbase_git::GitError> {
            Ok(MergeOutcome::AlreadyUpToDate)
        }
        fn checkout_paths_from(&self, _their_oid: GitOid, _paths: &[String]) -> Result<(), kbase_git::GitError> {
            Ok(())
        }
        fn push(&self, _remote: &str, _branch: &str) -> Result<(), kbase_git::GitError> {
            Ok(())
        }
        fn has_remote(&self, _remote: &str) -> Result<bool, kbase_git::GitError> {
            Ok(false)
        }
    }

    fn tools_with_one_repo(dir: &std::path::Path) -> Tools {
        let store = Store::open_in_memory().unwrap();
        let mirror = Arc::new(Mirror::new(vec![MirrorRepo {
            route: RepoRoute { name: "main".into(), path: dir.to_owned(), remote: None, scope: None, project: None },
            git: Box::new(NoopGit),
        }]));
        Tools::new(store, mirror)
    }

    fn sample_input() -> RememberInput {
        RememberInput {
            entry_type: "fact".into(),
            title: "Title".into(),
            content: "Body".into(),
            tags: vec!["rust".into()],
            declaration: None,
            scope: "repo".into(),
            project: None,
            parent_page_id: None,
            source: "agent".into(),
        }
    }

    #[test]
    fn remember_rejects_unknown_entry_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let mut input = sample_input();
        input.entry_type = "bogus".into();
        let err = tools.remember(input).unwrap_err();
        assert!(matches!(err, KbaseError::ValidationFailed { field, .. } if field == "entry_type"));
    }

    #[test]
    fn remember_rejects_empty_title() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let mut input = sample_input();
        input.title = "   ".into();
        let err = tools.remember(input).unwrap_err();
        assert!(matches!(err, KbaseError::ValidationFailed { field, .. } if field == "title"));
    }

    #[test]
    fn remember_writes_through_mirror() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let envelope = tools.remember(sample_input()).unwrap();
        let entry = &envelope.results[0];
        let path = dir.path().join(crate::serializer::filename(entry.entry_type, &entry.title, entry.id));
        assert!(path.exists());
    }

    #[test]
    fn update_with_content_change_propagates_to_linked_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let a = tools.remember(sample_input()).unwrap().results.remove(0);
        let mut b_input = sample_input();
        b_input.title = "Downstream".into();
        let b = tools.remember(b_input).unwrap().results.remove(0);
        tools.link(a.id, b.id, "derived", None).unwrap();

        let update = tools
            .update(a.id, UpdateInput { content: Some("totally different body now".into()), ..UpdateInput::default() })
            .unwrap();
        assert_eq!(update.results[0].inaccuracy, 0.0);

        let b_after = tools.store().get(b.id).unwrap().unwrap();
        assert!(b_after.inaccuracy > 0.0);
    }

    #[test]
    fn deprecate_rejects_empty_reason() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let entry = tools.remember(sample_input()).unwrap().results.remove(0);
        let err = tools.deprecate(entry.id, String::new()).unwrap_err();
        assert!(matches!(err, KbaseError::ValidationFailed { field, .. } if field == "reason"));
    }

    #[test]
    fn reinforce_resets_inaccuracy() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let entry = tools.remember(sample_input()).unwrap().results.remove(0);
        tools.store().set_inaccuracy(entry.id, 1.5).unwrap();
        let result = tools.reinforce(entry.id).unwrap();
        assert_eq!(result.results[0].inaccuracy, 0.0);
    }

    #[test]
    fn sync_status_reports_lock_and_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let tools = tools_with_one_repo(dir.path());
        let status = tools.sync_status().unwrap().results.remove(0);
        assert!(!status.lock_held);
        assert!(!status.commit_pending);
    }
}
