//! Debounced git commit scheduler.
//!
//! Tool operations write through the [`crate::mirror::Mirror`] immediately,
//! but a flurry of rapid-fire `remember`/`update` calls shouldn't each
//! produce their own commit. [`CommitScheduler`] batches them: every call to
//! [`CommitScheduler::schedule_commit`] resets a short timer, and only once
//! things go quiet does it actually stage and commit each touched repo —
//! the same coalesce-rapid-writes-into-one-commit shape as a debounced
//! filesystem watcher, adapted from a file-watcher debounce to a
//! write-call debounce.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::KbaseError;
use crate::mirror::Mirror;

/// How long to wait after the last write before committing.
pub const DEBOUNCE: Duration = Duration::from_millis(150);

/// The commit identity used for every kbase-authored commit.
const COMMIT_AUTHOR: &str = "kbase <kbase@local>";

struct Pending {
    /// Commit messages queued since the last fire, combined at commit time
    /// into one message: the first as headline, the rest as body.
    messages: Vec<String>,
    /// Handle of the in-flight debounce timer, if one is running.
    timer: Option<JoinHandle<()>>,
}

/// Batches mirror writes into debounced git commits.
///
/// Must be held behind an `Arc` — the debounce timer spawns a task that
/// calls back into the scheduler once it fires.
pub struct CommitScheduler {
    mirror: Arc<Mirror>,
    pending: Mutex<Pending>,
}

impl CommitScheduler {
    #[must_use]
    pub fn new(mirror: Arc<Mirror>) -> Arc<Self> {
        Arc::new(Self { mirror, pending: Mutex::new(Pending { messages: Vec::new(), timer: None }) })
    }

    /// Queue a commit message and (re)start the debounce timer. Called after
    /// every mirror write. Cheap and synchronous — the actual commit happens
    /// later on the tokio runtime.
    pub fn schedule_commit(self: &Arc<Self>, message: impl Into<String>) {
        let mut pending = self.pending.lock();
        pending.messages.push(message.into());
        if let Some(old_timer) = pending.timer.take() {
            old_timer.abort();
        }
        let this = Arc::clone(self);
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            this.fire();
        }));
    }

    /// Timer callback: take whatever is pending and commit it.
    fn fire(self: &Arc<Self>) {
        let messages = {
            let mut pending = self.pending.lock();
            pending.timer = None;
            std::mem::take(&mut pending.messages)
        };
        if messages.is_empty() {
            return;
        }
        // A debounce-timer commit failure is not actionable by any caller
        // (nothing is awaiting this task); the next `flush` or scheduled
        // commit will retry against the same touched-repo set next time
        // something changes, since failed commits don't clear `touched`.
        let _ = self.commit_now(&combine_messages(messages));
    }

    /// Commit immediately, skipping the debounce wait. No-op if nothing is
    /// pending. Cancels any running timer.
    ///
    /// # Errors
    /// Returns [`KbaseError::Git`] if staging or committing a touched repo
    /// fails.
    pub fn flush(self: &Arc<Self>) -> Result<(), KbaseError> {
        let (messages, timer) = {
            let mut pending = self.pending.lock();
            (std::mem::take(&mut pending.messages), pending.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if messages.is_empty() {
            return Ok(());
        }
        self.commit_now(&combine_messages(messages))
    }

    fn commit_now(&self, message: &str) -> Result<(), KbaseError> {
        for repo_name in self.mirror.take_touched() {
            let Some(git) = self.mirror.git(&repo_name) else { continue };
            if !git.stage_all()? {
                continue;
            }
            git.commit(message, COMMIT_AUTHOR)?;
        }
        Ok(())
    }

    /// `true` if a commit is queued but hasn't fired yet.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().messages.is_empty()
    }
}

/// Combine queued commit messages into one, with the first as the headline
/// (git's "subject") and the rest as the body, blank-line separated so
/// `%s`/`summary()` parsing finds the right split.
fn combine_messages(mut messages: Vec<String>) -> String {
    let headline = messages.remove(0);
    if messages.is_empty() {
        headline
    } else {
        format!("{headline}\n\n{}", messages.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{Mirror, MirrorRepo};
    use crate::config::RepoRoute;
    use kbase_git::{CommitInfo, GitOid, GitRepo, MergeOutcome, RefName, StatusEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGit {
        staged: AtomicUsize,
        committed: Arc<AtomicUsize>,
        last_message: Arc<Mutex<Option<String>>>,
    }

    impl GitRepo for CountingGit {
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
            Ok(true)
        }
        fn status(&self) -> Result<Vec<StatusEntry>, kbase_git::GitError> {
            Ok(vec![])
        }
        fn stage_all(&self) -> Result<bool, kbase_git::GitError> {
            self.staged.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        fn commit(&self, message: &str, _author: &str) -> Result<GitOid, kbase_git::GitError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            *self.last_message.lock() = Some(message.to_string());
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

    fn sample_entry() -> crate::store::Entry {
        use crate::store::{EntryId, EntryType, Scope, Status};
        use chrono::Utc;
        use std::collections::BTreeSet;
        crate::store::Entry {
            id: EntryId::new_random(),
            entry_type: EntryType::Fact,
            title: "Title".to_string(),
            content: "body".to_string(),
            tags: BTreeSet::new(),
            declaration: None,
            deprecation_reason: None,
            flag_reason: None,
            scope: Scope::Repo,
            project: None,
            parent_page_id: None,
            source: "agent".to_string(),
            created_at: Utc::now(),
            status: Status::Active,
            inaccuracy: 0.0,
            version: 1,
            synced_version: None,
            synced_at: None,
            access_count: 0,
            last_accessed_at: None,
            updated_at: Utc::now(),
        }
    }

    fn one_repo_mirror() -> (Arc<Mirror>, tempfile::TempDir) {
        let (mirror, dir, _committed, _last_message) = one_repo_mirror_with_handles();
        (mirror, dir)
    }

    fn one_repo_mirror_with_handles()
    -> (Arc<Mirror>, tempfile::TempDir, Arc<AtomicUsize>, Arc<Mutex<Option<String>>>) {
        let dir = tempfile::TempDir::new().unwrap();
        let committed = Arc::new(AtomicUsize::new(0));
        let last_message = Arc::new(Mutex::new(None));
        let mirror = Mirror::new(vec![MirrorRepo {
            route: RepoRoute {
                name: "main".into(),
                path: dir.path().to_owned(),
                remote: None,
                scope: None,
                project: None,
            },
            git: Box::new(CountingGit {
                staged: AtomicUsize::new(0),
                committed: Arc::clone(&committed),
                last_message: Arc::clone(&last_message),
            }),
        }]);
        (Arc::new(mirror), dir, committed, last_message)
    }

    #[tokio::test]
    async fn flush_is_a_noop_with_nothing_pending() {
        let (mirror, _dir) = one_repo_mirror();
        let scheduler = CommitScheduler::new(mirror);
        assert!(!scheduler.has_pending());
        scheduler.flush().unwrap();
    }

    #[tokio::test]
    async fn schedule_then_flush_commits_touched_repos() {
        let (mirror, _dir) = one_repo_mirror();
        mirror.write(None, &sample_entry(), &[]).unwrap();
        let scheduler = CommitScheduler::new(mirror);
        scheduler.schedule_commit("remembered something");
        assert!(scheduler.has_pending());
        scheduler.flush().unwrap();
        assert!(!scheduler.has_pending());
    }

    /// Three rapid writes each schedule a commit, but debouncing collapses
    /// them into one, with `m1` as the headline and `m2`/`m3` folded into
    /// the body.
    #[tokio::test]
    async fn three_scheduled_commits_collapse_into_one() {
        let (mirror, _dir, committed, last_message) = one_repo_mirror_with_handles();
        mirror.write(None, &sample_entry(), &[]).unwrap();
        let scheduler = CommitScheduler::new(mirror);

        scheduler.schedule_commit("m1");
        scheduler.schedule_commit("m2");
        scheduler.schedule_commit("m3");
        scheduler.flush().unwrap();

        assert_eq!(committed.load(Ordering::SeqCst), 1);
        let message = last_message.lock().clone().unwrap();
        let mut lines = message.lines();
        assert_eq!(lines.next(), Some("m1"));
        let body: Vec<&str> = lines.collect();
        assert!(body.iter().any(|l| *l == "m2"));
        assert!(body.iter().any(|l| *l == "m3"));
    }

    #[test]
    fn combine_messages_single_is_unchanged() {
        assert_eq!(combine_messages(vec!["only".to_string()]), "only");
    }

    #[test]
    fn combine_messages_separates_headline_from_body() {
        let combined = combine_messages(vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]);
        assert_eq!(combined, "m1\n\nm2\nm3");
    }
}
