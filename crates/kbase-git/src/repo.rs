//! The [`GitRepo`] trait — the single interface through which kbase touches git.
//!
//! No other kbase crate should import gix (or shell out to `git`) directly;
//! instead, they depend on `kbase-git` and program against this trait.

use crate::error::GitError;
use crate::types::{CommitInfo, GitOid, MergeOutcome, RefName, StatusEntry};

/// Abstracts every git operation the knowledge base mirror and sync engine
/// need, so the rest of kbase never touches a git backend directly.
///
/// Implementations are expected to operate on a single working tree rooted at
/// the path they were opened with. Methods that mutate the working tree or
/// index are not required to be safe to call concurrently from multiple
/// threads against the same `GitRepo` instance — callers serialize access to
/// a given mirror repo through the coordinator lock.
pub trait GitRepo: Send + Sync {
    // === Refs ===

    /// Read the OID a ref currently points to, or `None` if it does not exist.
    fn read_ref(&self, name: &RefName) -> Result<Option<GitOid>, GitError>;

    /// Resolve a revision spec (branch name, `HEAD`, short OID, etc.) to an OID.
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError>;

    /// Like [`rev_parse`](Self::rev_parse) but returns `None` instead of an
    /// error when the spec does not resolve (e.g. an empty repository).
    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError>;

    /// Read the commit a given OID names.
    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError>;

    // === Working tree ===

    /// Return `true` if the working tree has any uncommitted change
    /// (staged, unstaged, or untracked).
    fn is_dirty(&self) -> Result<bool, GitError>;

    /// List the working tree's status relative to HEAD.
    fn status(&self) -> Result<Vec<StatusEntry>, GitError>;

    /// Stage every change in the working tree (equivalent to `git add -A`).
    ///
    /// Returns `true` if anything was newly staged, `false` if the index
    /// already matched the working tree.
    fn stage_all(&self) -> Result<bool, GitError>;

    /// Commit the current index as a new commit on top of HEAD (or as the
    /// root commit if the repository has no history yet), updating HEAD.
    ///
    /// Returns an error if the index is empty relative to HEAD — callers
    /// should check [`stage_all`](Self::stage_all)'s return value first.
    fn commit(&self, message: &str, author: &str) -> Result<GitOid, GitError>;

    // === Network ===

    /// Fetch the current state of `branch` from `remote` into `FETCH_HEAD`,
    /// returning its OID. Returns `Ok(None)` if the remote branch does not
    /// exist yet (e.g. first push to a fresh repository).
    fn fetch(&self, remote: &str, branch: &str) -> Result<Option<GitOid>, GitError>;

    /// Merge a previously fetched OID into the current branch with
    /// `--no-rebase --allow-unrelated-histories` semantics. Implementations
    /// report conflicts rather than resolving them; the conflict policy
    /// lives above this trait.
    fn merge(&self, their_oid: GitOid) -> Result<MergeOutcome, GitError>;

    /// Overwrite every path in `paths` in the working tree with the version
    /// from `their_oid`. Callers are expected to follow up with
    /// [`stage_all`](Self::stage_all) to pick the change up into the index.
    /// Used to implement "remote always wins" conflict resolution after a
    /// [`merge`](Self::merge) reports [`MergeOutcome::Conflicted`].
    fn checkout_paths_from(&self, their_oid: GitOid, paths: &[String]) -> Result<(), GitError>;

    /// Push `branch` to `remote`, creating the remote branch and an upstream
    /// tracking relationship if it does not already exist.
    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Return `true` if a remote by this name is configured.
    fn has_remote(&self, remote: &str) -> Result<bool, GitError>;
}
