//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by all [`GitRepo`](crate::GitRepo)
//! trait methods. It uses rich enum variants so callers can match on specific
//! failure modes (missing ref, dirty worktree, rejected push, merge conflict)
//! without parsing error strings.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`GitRepo`](crate::GitRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested object, ref, or path was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A ref update failed because the ref's current value did not match the
    /// expected old value (compare-and-swap failure).
    #[error("ref conflict on `{ref_name}`: {message}")]
    RefConflict {
        /// The ref that could not be updated.
        ref_name: String,
        /// Details about the mismatch.
        message: String,
    },

    /// An operation was refused because the working tree has uncommitted changes.
    #[error("dirty worktree at {}: {message}", path.display())]
    DirtyWorktree {
        /// Path to the worktree root.
        path: PathBuf,
        /// What was dirty (untracked files, staged changes, etc.).
        message: String,
    },

    /// An OID string could not be parsed or was otherwise invalid.
    #[error("invalid OID `{value}`: {reason}")]
    InvalidOid {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// An I/O error occurred (file system, process spawn, etc.).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No remote is configured under the given name.
    #[error("no remote named `{remote}`")]
    NoRemote {
        /// The remote name that was looked up.
        remote: String,
    },

    /// A fetch from a remote failed.
    #[error("fetch from `{remote}` failed: {message}")]
    FetchFailed {
        /// The remote name (e.g., `"origin"`).
        remote: String,
        /// Details about the failure.
        message: String,
    },

    /// A push to a remote was rejected or failed.
    #[error("push to `{remote}` failed: {message}")]
    PushFailed {
        /// The remote name (e.g., `"origin"`).
        remote: String,
        /// Details about the failure.
        message: String,
    },

    /// A merge produced file-level conflicts that could not be resolved
    /// automatically by the configured merge strategy.
    #[error("merge conflict on {} path(s): {paths:?}", paths.len())]
    MergeConflict {
        /// Paths left in a conflicted state.
        paths: Vec<PathBuf>,
    },

    /// The underlying git backend (gix, CLI fallback) returned an
    /// unclassified error. The `message` should include enough context to
    /// diagnose the failure.
    #[error("git backend error: {message}")]
    BackendError {
        /// Freeform error description from the backend.
        message: String,
    },
}
