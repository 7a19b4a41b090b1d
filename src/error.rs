//! Error types for the knowledge base.
//!
//! Defines [`KbaseError`], the unified error type returned by the store,
//! graph, search, mirror, and sync modules. Error messages are designed to
//! be agent-friendly: each variant describes what went wrong and, where
//! possible, what to do about it.
//!
//! Git-level conflicts are intentionally absent from this enum — the sync
//! engine resolves them internally (remote always wins) and never surfaces
//! a `Conflict` error to a caller; see [`crate::sync`].

use std::fmt;
use std::path::PathBuf;

/// Unified error type for knowledge base operations.
#[derive(Debug)]
pub enum KbaseError {
    /// No entry or link matches the given identifier or short ID.
    NotFound {
        /// What kind of thing was being looked up (`"entry"`, `"link"`, ...).
        kind: &'static str,
        /// The identifier or short ID that did not resolve.
        id: String,
    },

    /// A short ID prefix matched more than one entry.
    Ambiguous {
        /// The short ID prefix that was queried.
        prefix: String,
        /// Full IDs of the matching entries.
        candidates: Vec<String>,
    },

    /// Input failed validation before being written to the store.
    ValidationFailed {
        /// The field that failed validation.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation could not proceed because the coordinator lock is held
    /// by another process and has not expired.
    Busy {
        /// Name of the resource the lock guards (typically the mirror path).
        resource: String,
        /// Identifier of the process currently holding the lock.
        holder: String,
    },

    /// An I/O error occurred (file system, process spawn, etc.).
    Io(std::io::Error),

    /// The embedded SQLite store returned an error.
    Store(rusqlite::Error),

    /// A git operation failed.
    Git(kbase_git::GitError),

    /// A configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// The configured embedding provider is unreachable or misconfigured.
    ///
    /// Never raised from [`crate::search`] directly — a provider outage
    /// there falls back to lexical-only ranking. Raised only when a caller
    /// explicitly requests a semantic-only operation (e.g. re-embedding a
    /// batch of entries) with no fallback available.
    ProviderUnavailable {
        /// Name of the embedding provider.
        provider: String,
        /// Underlying failure description.
        detail: String,
    },
}

impl fmt::Display for KbaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => {
                write!(f, "{kind} '{id}' not found.\n  To fix: check the ID with a `recall` search, or list recent entries.")
            }
            Self::Ambiguous { prefix, candidates } => {
                write!(f, "short ID '{prefix}' matches {} entries:", candidates.len())?;
                for c in candidates {
                    write!(f, "\n  - {c}")?;
                }
                write!(f, "\n  To fix: supply more characters of the ID.")
            }
            Self::ValidationFailed { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
            Self::Busy { resource, holder } => {
                write!(
                    f,
                    "'{resource}' is locked by '{holder}'.\n  To fix: wait for the current sync to finish, or check whether '{holder}' is still alive."
                )
            }
            Self::Io(err) => write!(f, "I/O error: {err}\n  To fix: check file permissions and disk space."),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Git(err) => write!(f, "git error: {err}"),
            Self::Config { path, detail } => {
                write!(f, "configuration error in '{}': {detail}", path.display())
            }
            Self::ProviderUnavailable { provider, detail } => {
                write!(f, "embedding provider '{provider}' unavailable: {detail}")
            }
        }
    }
}

impl std::error::Error for KbaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Git(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KbaseError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for KbaseError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err)
    }
}

impl From<kbase_git::GitError> for KbaseError {
    fn from(err: kbase_git::GitError) -> Self {
        Self::Git(err)
    }
}
