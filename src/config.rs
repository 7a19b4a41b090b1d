//! Operator-facing configuration: the process-level TOML config and the
//! per-repo JSON routing table.
//!
//! Two distinct files are involved:
//!
//! - [`KbaseConfig`] (`kbase.toml`) — the index path, sync interval, and
//!   embedding provider selection. Missing file → all defaults.
//! - [`RoutingConfig`] (`routing.json`, referenced from `[sync]`) — the list
//!   of mirror repos and the scope/project filters that route an entry to
//!   one of them. Missing file → an empty routing table (not an error —
//!   routing can legitimately be configured after the index exists).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::store::ids::Scope;

// ---------------------------------------------------------------------------
// KbaseConfig
// ---------------------------------------------------------------------------

/// Top-level operator configuration, parsed from `kbase.toml`.
///
/// Missing fields use sensible defaults. A missing file is not an error —
/// [`KbaseConfig::load`] returns [`KbaseConfig::default`].
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct KbaseConfig {
    /// Local index settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Sync engine settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Local index (store) settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the SQLite index file.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { index_path: default_index_path() }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("kbase.sqlite3")
}

/// Sync engine settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Path to the routing config (`{"repos": [...]}`). Mutually exclusive
    /// with `repo` in practice, but both are accepted here and resolved by
    /// the caller: `repo` is sugar for a single catch-all repo when an
    /// operator doesn't need multiple routed mirrors.
    #[serde(default)]
    pub routing_path: Option<PathBuf>,

    /// Shorthand: a single repo path used as the catch-all mirror when no
    /// `routing_path` is given.
    #[serde(default)]
    pub repo: Option<PathBuf>,

    /// Periodic sync interval in seconds. `0` disables periodic sync.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Coordinator lock TTL in seconds, after which a dead holder's lock can
    /// be stolen.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            routing_path: None,
            repo: None,
            interval_secs: default_interval_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_lock_ttl_secs() -> u64 {
    90
}

/// Embedding provider selection. The HTTP client itself is an external
/// collaborator; this only records which provider, if any, the Searcher
/// should expect embeddings from.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Provider name, or `None` to run lexical-only.
    #[serde(default)]
    pub provider: Option<String>,

    /// Vector dimensionality, required when `provider` is set.
    #[serde(default)]
    pub dim: Option<u32>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { provider: None, dim: None }
    }
}

// ---------------------------------------------------------------------------
// RoutingConfig
// ---------------------------------------------------------------------------

/// A single mirror repo and the filters that route entries to it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoRoute {
    /// Operator-facing name for logs and error messages.
    pub name: String,
    /// Path to the repo's working directory.
    pub path: PathBuf,
    /// Remote name to fetch/push (e.g. `"origin"`). Repos with no remote are
    /// local-only and are never synced, only mirrored to.
    #[serde(default)]
    pub remote: Option<String>,
    /// Only entries at this scope or narrower route here.
    #[serde(default)]
    pub scope: Option<Scope>,
    /// Only entries in this project route here.
    #[serde(default)]
    pub project: Option<String>,
}

/// The routing table: an ordered list of repos checked in order, the last
/// unfiltered entry acting as the catch-all.
///
/// Parsed from the JSON file named by [`SyncConfig::routing_path`]. See
/// [`crate::mirror::resolve_route`] for the resolution algorithm.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Ordered list of routes.
    #[serde(default)]
    pub repos: Vec<RepoRoute>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if available.
    pub path: Option<PathBuf>,
    /// Human-readable message, with line-level detail for TOML when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl KbaseConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error — returns [`KbaseConfig::default`].
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O errors other than not-found, or on
    /// invalid/unknown-field TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })
    }
}

impl RoutingConfig {
    /// Load the routing table from a JSON file.
    ///
    /// A missing file is not an error — returns an empty routing table, since
    /// an operator may configure mirrors after the index already exists.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O errors other than not-found, or on
    /// malformed JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        serde_json::from_str(&contents).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
