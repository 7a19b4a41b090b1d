//! The [`Entry`] record and the typed parameters used to create or mutate one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::ids::{EntryId, EntryType, Scope, Status};

/// The cap inaccuracy saturates at. Never exceeded, never negative.
pub const INACCURACY_CAP: f64 = 2.0;

/// Inaccuracy at or above this value means "needs revalidation".
pub const INACCURACY_THRESHOLD: f64 = 1.0;

/// A typed knowledge record.
///
/// `access_count`, `last_accessed_at`, `synced_version`, and `synced_at` are
/// local-only: they are never written to the mirrored Markdown file (see
/// [`crate::serializer`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub entry_type: EntryType,
    pub title: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub declaration: Option<String>,
    pub deprecation_reason: Option<String>,
    pub flag_reason: Option<String>,
    pub scope: Scope,
    pub project: Option<String>,
    pub parent_page_id: Option<EntryId>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub inaccuracy: f64,
    pub version: u64,
    pub synced_version: Option<u64>,
    pub synced_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// `true` if the entry is a conflict copy: local-only, title prefixed
    /// `[Sync Conflict]`, source `sync:conflict`. These must never be
    /// written to the git mirror.
    #[must_use]
    pub fn is_conflict_copy(&self) -> bool {
        self.title.starts_with("[Sync Conflict]") && self.source == "sync:conflict"
    }

    /// `true` if this entry's inaccuracy has crossed the revalidation
    /// threshold and it should be surfaced by default search filtering.
    #[must_use]
    pub fn needs_revalidation(&self) -> bool {
        self.inaccuracy >= INACCURACY_THRESHOLD
    }

    /// Clamp a candidate inaccuracy value into `[0, CAP]`.
    #[must_use]
    pub fn clamp_inaccuracy(v: f64) -> f64 {
        v.clamp(0.0, INACCURACY_CAP)
    }
}

/// Fields accepted by [`crate::store::Store::insert`].
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub entry_type: EntryType,
    pub title: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub declaration: Option<String>,
    pub scope: Scope,
    pub project: Option<String>,
    pub parent_page_id: Option<EntryId>,
    pub source: String,
}

/// A sparse set of field updates for [`crate::store::Store::update`].
///
/// Only `Some` fields are applied. If any applied field actually changes the
/// stored value, the entry's `version` is incremented.
#[derive(Clone, Debug, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub entry_type: Option<EntryType>,
    pub scope: Option<Scope>,
    pub project: Option<Option<String>>,
    pub declaration: Option<Option<String>>,
    pub parent_page_id: Option<Option<EntryId>>,
    pub status: Option<Status>,
    pub deprecation_reason: Option<Option<String>>,
    pub flag_reason: Option<Option<String>>,
    pub inaccuracy: Option<f64>,
}
