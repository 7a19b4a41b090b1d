//! The [`Link`] record: a directed, typed edge between two entries.

use chrono::{DateTime, Utc};

use super::ids::{EntryId, LinkId, LinkType};

/// A directed edge between two entries.
///
/// `conflicts_with` edges created by the sync engine are local-only and must
/// never appear in a mirrored file's frontmatter `links` array.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub source_id: EntryId,
    pub target_id: EntryId,
    pub link_type: LinkType,
    pub description: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// `true` if this edge must stay local-only and is never written to a
    /// mirrored frontmatter `links` array.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.link_type == LinkType::ConflictsWith || self.source == "sync:conflict"
    }

    /// Self-links are only valid for `conflicts_with`.
    #[must_use]
    pub fn is_valid_self_link(&self) -> bool {
        self.source_id != self.target_id || self.link_type == LinkType::ConflictsWith
    }
}

/// Fields accepted by [`crate::store::Store::insert_link`].
#[derive(Clone, Debug)]
pub struct NewLink {
    pub id: Option<LinkId>,
    pub source_id: EntryId,
    pub target_id: EntryId,
    pub link_type: LinkType,
    pub description: Option<String>,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(link_type: LinkType, source: &str) -> Link {
        Link {
            id: LinkId::new_random(),
            source_id: EntryId::new_random(),
            target_id: EntryId::new_random(),
            link_type,
            description: None,
            source: source.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conflicts_with_is_always_local_only() {
        assert!(sample(LinkType::ConflictsWith, "agent").is_local_only());
    }

    #[test]
    fn sync_conflict_source_is_local_only_regardless_of_type() {
        assert!(sample(LinkType::Related, "sync:conflict").is_local_only());
    }

    #[test]
    fn ordinary_link_is_mirrored() {
        assert!(!sample(LinkType::Derived, "agent").is_local_only());
    }

    #[test]
    fn self_link_valid_only_for_conflicts_with() {
        let mut l = sample(LinkType::Related, "agent");
        l.target_id = l.source_id;
        assert!(!l.is_valid_self_link());
        l.link_type = LinkType::ConflictsWith;
        assert!(l.is_valid_self_link());
    }
}
