//! Identity and closed-enum vocabulary shared by the Store, Graph, Searcher,
//! Serializer, and Mirror.
//!
//! [`EntryId`] and [`LinkId`] are validated newtypes over [`uuid::Uuid`],
//! following the same pattern as the workspace identifiers they're modeled
//! on: a private inner field, a validating constructor, `Display`/`FromStr`,
//! and `serde` via `try_from = "String"` so malformed IDs are rejected at
//! deserialization instead of deep inside a query.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error from parsing a string into an [`EntryId`] or [`LinkId`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdParseError {
    /// Which identifier kind failed to parse.
    pub kind: &'static str,
    /// The raw value that was rejected.
    pub value: String,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} {:?}: not a UUID", self.kind, self.value)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! uuid_newtype {
    ($name:ident, $kind:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID without validation (it is already a `Uuid`).
            #[must_use]
            pub const fn from_uuid(u: Uuid) -> Self {
                Self(u)
            }

            /// Return the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// First 8 hex characters, used as the on-disk filename
            /// disambiguator.
            #[must_use]
            pub fn short8(&self) -> String {
                self.0.simple().to_string()[..8].to_owned()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdParseError { kind: $kind, value: s.to_owned() })
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_newtype!(EntryId, "entry id");
uuid_newtype!(LinkId, "link id");

/// Namespace UUID used to derive deterministic link IDs so independently
/// created peers converge on the same edge identity. Fixed and never
/// regenerated — changing it would orphan every existing deterministic link.
const LINK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x62, 0x61, 0x73, 0x65, 0x2d, 0x6c, 0x69, 0x6e, 0x6b, 0x2d, 0x6e, 0x73, 0x00, 0x00, 0x00,
]);

impl LinkId {
    /// Compute the deterministic link id for an edge: `uuidv5(ns, source ∥
    /// target ∥ link_type)`. Two peers that independently create the "same"
    /// edge (same source, target, and type) always compute the same id.
    #[must_use]
    pub fn deterministic(source: EntryId, target: EntryId, link_type: LinkType) -> Self {
        let name = format!("{source}\u{2016}{target}\u{2016}{}", link_type.as_str());
        Self(Uuid::new_v5(&LINK_ID_NAMESPACE, name.as_bytes()))
    }
}

/// The kind of knowledge an [`crate::store::entry::Entry`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Convention,
    Decision,
    Pattern,
    Pitfall,
    Fact,
    DebugNote,
    Process,
    Wiki,
}

impl EntryType {
    /// Directory name under `entries/` this type mirrors to.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Convention => "convention",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Pitfall => "pitfall",
            Self::Fact => "fact",
            Self::DebugNote => "debug_note",
            Self::Process => "process",
            Self::Wiki => "wiki",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry is visible from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Company,
    Project,
    Repo,
}

impl Scope {
    /// Scopes included when searching at this scope: `repo` sees everything,
    /// `project` sees project+company, `company` sees only company.
    #[must_use]
    pub const fn visible_scopes(self) -> &'static [Self] {
        match self {
            Self::Repo => &[Self::Repo, Self::Project, Self::Company],
            Self::Project => &[Self::Project, Self::Company],
            Self::Company => &[Self::Company],
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Company => "company",
            Self::Project => "project",
            Self::Repo => "repo",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Deprecated,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

/// The type of a directed edge between two entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Related,
    Derived,
    Depends,
    Contradicts,
    Supersedes,
    Elaborates,
    ConflictsWith,
}

impl LinkType {
    /// Propagation weight applied at each hop through an edge of this type.
    #[must_use]
    pub const fn propagation_weight(self) -> f64 {
        match self {
            Self::Derived => 1.0,
            Self::Contradicts => 0.7,
            Self::Depends => 0.6,
            Self::Elaborates => 0.4,
            Self::Supersedes => 0.3,
            Self::Related => 0.1,
            Self::ConflictsWith => 0.0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Related => "related",
            Self::Derived => "derived",
            Self::Depends => "depends",
            Self::Contradicts => "contradicts",
            Self::Supersedes => "supersedes",
            Self::Elaborates => "elaborates",
            Self::ConflictsWith => "conflicts_with",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = IdParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "related" => Ok(Self::Related),
            "derived" => Ok(Self::Derived),
            "depends" => Ok(Self::Depends),
            "contradicts" => Ok(Self::Contradicts),
            "supersedes" => Ok(Self::Supersedes),
            "elaborates" => Ok(Self::Elaborates),
            "conflicts_with" => Ok(Self::ConflictsWith),
            _ => Err(IdParseError { kind: "link type", value: s.to_owned() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_roundtrips_through_string() {
        let id = EntryId::new_random();
        let s: String = id.into();
        let back: EntryId = s.parse().unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn entry_id_short8_is_8_hex_chars() {
        let id = EntryId::new_random();
        assert_eq!(id.short8().len(), 8);
        assert!(id.short8().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entry_id_rejects_non_uuid() {
        assert!("not-a-uuid".parse::<EntryId>().is_err());
    }

    #[test]
    fn deterministic_link_id_is_stable() {
        let a = EntryId::new_random();
        let b = EntryId::new_random();
        let id1 = LinkId::deterministic(a, b, LinkType::Derived);
        let id2 = LinkId::deterministic(a, b, LinkType::Derived);
        assert_eq!(id1, id2);
    }

    #[test]
    fn deterministic_link_id_varies_with_type() {
        let a = EntryId::new_random();
        let b = EntryId::new_random();
        let derived = LinkId::deterministic(a, b, LinkType::Derived);
        let related = LinkId::deterministic(a, b, LinkType::Related);
        assert_ne!(derived, related);
    }

    #[test]
    fn deterministic_link_id_is_directional() {
        let a = EntryId::new_random();
        let b = EntryId::new_random();
        let forward = LinkId::deterministic(a, b, LinkType::Related);
        let backward = LinkId::deterministic(b, a, LinkType::Related);
        assert_ne!(forward, backward);
    }

    #[test]
    fn scope_visibility_hierarchy() {
        assert_eq!(Scope::Repo.visible_scopes().len(), 3);
        assert_eq!(Scope::Project.visible_scopes().len(), 2);
        assert_eq!(Scope::Company.visible_scopes().len(), 1);
    }

    #[test]
    fn link_type_conflicts_with_has_zero_weight() {
        assert_eq!(LinkType::ConflictsWith.propagation_weight(), 0.0);
    }

    #[test]
    fn link_type_round_trips_via_display_and_from_str() {
        for lt in [
            LinkType::Related,
            LinkType::Derived,
            LinkType::Depends,
            LinkType::Contradicts,
            LinkType::Supersedes,
            LinkType::Elaborates,
            LinkType::ConflictsWith,
        ] {
            let s = lt.to_string();
            assert_eq!(s.parse::<LinkType>().unwrap(), lt);
        }
    }
}
