//! Bidirectional mapping between an [`Entry`] (plus its outgoing links) and
//! its on-disk Markdown+YAML representation.
//!
//! Parsing is strict: unknown enum values, malformed UUIDs, and anything
//! that would violate a store invariant is rejected rather than coerced —
//! validate everything dynamic-language-shaped before it touches typed
//! state, the same posture any reader of untrusted on-disk bytes has to
//! take.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KbaseError;
use crate::store::{Entry, EntryId, EntryType, Link, LinkId, LinkType, Scope, Status};

const FRONTMATTER_DELIM: &str = "---";

/// A link as it appears in a frontmatter `links:` array — just enough to
/// recompute its deterministic id on import.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RawLink {
    target: String,
    #[serde(rename = "type")]
    link_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawFrontMatter {
    id: String,
    #[serde(rename = "type")]
    entry_type: String,
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    scope: String,
    source: String,
    status: String,
    created_at: String,
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    declaration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deprecation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flag_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inaccuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    links: Vec<RawLink>,
}

/// A link parsed out of a peer's frontmatter `links:` array, with its
/// deterministic id already computed for link reconciliation on pull.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLink {
    pub id: LinkId,
    pub target: EntryId,
    pub link_type: LinkType,
    pub description: Option<String>,
}

/// An entry's shared fields as read off disk, plus its declared outgoing
/// links. Local-only fields (`access_count`, `synced_*`, ...) have no
/// on-disk representation and are not part of this type.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEntry {
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
    pub links: Vec<ParsedLink>,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Build the deterministic, lowercase, hyphen-joined slug for a title:
/// non-alphanumeric runs collapse to a single hyphen, capped at 80
/// characters, never empty.
#[must_use]
pub fn slug(title: &str) -> String {
    let mut out = String::new();
    let mut pending_hyphen = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }
    if out.len() > 80 {
        out.truncate(80);
        while out.ends_with('-') {
            out.pop();
        }
    }
    if out.is_empty() {
        "entry".to_string()
    } else {
        out
    }
}

/// The path (relative to the mirror repo root) an entry's current title and
/// type resolve to: `entries/{type}/{slug}_{id8}.md`.
#[must_use]
pub fn filename(entry_type: EntryType, title: &str, id: EntryId) -> String {
    format!("entries/{}/{}_{}.md", entry_type.as_str(), slug(title), id.short8())
}

/// Body of a redirect marker left at a former path after a title rename.
/// `new_basename` is relative to `entries/{type}/`, i.e. just the file's
/// basename.
#[must_use]
pub fn redirect_body(new_basename: &str) -> String {
    format!("Moved to: {new_basename}\n")
}

/// If `content` is a redirect marker, return the basename it points to.
/// Readers must recognize and skip these rather than treating them as
/// entries.
#[must_use]
pub fn parse_redirect(content: &str) -> Option<&str> {
    if content.trim_start().starts_with(FRONTMATTER_DELIM) {
        return None;
    }
    content.trim_end().strip_prefix("Moved to: ")
}

/// Serialize an entry plus its non-local-only outgoing links into the
/// Markdown+YAML frontmatter form written to the mirror repo.
///
/// # Errors
/// Returns [`KbaseError::Io`]-shaped errors only in the sense that YAML
/// emission is infallible for this closed type set; included for symmetry
/// with [`parse`] and to leave room for future frontmatter fields that
/// could fail to serialize.
pub fn serialize(entry: &Entry, outgoing_links: &[Link]) -> Result<String, KbaseError> {
    let links: Vec<RawLink> = outgoing_links
        .iter()
        .filter(|l| !l.is_local_only())
        .map(|l| RawLink {
            target: l.target_id.to_string(),
            link_type: l.link_type.as_str().to_string(),
            description: l.description.clone(),
        })
        .collect();

    let fm = RawFrontMatter {
        id: entry.id.to_string(),
        entry_type: entry.entry_type.as_str().to_string(),
        title: entry.title.clone(),
        tags: entry.tags.iter().cloned().collect(),
        project: entry.project.clone(),
        scope: entry.scope.to_string(),
        source: entry.source.clone(),
        status: entry.status.to_string(),
        created_at: entry.created_at.to_rfc3339(),
        version: entry.version,
        declaration: entry.declaration.clone(),
        parent_page_id: entry.parent_page_id.map(|p| p.to_string()),
        deprecation_reason: entry.deprecation_reason.clone(),
        flag_reason: entry.flag_reason.clone(),
        inaccuracy: if entry.inaccuracy == 0.0 { None } else { Some(round3(entry.inaccuracy)) },
        links,
    };

    let yaml = serde_yaml::to_string(&fm)
        .map_err(|e| KbaseError::ValidationFailed { field: "frontmatter".into(), reason: e.to_string() })?;
    Ok(format!("{FRONTMATTER_DELIM}\n{yaml}{FRONTMATTER_DELIM}\n{}", entry.content))
}

/// Strictly parse a mirrored Markdown+frontmatter file.
///
/// # Errors
/// Returns [`KbaseError::ValidationFailed`] if the file has no frontmatter
/// block, the YAML doesn't parse, an enum value is unrecognized, an id
/// isn't a valid UUID, or a `links[*].target` isn't a valid UUID.
pub fn parse(content: &str) -> Result<ParsedEntry, KbaseError> {
    let rest = content.strip_prefix(FRONTMATTER_DELIM).ok_or_else(|| bad("missing frontmatter delimiter"))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find(&format!("\n{FRONTMATTER_DELIM}")).ok_or_else(|| bad("unterminated frontmatter block"))?;
    let yaml_block = &rest[..end];
    let body = &rest[end + 1 + FRONTMATTER_DELIM.len()..];
    let body = body.strip_prefix('\n').unwrap_or(body);

    let fm: RawFrontMatter =
        serde_yaml::from_str(yaml_block).map_err(|e| bad(&format!("invalid frontmatter YAML: {e}")))?;

    let id: EntryId = fm.id.parse().map_err(|_| bad(&format!("invalid entry id {:?}", fm.id)))?;
    let entry_type = parse_entry_type(&fm.entry_type)?;
    let scope = parse_scope(&fm.scope)?;
    let status = parse_status(&fm.status)?;
    let created_at = DateTime::parse_from_rfc3339(&fm.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| bad(&format!("invalid created_at {:?}", fm.created_at)))?;
    let parent_page_id = fm
        .parent_page_id
        .map(|s| s.parse::<EntryId>().map_err(|_| bad(&format!("invalid parent_page_id {s:?}"))))
        .transpose()?;

    let mut links = Vec::with_capacity(fm.links.len());
    for raw in fm.links {
        let target: EntryId =
            raw.target.parse().map_err(|_| bad(&format!("invalid link target {:?}", raw.target)))?;
        let link_type = parse_link_type(&raw.link_type)?;
        let link_id = LinkId::deterministic(id, target, link_type);
        links.push(ParsedLink { id: link_id, target, link_type, description: raw.description });
    }

    Ok(ParsedEntry {
        id,
        entry_type,
        title: fm.title,
        content: body.to_string(),
        tags: fm.tags.into_iter().collect(),
        declaration: fm.declaration,
        deprecation_reason: fm.deprecation_reason,
        flag_reason: fm.flag_reason,
        scope,
        project: fm.project,
        parent_page_id,
        source: fm.source,
        created_at,
        status,
        inaccuracy: fm.inaccuracy.unwrap_or(0.0),
        version: fm.version,
        links,
    })
}

fn bad(reason: &str) -> KbaseError {
    KbaseError::ValidationFailed { field: "frontmatter".into(), reason: reason.to_string() }
}

pub(crate) fn parse_entry_type(s: &str) -> Result<EntryType, KbaseError> {
    match s {
        "convention" => Ok(EntryType::Convention),
        "decision" => Ok(EntryType::Decision),
        "pattern" => Ok(EntryType::Pattern),
        "pitfall" => Ok(EntryType::Pitfall),
        "fact" => Ok(EntryType::Fact),
        "debug_note" => Ok(EntryType::DebugNote),
        "process" => Ok(EntryType::Process),
        "wiki" => Ok(EntryType::Wiki),
        other => Err(bad(&format!("unknown entry type {other:?}"))),
    }
}

pub(crate) fn parse_scope(s: &str) -> Result<Scope, KbaseError> {
    match s {
        "company" => Ok(Scope::Company),
        "project" => Ok(Scope::Project),
        "repo" => Ok(Scope::Repo),
        other => Err(bad(&format!("unknown scope {other:?}"))),
    }
}

pub(crate) fn parse_status(s: &str) -> Result<Status, KbaseError> {
    match s {
        "active" => Ok(Status::Active),
        "deprecated" => Ok(Status::Deprecated),
        other => Err(bad(&format!("unknown status {other:?}"))),
    }
}

pub(crate) fn parse_link_type(s: &str) -> Result<LinkType, KbaseError> {
    s.parse().map_err(|_| bad(&format!("unknown link type {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry {
            id: EntryId::new_random(),
            entry_type: EntryType::Pitfall,
            title: "Don't Use `unwrap` In Handlers!".to_string(),
            content: "Body text.".to_string(),
            tags: ["rust".to_string(), "errors".to_string()].into_iter().collect(),
            declaration: None,
            deprecation_reason: None,
            flag_reason: None,
            scope: Scope::Project,
            project: Some("web".to_string()),
            parent_page_id: None,
            source: "agent".to_string(),
            created_at: Utc::now(),
            status: Status::Active,
            inaccuracy: 0.0,
            version: 1,
            synced_version: None,
            synced_at: None,
            access_count: 5,
            last_accessed_at: Some(Utc::now()),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn slug_lowercases_and_hyphenates() {
        assert_eq!(slug("Don't Use `unwrap` In Handlers!"), "don-t-use-unwrap-in-handlers");
    }

    #[test]
    fn slug_caps_at_80_chars_and_never_empty() {
        let long = "word ".repeat(40);
        assert!(slug(&long).len() <= 80);
        assert_eq!(slug("!!!"), "entry");
    }

    #[test]
    fn filename_matches_expected_shape() {
        let id = EntryId::new_random();
        let name = filename(EntryType::Fact, "Hello World", id);
        assert_eq!(name, format!("entries/fact/hello-world_{}.md", id.short8()));
    }

    #[test]
    fn redirect_round_trip() {
        let body = redirect_body("bar_ab12cd34.md");
        assert_eq!(parse_redirect(&body), Some("bar_ab12cd34.md"));
    }

    #[test]
    fn frontmatter_file_is_not_mistaken_for_redirect() {
        let text = "---\nid: x\n---\nbody";
        assert_eq!(parse_redirect(text), None);
    }

    #[test]
    fn serialize_omits_local_only_and_zero_inaccuracy() {
        let e = sample_entry();
        let text = serialize(&e, &[]).unwrap();
        assert!(!text.contains("access_count"));
        assert!(!text.contains("last_accessed_at"));
        assert!(!text.contains("synced_"));
        assert!(!text.contains("inaccuracy"));
    }

    #[test]
    fn serialize_rounds_and_includes_nonzero_inaccuracy() {
        let mut e = sample_entry();
        e.inaccuracy = 1.23456;
        let text = serialize(&e, &[]).unwrap();
        assert!(text.contains("1.235"));
    }

    #[test]
    fn parse_round_trips_shared_fields() {
        let e = sample_entry();
        let text = serialize(&e, &[]).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.id, e.id);
        assert_eq!(parsed.title, e.title);
        assert_eq!(parsed.content, e.content);
        assert_eq!(parsed.tags, e.tags);
        assert_eq!(parsed.scope, e.scope);
        assert_eq!(parsed.project, e.project);
        assert_eq!(parsed.version, e.version);
    }

    #[test]
    fn parse_rejects_unknown_enum_values() {
        let text = "---\nid: 6a9a1f2c-6e8b-4d2a-9d1a-0a2b3c4d5e6f\ntype: bogus\ntitle: x\nscope: repo\nsource: agent\nstatus: active\ncreated_at: 2024-01-01T00:00:00Z\nversion: 1\n---\nbody";
        assert!(parse(text).is_err());
    }

    #[test]
    fn parse_rejects_invalid_uuid() {
        let text = "---\nid: not-a-uuid\ntype: fact\ntitle: x\nscope: repo\nsource: agent\nstatus: active\ncreated_at: 2024-01-01T00:00:00Z\nversion: 1\n---\nbody";
        assert!(parse(text).is_err());
    }

    #[test]
    fn parse_computes_deterministic_link_ids() {
        let source = EntryId::new_random();
        let target = EntryId::new_random();
        let text = format!(
            "---\nid: {source}\ntype: fact\ntitle: x\nscope: repo\nsource: agent\nstatus: active\ncreated_at: 2024-01-01T00:00:00Z\nversion: 1\nlinks:\n- target: {target}\n  type: related\n---\nbody"
        );
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.links.len(), 1);
        assert_eq!(parsed.links[0].id, LinkId::deterministic(source, target, LinkType::Related));
    }

    #[test]
    fn serialize_skips_local_only_links() {
        let e = sample_entry();
        let conflict_link = Link {
            id: LinkId::new_random(),
            source_id: e.id,
            target_id: EntryId::new_random(),
            link_type: LinkType::ConflictsWith,
            description: None,
            source: "sync:conflict".to_string(),
            created_at: Utc::now(),
        };
        let text = serialize(&e, std::slice::from_ref(&conflict_link)).unwrap();
        assert!(!text.contains("conflicts_with"));
    }
}
