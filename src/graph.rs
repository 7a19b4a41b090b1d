//! The Graph / Propagator: spreads inaccuracy through the typed link graph
//! when an entry's content changes, and flags superseded entries.
//!
//! The BFS below walks forward along outgoing edges from the changed entry —
//! `A --derived--> B --depends--> C` means updating `A` bumps `B` then `C`.
//! It is implemented iteratively with an explicit queue and visited set
//! rather than recursively, so a deep or cyclic link graph can't blow the
//! stack.

use std::collections::{HashSet, VecDeque};

use crate::error::KbaseError;
use crate::store::{Entry, EntryId, EntryUpdate, LinkType, Status, Store, INACCURACY_CAP};

/// Bumps below this are not worth propagating further; stops a branch of the
/// BFS.
const FLOOR: f64 = 0.001;

/// Multiplicative decay applied at every hop, on top of the edge's own
/// [`LinkType::propagation_weight`].
const HOP_DECAY: f64 = 0.5;

/// The set of entries whose `inaccuracy` changed during one propagation call.
pub type BumpSet = Vec<EntryId>;

/// Compute the diff factor `d ∈ [0, 1]` for a content-relevant edit.
///
/// A weighted blend of changed-character ratio in `content` (dominant),
/// changed-character ratio in `title`, and Jaccard distance between the old
/// and new tag sets. A pure function of `before`/`after` — identical inputs
/// always give identical outputs.
#[must_use]
pub fn diff_factor(before: &Entry, after: &Entry) -> f64 {
    let content_d = changed_char_ratio(&before.content, &after.content);
    let title_d = changed_char_ratio(&before.title, &after.title);
    let tag_d = jaccard_distance(&before.tags, &after.tags);
    (content_d * 0.7 + title_d * 0.15 + tag_d * 0.15).clamp(0.0, 1.0)
}

/// Ratio of characters that differ between `a` and `b`, relative to the
/// longer string. Trims the common prefix and suffix first so a small edit
/// in the middle of a long document scores small, not 1.0.
fn changed_char_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..].iter().rev().zip(b[prefix..].iter().rev()).take_while(|(x, y)| x == y).count();
    let a_mid = a.len() - prefix - suffix;
    let b_mid = b.len() - prefix - suffix;
    let changed = a_mid.max(b_mid);
    let denom = a.len().max(b.len()).max(1);
    changed as f64 / denom as f64
}

/// Jaccard distance (`1 - |intersection| / |union|`) between two tag sets.
/// Two empty sets are considered identical (distance 0).
fn jaccard_distance(a: &std::collections::BTreeSet<String>, b: &std::collections::BTreeSet<String>) -> f64 {
    let union: HashSet<&String> = a.union(b).collect();
    if union.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    1.0 - (intersection as f64 / union.len() as f64)
}

/// Run the propagator after a content-relevant update to `changed`.
///
/// Reinforces `changed` itself to `inaccuracy = 0` (the explicit edit is, by
/// definition, now accurate), then spreads `diff` outward as a bounded BFS
/// over outgoing links, saturating each reached entry's inaccuracy to
/// [`INACCURACY_CAP`]. Deprecated entries are bumped but not expanded
/// further. Returns every entry whose inaccuracy changed, excluding
/// `changed` itself.
///
/// # Errors
/// Returns [`KbaseError::NotFound`] if `changed` does not exist, or
/// [`KbaseError::Store`] on a database error.
pub fn propagate(store: &Store, changed: EntryId, diff: f64) -> Result<BumpSet, KbaseError> {
    store.reset_inaccuracy(changed)?;

    let mut visited: HashSet<EntryId> = HashSet::new();
    visited.insert(changed);
    let mut queue: VecDeque<(EntryId, f64)> = VecDeque::new();
    queue.push_back((changed, diff));
    let mut bumped = BumpSet::new();

    while let Some((node, bump)) = queue.pop_front() {
        let is_root = node == changed;
        if !is_root {
            let entry = store.get(node)?.ok_or(KbaseError::NotFound { kind: "entry", id: node.to_string() })?;
            let new_value = (entry.inaccuracy + bump).min(INACCURACY_CAP).max(0.0);
            store.set_inaccuracy(node, new_value)?;
            bumped.push(node);
            if entry.status == Status::Deprecated {
                continue;
            }
        }

        for link in store.links_from(node)? {
            if link.link_type == LinkType::ConflictsWith {
                continue;
            }
            let next_bump = bump * link.link_type.propagation_weight() * HOP_DECAY;
            if next_bump < FLOOR {
                continue;
            }
            if !visited.insert(link.target_id) {
                continue;
            }
            queue.push_back((link.target_id, next_bump));
        }
    }

    Ok(bumped)
}

/// Flag `target` as needing revalidation because `source` now supersedes it.
/// Bumps `target`'s inaccuracy by 1.0 (saturating to
/// [`INACCURACY_CAP`], always crossing [`crate::store::INACCURACY_THRESHOLD`])
/// and records `flag_reason`.
///
/// # Errors
/// Returns [`KbaseError::NotFound`] if either entry does not exist.
pub fn flag_superseded(store: &Store, source: EntryId, target: EntryId) -> Result<(), KbaseError> {
    let source_entry = store.get(source)?.ok_or(KbaseError::NotFound { kind: "entry", id: source.to_string() })?;
    let target_entry = store.get(target)?.ok_or(KbaseError::NotFound { kind: "entry", id: target.to_string() })?;
    let new_inaccuracy = (target_entry.inaccuracy + 1.0).min(INACCURACY_CAP);
    store.update(
        target,
        EntryUpdate {
            inaccuracy: Some(new_inaccuracy),
            flag_reason: Some(Some(format!("superseded by {}", source_entry.title))),
            ..EntryUpdate::default()
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryType, NewEntry, NewLink, Scope};
    use std::collections::BTreeSet;

    fn entry(store: &Store, title: &str) -> Entry {
        store
            .insert(NewEntry {
                entry_type: EntryType::Fact,
                title: title.to_string(),
                content: "x".repeat(20),
                tags: BTreeSet::new(),
                declaration: None,
                scope: Scope::Repo,
                project: None,
                parent_page_id: None,
                source: "agent".to_string(),
            })
            .unwrap()
    }

    fn link(store: &Store, from: EntryId, to: EntryId, link_type: LinkType) {
        store
            .insert_link(NewLink {
                id: None,
                source_id: from,
                target_id: to,
                link_type,
                description: None,
                source: "agent".into(),
            })
            .unwrap();
    }

    #[test]
    fn diff_factor_is_zero_for_identical_entries() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        assert_eq!(diff_factor(&a, &a), 0.0);
    }

    #[test]
    fn diff_factor_is_deterministic() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let mut b = a.clone();
        b.content = "completely different text here".to_string();
        assert_eq!(diff_factor(&a, &b), diff_factor(&a, &b));
    }

    #[test]
    fn propagation_decay_matches_seed_scenario() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        let c = entry(&store, "C");
        link(&store, a.id, b.id, LinkType::Derived);
        link(&store, b.id, c.id, LinkType::Depends);

        let bumped = propagate(&store, a.id, 1.0).unwrap();
        assert!(bumped.contains(&b.id));
        assert!(bumped.contains(&c.id));

        let b_after = store.get(b.id).unwrap().unwrap();
        let c_after = store.get(c.id).unwrap().unwrap();
        assert!((b_after.inaccuracy - 0.5).abs() < 1e-9);
        assert!((c_after.inaccuracy - 0.15).abs() < 1e-9);
        assert!(!b_after.needs_revalidation());
        assert!(!c_after.needs_revalidation());

        let a_after = store.get(a.id).unwrap().unwrap();
        assert_eq!(a_after.inaccuracy, 0.0);
    }

    #[test]
    fn second_derived_hop_crosses_threshold() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::Derived);

        propagate(&store, a.id, 1.0).unwrap();
        propagate(&store, a.id, 1.0).unwrap();

        let b_after = store.get(b.id).unwrap().unwrap();
        assert!(b_after.needs_revalidation());
    }

    #[test]
    fn inaccuracy_saturates_at_cap() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::Derived);
        for _ in 0..10 {
            propagate(&store, a.id, 1.0).unwrap();
        }
        let b_after = store.get(b.id).unwrap().unwrap();
        assert!(b_after.inaccuracy <= INACCURACY_CAP);
        assert_eq!(b_after.inaccuracy, INACCURACY_CAP);
    }

    #[test]
    fn deprecated_entries_are_bumped_but_not_expanded() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        let c = entry(&store, "C");
        link(&store, a.id, b.id, LinkType::Derived);
        link(&store, b.id, c.id, LinkType::Depends);
        store.deprecate(b.id, "stale".to_string()).unwrap();

        let bumped = propagate(&store, a.id, 1.0).unwrap();
        assert!(bumped.contains(&b.id));
        assert!(!bumped.contains(&c.id));
    }

    #[test]
    fn cycles_do_not_infinite_loop() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::Derived);
        link(&store, b.id, a.id, LinkType::Derived);

        let bumped = propagate(&store, a.id, 1.0).unwrap();
        assert_eq!(bumped, vec![b.id]);
    }

    #[test]
    fn zero_diff_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::Derived);
        let bumped = propagate(&store, a.id, 0.0).unwrap();
        assert!(bumped.is_empty());
        assert_eq!(store.get(b.id).unwrap().unwrap().inaccuracy, 0.0);
    }

    #[test]
    fn reinforcement_resets_to_zero() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::Derived);
        propagate(&store, a.id, 1.0).unwrap();
        assert!(store.get(b.id).unwrap().unwrap().inaccuracy > 0.0);
        store.reset_inaccuracy(b.id).unwrap();
        assert_eq!(store.get(b.id).unwrap().unwrap().inaccuracy, 0.0);
    }

    #[test]
    fn supersedes_flags_target_above_threshold() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "New Convention");
        let b = entry(&store, "Old Convention");
        flag_superseded(&store, a.id, b.id).unwrap();
        let b_after = store.get(b.id).unwrap().unwrap();
        assert!(b_after.needs_revalidation());
        assert_eq!(b_after.flag_reason.as_deref(), Some("superseded by New Convention"));
    }

    #[test]
    fn conflicts_with_has_zero_propagation_weight() {
        let store = Store::open_in_memory().unwrap();
        let a = entry(&store, "A");
        let b = entry(&store, "B");
        link(&store, a.id, b.id, LinkType::ConflictsWith);
        let bumped = propagate(&store, a.id, 1.0).unwrap();
        assert!(bumped.is_empty());
    }
}
