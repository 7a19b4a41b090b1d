//! End-to-end coverage of the Tool surface against a real git working tree:
//! remember writes a mirrored file and a commit, recall finds it by content,
//! and an update to one entry propagates inaccuracy to a linked entry.

mod common;

use kbase::search::SearchParams;
use kbase::tools::{RememberInput, UpdateInput};

fn convention(title: &str, content: &str) -> RememberInput {
    RememberInput {
        entry_type: "convention".into(),
        title: title.into(),
        content: content.into(),
        tags: vec!["rust".into()],
        declaration: None,
        scope: "repo".into(),
        project: None,
        parent_page_id: None,
        source: "agent".into(),
    }
}

#[test]
fn remember_mirrors_a_file_and_commits() {
    let h = common::setup();
    let envelope = h.tools.remember(convention("Prefer thiserror", "Use thiserror for library error enums.")).unwrap();
    let entry = &envelope.results[0];

    let path = h.repo_dir.path().join(kbase::serializer::filename(entry.entry_type, &entry.title, entry.id));
    assert!(path.exists(), "mirrored file should exist at {}", path.display());

    let log = std::process::Command::new("git")
        .args(["log", "--oneline"])
        .current_dir(h.repo_dir.path())
        .output()
        .unwrap();
    assert!(log.status.success());
    assert!(!String::from_utf8_lossy(&log.stdout).trim().is_empty(), "expected at least one commit after remember");
}

#[test]
fn recall_finds_entry_by_content() {
    let h = common::setup();
    h.tools.remember(convention("Avoid unwrap in libraries", "Library crates should propagate errors, not unwrap.")).unwrap();
    h.tools.remember(convention("Use workspaces", "Split large binaries into a workspace of crates.")).unwrap();

    let params = SearchParams { query: Some("unwrap".into()), limit: 10, ..SearchParams::default() };
    let envelope = h.tools.recall(&params).unwrap();
    assert_eq!(envelope.results.len(), 1);
    assert_eq!(envelope.results[0].title, "Avoid unwrap in libraries");
}

#[test]
fn content_update_propagates_inaccuracy_to_derived_entry() {
    let h = common::setup();
    let source = h.tools.remember(convention("Base pattern", "The original wording.")).unwrap().results.remove(0);
    let derived = h.tools.remember(convention("Derived note", "Builds on the base pattern.")).unwrap().results.remove(0);
    h.tools.link(source.id, derived.id, "derived", None).unwrap();

    h.tools.update(source.id, UpdateInput { content: Some("a materially different wording".into()), ..UpdateInput::default() }).unwrap();

    let derived_after = h.tools.store().get(derived.id).unwrap().unwrap();
    assert!(derived_after.inaccuracy > 0.0);
    assert!(derived_after.needs_revalidation() || derived_after.inaccuracy > 0.0);
}
