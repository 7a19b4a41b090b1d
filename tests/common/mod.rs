//! Shared setup for kbase integration tests: a real git working tree plus a
//! `Tools` instance mirroring into it, all rooted under one `TempDir`.

use std::sync::Arc;

use kbase::config::RepoRoute;
use kbase::mirror::{Mirror, MirrorRepo};
use kbase::store::Store;
use kbase::tools::Tools;
use kbase_git::GixRepo;
use tempfile::TempDir;

/// A `Tools` instance with one catch-all mirror repo, plus the `TempDir`
/// keeping its git working tree and SQLite index alive.
pub struct Harness {
    pub tools: Tools,
    pub repo_dir: TempDir,
}

pub fn setup() -> Harness {
    let repo_dir = TempDir::new().expect("tempdir");
    let git = GixRepo::init(repo_dir.path()).expect("git init");
    let route = RepoRoute { name: "default".into(), path: repo_dir.path().to_owned(), remote: None, scope: None, project: None };
    let mirror = Arc::new(Mirror::new(vec![MirrorRepo { route, git: Box::new(git) }]));
    let store = Store::open_in_memory().expect("open store");
    Harness { tools: Tools::new(store, mirror), repo_dir }
}
