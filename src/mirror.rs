//! The Mirror: write-through of entries to their routed git working trees.
//!
//! Placement is a pure function of an entry's current fields — which repo an
//! entry lives in follows from `(scope, project)` through the routing table,
//! and its path within that repo follows from `(entry_type, title, id)` via
//! [`crate::serializer::filename`]. Nothing about "where this entry used to
//! live" is persisted; a write call that's handed the entry's prior state
//! (from [`crate::store::Updated`]) recomputes the old location and reacts to
//! whatever changed, the same way [`crate::graph`] diffs before/after rather
//! than tracking deltas incrementally.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::{RepoRoute, RoutingConfig};
use crate::error::KbaseError;
use crate::serializer::{filename, redirect_body, serialize};
use crate::store::{Entry, Link, Scope};
use kbase_git::GitRepo;

/// Resolve the first route in `routing` whose `scope`/`project` filters
/// match, in list order. A route with no `scope` and no `project` matches
/// anything and acts as the catch-all — it should be listed last.
#[must_use]
pub fn resolve_route<'a>(routing: &'a RoutingConfig, scope: Scope, project: Option<&str>) -> Option<&'a RepoRoute> {
    routing.repos.iter().find(|r| route_matches(r, scope, project))
}

fn route_matches(route: &RepoRoute, scope: Scope, project: Option<&str>) -> bool {
    let scope_ok = route.scope.is_none_or(|s| s == scope);
    let project_ok = route.project.is_none() || route.project.as_deref() == project;
    scope_ok && project_ok
}

/// One configured mirror: its routing metadata plus the git working tree it
/// writes into.
pub struct MirrorRepo {
    pub route: RepoRoute,
    pub git: Box<dyn GitRepo>,
}

/// Write-through target for the local index: resolves each entry to a
/// routed repo and keeps its Markdown file current, including redirect
/// markers left behind after a rename.
pub struct Mirror {
    repos: Vec<MirrorRepo>,
    touched: Mutex<HashSet<String>>,
}

impl Mirror {
    #[must_use]
    pub fn new(repos: Vec<MirrorRepo>) -> Self {
        Self { repos, touched: Mutex::new(HashSet::new()) }
    }

    fn route_for(&self, scope: Scope, project: Option<&str>) -> Option<&MirrorRepo> {
        self.repos.iter().find(|r| route_matches(&r.route, scope, project))
    }

    fn find_by_name(&self, name: &str) -> Option<&MirrorRepo> {
        self.repos.iter().find(|r| r.route.name == name)
    }

    /// Names of repos written to since the last [`Mirror::take_touched`].
    #[must_use]
    pub fn touched_repos(&self) -> Vec<String> {
        self.touched.lock().iter().cloned().collect()
    }

    /// Drain and return the set of touched repo names, clearing it. The
    /// commit scheduler calls this once it has queued a commit for each.
    pub fn take_touched(&self) -> HashSet<String> {
        std::mem::take(&mut self.touched.lock())
    }

    /// Write (or move) an entry's mirrored file.
    ///
    /// `before` is the entry's state prior to this change, if any (`None`
    /// for a brand-new entry). Conflict-copy entries are never mirrored and
    /// this is a no-op for them.
    ///
    /// # Errors
    /// Returns [`KbaseError::Io`] on a file system failure, or
    /// [`KbaseError::ValidationFailed`] if serialization fails.
    pub fn write(&self, before: Option<&Entry>, after: &Entry, outgoing_links: &[Link]) -> Result<(), KbaseError> {
        if after.is_conflict_copy() {
            return Ok(());
        }
        let Some(new_repo) = self.route_for(after.scope, after.project.as_deref()) else {
            return Ok(());
        };
        let new_path = filename(after.entry_type, &after.title, after.id);
        let content = serialize(after, outgoing_links)?;

        if let Some(before) = before {
            if !before.is_conflict_copy() {
                if let Some(old_repo) = self.route_for(before.scope, before.project.as_deref()) {
                    let old_path = filename(before.entry_type, &before.title, before.id);
                    if old_repo.route.name != new_repo.route.name {
                        self.remove_file(old_repo, &old_path)?;
                        self.write_file(new_repo, &new_path, &content)?;
                        return Ok(());
                    }
                    if before.entry_type != after.entry_type {
                        self.remove_file(old_repo, &old_path)?;
                        self.write_file(new_repo, &new_path, &content)?;
                        return Ok(());
                    }
                    if old_path != new_path {
                        self.write_file(new_repo, &new_path, &content)?;
                        let new_basename = new_path.rsplit('/').next().unwrap_or(&new_path);
                        self.write_file(new_repo, &old_path, &redirect_body(new_basename))?;
                        return Ok(());
                    }
                }
            }
        }

        self.write_file(new_repo, &new_path, &content)
    }

    /// Remove an entry's mirrored file entirely (used when an entry is
    /// deleted outright rather than deprecated).
    ///
    /// # Errors
    /// Returns [`KbaseError::Io`] on a file system failure.
    pub fn remove(&self, entry: &Entry) -> Result<(), KbaseError> {
        if entry.is_conflict_copy() {
            return Ok(());
        }
        let Some(repo) = self.route_for(entry.scope, entry.project.as_deref()) else {
            return Ok(());
        };
        let path = filename(entry.entry_type, &entry.title, entry.id);
        self.remove_file(repo, &path)
    }

    fn write_file(&self, repo: &MirrorRepo, rel_path: &str, content: &str) -> Result<(), KbaseError> {
        let full = repo.route.path.join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, content)?;
        self.touched.lock().insert(repo.route.name.clone());
        Ok(())
    }

    fn remove_file(&self, repo: &MirrorRepo, rel_path: &str) -> Result<(), KbaseError> {
        let full = repo.route.path.join(rel_path);
        match std::fs::remove_file(&full) {
            Ok(()) => {
                self.touched.lock().insert(repo.route.name.clone());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every repo path this mirror knows how to write to, for the sync
    /// engine's pull/push passes.
    pub fn repo_paths(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.repos.iter().map(|r| (r.route.name.as_str(), r.route.path.as_path()))
    }

    /// Look up a configured repo's git handle by name.
    #[must_use]
    pub fn git(&self, name: &str) -> Option<&dyn GitRepo> {
        self.find_by_name(name).map(|r| r.git.as_ref())
    }

    /// Absolute path of a configured repo, by name.
    #[must_use]
    pub fn repo_path(&self, name: &str) -> Option<PathBuf> {
        self.find_by_name(name).map(|r| r.route.path.clone())
    }

    /// The full route record for a configured repo, by name.
    #[must_use]
    pub fn route(&self, name: &str) -> Option<&RepoRoute> {
        self.find_by_name(name).map(|r| &r.route)
    }

    /// Name of the repo a `(scope, project)` pair routes to, if any.
    #[must_use]
    pub fn repo_name_for(&self, scope: Scope, project: Option<&str>) -> Option<&str> {
        self.route_for(scope, project).map(|r| r.route.name.as_str())
    }
}
