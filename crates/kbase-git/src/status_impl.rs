//! gix-backed working tree status.

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::{FileStatus, StatusEntry};

pub fn is_dirty(repo: &GixRepo) -> Result<bool, GitError> {
    repo.repo
        .is_dirty()
        .map_err(|e| GitError::BackendError { message: e.to_string() })
}

pub fn status(repo: &GixRepo) -> Result<Vec<StatusEntry>, GitError> {
    let platform = repo
        .repo
        .status(gix::progress::Discard)
        .map_err(|e| GitError::BackendError { message: e.to_string() })?;
    let iter = platform
        .into_iter(None)
        .map_err(|e| GitError::BackendError { message: e.to_string() })?;

    let mut entries = Vec::new();
    for item in iter {
        let item = item.map_err(|e| GitError::BackendError { message: e.to_string() })?;
        let (path, status) = match item {
            gix::status::Item::IndexWorktree(iw) => {
                let path = iw.rela_path().to_string();
                let status = match &iw {
                    gix::status::index_as_worktree::Item::DirectoryContents { .. } => {
                        FileStatus::Untracked
                    }
                    gix::status::index_as_worktree::Item::Modification { .. } => {
                        FileStatus::Modified
                    }
                    _ => FileStatus::Modified,
                };
                (path, status)
            }
            gix::status::Item::TreeIndex(ti) => {
                let path = ti.location().to_string();
                let status = match ti.status {
                    gix::diff::index::ChangeRef::Addition { .. } => FileStatus::Added,
                    gix::diff::index::ChangeRef::Deletion { .. } => FileStatus::Deleted,
                    _ => FileStatus::Modified,
                };
                (path, status)
            }
        };
        entries.push(StatusEntry { path, status });
    }
    Ok(entries)
}
