//! The gix-backed implementation of [`GitRepo`]. Staging, committing, reads,
//! and status all go through gix plumbing (see [`crate::commit_impl`],
//! [`crate::refs_impl`], [`crate::status_impl`]). `fetch`, `merge`, `push`,
//! and `has_remote` still shell out to the `git` binary — smart-HTTP/SSH
//! transport and merge-conflict resolution are the one area not worth
//! reimplementing against gix plumbing directly.

use std::path::{Path, PathBuf};

use crate::cli;
use crate::error::GitError;
use crate::repo::GitRepo;
use crate::types::{CommitInfo, GitOid, MergeOutcome, RefName, StatusEntry};

/// A [`GitRepo`] implementation backed by [gix](https://github.com/GitoxideLabs/gitoxide)
/// for reads, and the `git` binary for staging, committing, and network
/// operations.
///
/// Construct via [`GixRepo::open`] or [`GixRepo::init`].
pub struct GixRepo {
    pub(crate) repo: gix::Repository,
    workdir: PathBuf,
}

impl GixRepo {
    /// Open an existing, non-bare git repository at `path`.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = gix::open_opts(path, gix::open::Options::isolated())
            .map_err(|e| GitError::BackendError { message: e.to_string() })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::BackendError {
                message: format!("{} is a bare repository; kbase requires a worktree", path.display()),
            })?;
        Ok(Self { repo, workdir })
    }

    /// Initialize a fresh, non-bare git repository at `path`, or open it if
    /// one already exists.
    pub fn init(path: &Path) -> Result<Self, GitError> {
        if path.join(".git").exists() {
            return Self::open(path);
        }
        std::fs::create_dir_all(path).map_err(GitError::IoError)?;
        cli::run(path, &["init", "--initial-branch", "main"])?;
        Self::open(path)
    }

    pub(crate) fn workdir(&self) -> &Path {
        &self.workdir
    }
}

impl GitRepo for GixRepo {
    fn read_ref(&self, name: &RefName) -> Result<Option<GitOid>, GitError> {
        crate::refs_impl::read_ref(self, name)
    }

    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError> {
        crate::refs_impl::rev_parse(self, spec)
    }

    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError> {
        crate::refs_impl::rev_parse_opt(self, spec)
    }

    fn read_commit(&self, oid: GitOid) -> Result<CommitInfo, GitError> {
        crate::refs_impl::read_commit(self, oid)
    }

    fn is_dirty(&self) -> Result<bool, GitError> {
        crate::status_impl::is_dirty(self)
    }

    fn status(&self) -> Result<Vec<StatusEntry>, GitError> {
        crate::status_impl::status(self)
    }

    fn stage_all(&self) -> Result<bool, GitError> {
        crate::commit_impl::stage_all(self)
    }

    fn commit(&self, message: &str, author: &str) -> Result<GitOid, GitError> {
        crate::commit_impl::commit(self, message, author)
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<Option<GitOid>, GitError> {
        let (ok, out) = cli::run_allow_failure(
            &self.workdir,
            &["fetch", remote, &format!("{branch}:refs/remotes/{remote}/{branch}")],
        )?;
        if !ok {
            if out.contains("couldn't find remote ref") {
                return Ok(None);
            }
            return Err(GitError::FetchFailed { remote: remote.to_string(), message: out });
        }
        self.rev_parse_opt(&format!("refs/remotes/{remote}/{branch}"))
    }

    fn merge(&self, their_oid: GitOid) -> Result<MergeOutcome, GitError> {
        let before = self.rev_parse_opt("HEAD")?;
        if before == Some(their_oid) {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        let (ok, out) = cli::run_allow_failure(
            &self.workdir,
            &[
                "merge",
                "--no-rebase",
                "--allow-unrelated-histories",
                "-m",
                "merge remote knowledge base",
                &their_oid.to_string(),
            ],
        )?;
        if ok {
            let head = self.rev_parse("HEAD")?;
            return Ok(MergeOutcome::Merged { new_head: head });
        }
        if out.contains("CONFLICT") || out.contains("Automatic merge failed") {
            let unmerged = cli::run(&self.workdir, &["diff", "--name-only", "--diff-filter=U"])?;
            let paths = unmerged.lines().map(str::to_string).collect();
            return Ok(MergeOutcome::Conflicted { paths });
        }
        Err(GitError::BackendError { message: out })
    }

    fn checkout_paths_from(&self, their_oid: GitOid, paths: &[String]) -> Result<(), GitError> {
        crate::commit_impl::checkout_paths_from(self, their_oid, paths)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        let (ok, out) = cli::run_allow_failure(
            &self.workdir,
            &["push", "--set-upstream", remote, &format!("{branch}:{branch}")],
        )?;
        if ok {
            Ok(())
        } else {
            Err(GitError::PushFailed { remote: remote.to_string(), message: out })
        }
    }

    fn has_remote(&self, remote: &str) -> Result<bool, GitError> {
        let remotes = cli::run(&self.workdir, &["remote"])?;
        Ok(remotes.lines().any(|r| r == remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, GixRepo) {
        let dir = tempfile::tempdir().unwrap();
        let repo = GixRepo::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn init_creates_empty_repo_with_no_head() {
        let (_dir, repo) = init_repo();
        assert_eq!(repo.rev_parse_opt("HEAD").unwrap(), None);
    }

    #[test]
    fn stage_all_false_on_clean_tree() {
        let (_dir, repo) = init_repo();
        assert!(!repo.stage_all().unwrap());
    }

    #[test]
    fn stage_and_commit_round_trip() {
        let (dir, repo) = init_repo();
        std::fs::write(dir.path().join("entries.md"), "hello").unwrap();
        assert!(repo.stage_all().unwrap());
        let oid = repo.commit("initial import", "kbase <kbase@local>").unwrap();
        assert_eq!(repo.rev_parse("HEAD").unwrap(), oid);
        assert!(!repo.is_dirty().unwrap());
    }

    #[test]
    fn has_remote_false_when_none_configured() {
        let (_dir, repo) = init_repo();
        assert!(!repo.has_remote("origin").unwrap());
    }
}
