//! CLI subprocess fallback, used for `init`'s bootstrap, `fetch`, `merge`,
//! `push`, and `has_remote` — the network and remote-config surface gix
//! doesn't yet cover at a level worth building on. Staging, committing, and
//! conflict checkout go through gix plumbing directly; see
//! [`crate::commit_impl`].

use std::path::Path;
use std::process::Command;

use crate::error::GitError;

pub fn run(workdir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(args)
        .output()
        .map_err(GitError::IoError)?;

    if !output.status.success() {
        return Err(GitError::BackendError {
            message: format!(
                "git {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`run`] but treats a non-zero exit as a soft failure, returning the
/// combined stdout/stderr instead of an error. Used for commands (like
/// `git merge`) whose non-zero exit is an expected, handled outcome rather
/// than a backend failure.
pub fn run_allow_failure(workdir: &Path, args: &[&str]) -> Result<(bool, String), GitError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(args)
        .output()
        .map_err(GitError::IoError)?;
    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), combined))
}
