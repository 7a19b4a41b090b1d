//! gix-backed ref and rev-parse operations.

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::{CommitInfo, GitOid};

pub fn read_ref(repo: &GixRepo, name: &crate::types::RefName) -> Result<Option<GitOid>, GitError> {
    match repo.repo.try_find_reference(name.as_str()) {
        Ok(Some(mut r)) => {
            let id = r
                .peel_to_id_in_place()
                .map_err(|e| GitError::BackendError { message: e.to_string() })?;
            Ok(Some(oid_from_gix(id.detach())))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(GitError::BackendError { message: e.to_string() }),
    }
}

pub fn rev_parse(repo: &GixRepo, spec: &str) -> Result<GitOid, GitError> {
    rev_parse_opt(repo, spec)?.ok_or_else(|| GitError::NotFound {
        message: format!("revision `{spec}` does not resolve"),
    })
}

pub fn rev_parse_opt(repo: &GixRepo, spec: &str) -> Result<Option<GitOid>, GitError> {
    match repo.repo.rev_parse_single(spec) {
        Ok(id) => Ok(Some(oid_from_gix(id.detach()))),
        Err(_) => Ok(None),
    }
}

pub fn read_commit(repo: &GixRepo, oid: GitOid) -> Result<CommitInfo, GitError> {
    let id = gix::ObjectId::from_bytes_or_panic_sized(*oid.as_bytes());
    let commit = repo
        .repo
        .find_object(id)
        .map_err(|e| GitError::BackendError { message: e.to_string() })?
        .try_into_commit()
        .map_err(|e| GitError::BackendError { message: e.to_string() })?;
    let decoded = commit
        .decode()
        .map_err(|e| GitError::BackendError { message: e.to_string() })?;
    Ok(CommitInfo {
        tree_oid: oid_from_gix(decoded.tree()),
        parents: decoded.parents().map(oid_from_gix).collect(),
        message: decoded.message().summary().to_string(),
        author: decoded.author().to_string(),
        committer: decoded.committer().to_string(),
    })
}

fn oid_from_gix(id: gix::ObjectId) -> GitOid {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(id.as_bytes());
    GitOid::from_bytes(bytes)
}
