//! gix-backed staging and committing.
//!
//! `stage_all` rebuilds the index from scratch by walking the working tree
//! and writing a blob per file, the same recompute-rather-than-track shape
//! [`crate::status_impl`] uses for `status`/`is_dirty`. `commit` builds a
//! tree straight off that index with a tree editor rooted at the empty
//! tree, then writes the commit object and advances HEAD.

use std::path::{Path, PathBuf};

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::types::GitOid;

fn to_gix_oid(oid: GitOid) -> gix::ObjectId {
    gix::ObjectId::from_bytes_or_panic_sized(*oid.as_bytes())
}

fn from_gix_oid(oid: gix::ObjectId) -> GitOid {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(oid.as_bytes());
    GitOid::from_bytes(bytes)
}

/// Collect every regular file under `dir`, relative to `workdir`, skipping `.git`.
fn walk_files(workdir: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<(), GitError> {
    for entry in std::fs::read_dir(dir).map_err(GitError::IoError)? {
        let entry = entry.map_err(GitError::IoError)?;
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        if path.is_dir() {
            walk_files(workdir, &path, out)?;
        } else {
            let rel = path.strip_prefix(workdir).expect("walked path is under workdir").to_string_lossy().replace('\\', "/");
            out.push((rel, path));
        }
    }
    Ok(())
}

fn existing_index_entries(repo: &GixRepo) -> Vec<(String, gix::ObjectId)> {
    let Ok(index) = repo.repo.open_index() else {
        return Vec::new();
    };
    index.entries().iter().filter_map(|e| e.path(&index).to_str().ok().map(|p| (p.to_owned(), e.id))).collect()
}

/// Rebuild the index from the current working-tree contents.
///
/// Returns `true` if the recomputed index differs from what's on disk,
/// `false` if the working tree already matched the last staged state.
pub fn stage_all(repo: &GixRepo) -> Result<bool, GitError> {
    let mut files = Vec::new();
    walk_files(repo.workdir(), repo.workdir(), &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut state = gix::index::State::new(repo.repo.object_hash());
    for (rel_path, abs_path) in &files {
        let data = std::fs::read(abs_path).map_err(GitError::IoError)?;
        let id = repo.repo.write_blob(data).map_err(|e| GitError::BackendError { message: format!("failed to write blob for '{rel_path}': {e}") })?;
        let stat: gix::index::entry::Stat = Default::default();
        let flags = gix::index::entry::Flags::empty();
        state.dangerously_push_entry(stat, id.detach(), flags, gix::index::entry::Mode::FILE, rel_path.as_str().into());
    }
    state.sort_entries();

    let after: Vec<(String, gix::ObjectId)> = state.entries().iter().filter_map(|e| e.path(&state).to_str().ok().map(|p| (p.to_owned(), e.id))).collect();
    if after == existing_index_entries(repo) {
        return Ok(false);
    }

    let mut index_file = gix::index::File::from_state(state, repo.repo.index_path());
    index_file.write(Default::default()).map_err(|e| GitError::BackendError { message: format!("failed to write index: {e}") })?;
    Ok(true)
}

/// Parse a `"Name <email>"` commit identity into a gix signature stamped
/// with the current time.
fn parse_identity(spec: &str) -> Result<gix::actor::Signature, GitError> {
    let (name, rest) = spec.split_once('<').ok_or_else(|| GitError::BackendError { message: format!("invalid author '{spec}': expected 'Name <email>'") })?;
    let email = rest.strip_suffix('>').ok_or_else(|| GitError::BackendError { message: format!("invalid author '{spec}': missing closing '>'") })?;
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map_err(|e| GitError::BackendError { message: format!("system clock error: {e}") })?;
    Ok(gix::actor::Signature {
        name: name.trim().into(),
        email: email.trim().into(),
        time: gix::date::Time { seconds: now.as_secs() as i64, offset: 0 },
    })
}

fn read_merge_head(repo: &GixRepo) -> Result<Option<gix::ObjectId>, GitError> {
    let path = repo.workdir().join(".git").join("MERGE_HEAD");
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let oid: GitOid = contents.trim().parse().map_err(|e: crate::types::OidParseError| GitError::BackendError { message: e.to_string() })?;
            Ok(Some(to_gix_oid(oid)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GitError::IoError(e)),
    }
}

fn build_tree(repo: &GixRepo, index: &gix::index::File) -> Result<gix::ObjectId, GitError> {
    let empty = repo.repo.empty_tree();
    let mut editor = empty.edit().map_err(|e| GitError::BackendError { message: format!("failed to create tree editor: {e}") })?;
    for entry in index.entries() {
        let path = entry.path(index).to_str().map_err(|e| GitError::BackendError { message: format!("non-utf8 index path: {e}") })?;
        editor.upsert(path, gix::objs::tree::EntryKind::Blob, entry.id).map_err(|e| GitError::BackendError { message: format!("tree edit upsert '{path}': {e}") })?;
    }
    Ok(editor.write().map_err(|e| GitError::BackendError { message: format!("failed to write tree: {e}") })?.detach())
}

/// Overwrite each of `paths` in the working tree with its content at
/// `their_oid`, leaving the index to be rebuilt by the next [`stage_all`]
/// call (callers always run the two back to back).
pub fn checkout_paths_from(repo: &GixRepo, their_oid: GitOid, paths: &[String]) -> Result<(), GitError> {
    let commit = repo.repo.find_object(to_gix_oid(their_oid)).map_err(|e| GitError::BackendError { message: format!("failed to look up {their_oid}: {e}") })?.try_into_commit().map_err(|e| GitError::BackendError { message: format!("{their_oid} is not a commit: {e}") })?;
    let tree = commit.tree().map_err(|e| GitError::BackendError { message: format!("failed to read tree for {their_oid}: {e}") })?;

    for path in paths {
        let entry = tree
            .lookup_entry_by_path(path.as_str())
            .map_err(|e| GitError::BackendError { message: format!("failed to look up '{path}' in {their_oid}: {e}") })?
            .ok_or_else(|| GitError::BackendError { message: format!("'{path}' not found in {their_oid}") })?;
        let blob = entry.object().map_err(|e| GitError::BackendError { message: format!("failed to read object for '{path}': {e}") })?.try_into_blob().map_err(|e| GitError::BackendError { message: format!("'{path}' is not a blob: {e}") })?;

        let dest = repo.workdir().join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(GitError::IoError)?;
        }
        std::fs::write(&dest, &blob.data).map_err(GitError::IoError)?;
    }
    Ok(())
}

/// Commit the current index on top of HEAD (and `MERGE_HEAD`, if a merge
/// left one behind), advancing HEAD to the new commit.
pub fn commit(repo: &GixRepo, message: &str, author: &str) -> Result<GitOid, GitError> {
    let index = repo.repo.open_index().map_err(|e| GitError::BackendError { message: format!("failed to open index: {e}") })?;
    if index.entries().is_empty() {
        return Err(GitError::BackendError { message: "nothing staged to commit".to_string() });
    }

    let tree_id = build_tree(repo, &index)?;

    let mut parents = Vec::new();
    if let Ok(head) = repo.repo.head_id() {
        parents.push(head.detach());
    }
    if let Some(merge_head) = read_merge_head(repo)? {
        parents.push(merge_head);
    }

    let signature = parse_identity(author)?;
    let commit_id = repo
        .repo
        .commit_as(signature.clone(), signature, "HEAD", message, tree_id, parents)
        .map_err(|e| GitError::BackendError { message: format!("failed to create commit: {e}") })?;

    let _ = std::fs::remove_file(repo.workdir().join(".git").join("MERGE_HEAD"));
    let _ = std::fs::remove_file(repo.workdir().join(".git").join("MERGE_MSG"));

    Ok(from_gix_oid(commit_id.detach()))
}
