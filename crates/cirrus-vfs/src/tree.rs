//! Validated moves and recursive destruction of the directory tree.

use cirrus_backend::{path, Backend};
use cirrus_types::{DirDoc, DirOrFile, FileDoc};
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::indexer::{Indexer, IteratorOptions};

fn normalize(from: &str, to: &str) -> VfsResult<(String, String)> {
    if !path::is_abs(from) {
        return Err(VfsError::NonAbsolutePath(from.to_string()));
    }
    if !path::is_abs(to) {
        return Err(VfsError::NonAbsolutePath(to.to_string()));
    }
    Ok((path::clean(from), path::clean(to)))
}

fn ensure_vacant(backend: &dyn Backend, to: &str) -> VfsResult<()> {
    match backend.stat(to) {
        Ok(_) => Err(VfsError::AlreadyExists(to.to_string())),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Move a file. The destination must not exist.
pub fn safe_rename_file(backend: &dyn Backend, from: &str, to: &str) -> VfsResult<()> {
    let (from, to) = normalize(from, to)?;
    ensure_vacant(backend, &to)?;
    backend.rename(&from, &to)?;
    Ok(())
}

/// Move a directory and its subtree.
///
/// Rejected with [`VfsError::ForbiddenMove`] when `to` lies inside `from`,
/// before the backend is touched.
pub fn safe_rename_dir(backend: &dyn Backend, from: &str, to: &str) -> VfsResult<()> {
    let (from, to) = normalize(from, to)?;
    if path::is_descendant(&to, &from) {
        return Err(VfsError::ForbiddenMove { from, to });
    }
    ensure_vacant(backend, &to)?;
    backend.rename(&from, &to)?;
    debug!(%from, %to, "directory moved");
    Ok(())
}

/// Remove a file's content and its document.
pub fn destroy_file(
    backend: &dyn Backend,
    indexer: &dyn Indexer,
    parent: &DirDoc,
    doc: &FileDoc,
) -> VfsResult<()> {
    backend.remove(&doc.path_in(parent))?;
    indexer.delete_file_doc(doc)?;
    Ok(())
}

/// Destroy everything inside `dir`, depth first.
///
/// Stops at the first error; entries already destroyed stay destroyed.
pub fn destroy_dir_content(backend: &dyn Backend, indexer: &dyn Indexer, dir: &DirDoc) -> VfsResult<()> {
    for entry in indexer.dir_iterator(dir, IteratorOptions::default()) {
        match entry? {
            DirOrFile::Dir(child) => destroy_dir_and_content(backend, indexer, &child)?,
            DirOrFile::File(file) => destroy_file(backend, indexer, dir, &file)?,
        }
    }
    Ok(())
}

/// Destroy `dir`'s content, then `dir` itself.
pub fn destroy_dir_and_content(
    backend: &dyn Backend,
    indexer: &dyn Indexer,
    dir: &DirDoc,
) -> VfsResult<()> {
    destroy_dir_content(backend, indexer, dir)?;
    backend.remove_all(&dir.fullpath)?;
    indexer.delete_dir_doc(dir)?;
    debug!(path = %dir.fullpath, "directory destroyed");
    Ok(())
}
