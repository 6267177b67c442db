use std::sync::Arc;

use cirrus_backend::{path, Backend, ReadStream};
use cirrus_types::{doc::validate_name, DirDoc, FileDoc, TRASH_DIR_NAME};
use tracing::{debug, info, warn};

use crate::error::{VfsError, VfsResult};
use crate::indexer::Indexer;
use crate::session::WriteSession;
use crate::tree;

/// Directory permission bits used for every directory the VFS creates.
pub const DIR_MODE: u32 = 0o755;

/// One tenant's filesystem: a backend for content and an indexer for
/// documents. Cheap to clone.
#[derive(Clone)]
pub struct Vfs {
    backend: Arc<dyn Backend>,
    indexer: Arc<dyn Indexer>,
}

impl Vfs {
    pub fn new(backend: Arc<dyn Backend>, indexer: Arc<dyn Indexer>) -> Self {
        Self { backend, indexer }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.indexer
    }

    /// Initialize the index, the backend, and the trash directory.
    /// Safe to call on an already initialized tenant.
    pub fn init(&self) -> VfsResult<()> {
        self.indexer.init_index()?;
        self.backend.init()?;
        let trash = path::join("/", TRASH_DIR_NAME);
        match self.backend.create_dir(&trash, DIR_MODE) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }
        info!(backend = %self.backend.kind(), "filesystem initialized");
        Ok(())
    }

    /// Remove all of the tenant's content from the backend.
    pub fn delete(&self) -> VfsResult<()> {
        self.backend.remove_all("/")?;
        info!(backend = %self.backend.kind(), "filesystem deleted");
        Ok(())
    }

    /// Make the directory, then index it. The directory is removed again if
    /// indexing fails.
    pub fn create_dir(&self, doc: &mut DirDoc) -> VfsResult<()> {
        self.backend.create_dir(&doc.fullpath, DIR_MODE)?;
        if let Err(err) = self.indexer.create_dir_doc(doc) {
            if let Err(e) = self.backend.remove(&doc.fullpath) {
                warn!(path = %doc.fullpath, error = %e, "failed to remove unindexed directory");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Start writing `newdoc`'s content.
    ///
    /// Pass the current document as `olddoc` to overwrite it; the new
    /// document then keeps its id. The previous revision stays readable
    /// until the session commits.
    pub fn create_file(&self, newdoc: FileDoc, olddoc: Option<FileDoc>) -> VfsResult<WriteSession> {
        WriteSession::begin(
            Arc::clone(&self.backend),
            Arc::clone(&self.indexer),
            newdoc,
            olddoc,
        )
    }

    pub fn open_file(&self, doc: &FileDoc) -> VfsResult<ReadStream> {
        let parent = self.indexer.dir_by_id(&doc.dir_id)?;
        Ok(self.backend.open(&doc.path_in(&parent))?)
    }

    /// Read a file's whole content.
    pub fn read_file(&self, doc: &FileDoc) -> VfsResult<Vec<u8>> {
        let parent = self.indexer.dir_by_id(&doc.dir_id)?;
        Ok(self.backend.read_all(&doc.path_in(&parent))?)
    }

    /// Update a file document, moving and re-moding its content as needed.
    pub fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> VfsResult<()> {
        validate_name(&new.name)?;
        let new_parent = self.indexer.dir_by_id(&new.dir_id)?;
        let newpath = new.path_in(&new_parent);
        let oldpath = if new.dir_id != old.dir_id || new.name != old.name {
            let old_parent = self.indexer.dir_by_id(&old.dir_id)?;
            let oldpath = old.path_in(&old_parent);
            tree::safe_rename_file(self.backend.as_ref(), &oldpath, &newpath)?;
            Some(oldpath)
        } else {
            None
        };
        let chmod = new.executable != old.executable;
        let applied = if chmod {
            self.backend.set_mode(&newpath, new.mode()).map_err(VfsError::from)
        } else {
            Ok(())
        }
        .and_then(|()| self.indexer.update_file_doc(old, new).map_err(VfsError::from));

        if let Err(err) = applied {
            if chmod {
                if let Err(e) = self.backend.set_mode(&newpath, old.mode()) {
                    warn!(path = %newpath, error = %e, "failed to restore file mode");
                }
            }
            if let Some(oldpath) = &oldpath {
                if let Err(e) = self.backend.rename(&newpath, oldpath) {
                    warn!(from = %newpath, to = %oldpath, error = %e, "failed to move file back");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Update a directory document; a changed name or parent moves the
    /// directory and its subtree.
    pub fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> VfsResult<()> {
        let parent_id = match (&old.dir_id, &new.dir_id) {
            (Some(_), Some(parent_id)) => parent_id.clone(),
            _ => {
                return Err(VfsError::ForbiddenMove {
                    from: old.fullpath.clone(),
                    to: new.fullpath.clone(),
                })
            }
        };
        validate_name(&new.name)?;
        let parent = self.indexer.dir_by_id(&parent_id)?;
        new.fullpath = path::join(&parent.fullpath, &new.name);

        let moved = new.fullpath != old.fullpath;
        if moved {
            tree::safe_rename_dir(self.backend.as_ref(), &old.fullpath, &new.fullpath)?;
        }
        if let Err(err) = self.indexer.update_dir_doc(old, new) {
            if moved {
                if let Err(e) = self.backend.rename(&new.fullpath, &old.fullpath) {
                    warn!(from = %new.fullpath, to = %old.fullpath, error = %e, "failed to move directory back");
                }
            }
            return Err(err.into());
        }
        debug!(from = %old.fullpath, to = %new.fullpath, "dir doc updated");
        Ok(())
    }

    pub fn destroy_dir_content(&self, dir: &DirDoc) -> VfsResult<()> {
        tree::destroy_dir_content(self.backend.as_ref(), self.indexer.as_ref(), dir)
    }

    pub fn destroy_dir_and_content(&self, dir: &DirDoc) -> VfsResult<()> {
        tree::destroy_dir_and_content(self.backend.as_ref(), self.indexer.as_ref(), dir)
    }

    pub fn destroy_file(&self, doc: &FileDoc) -> VfsResult<()> {
        let parent = self.indexer.dir_by_id(&doc.dir_id)?;
        tree::destroy_file(self.backend.as_ref(), self.indexer.as_ref(), &parent, doc)
    }

    pub fn dir_by_path(&self, p: &str) -> VfsResult<DirDoc> {
        Ok(self.indexer.dir_by_path(p)?)
    }

    pub fn file_by_path(&self, p: &str) -> VfsResult<FileDoc> {
        Ok(self.indexer.file_by_path(p)?)
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("backend", &self.backend.kind())
            .finish()
    }
}
