//! Streaming write sessions with backup-and-rollback overwrite.
//!
//! A session is opened by [`Vfs::create_file`](crate::Vfs::create_file):
//!
//! 1. When a previous revision exists, its object is renamed to a hidden
//!    [`BackupPath`]. Losing that rename to another writer is a `Conflict`.
//! 2. The new object is created with an exclusive create. Losing that race is
//!    a `Conflict` too.
//! 3. Every write goes to the backend, the content hash, and the metadata
//!    extractor.
//! 4. [`WriteSession::close`] checks the written content against the
//!    declared hash and size, indexes the document, then drops the backup.
//!    Any failure before indexing restores the previous state.
//!
//! Dropping a session that was never closed rolls it back.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use cirrus_backend::{Backend, WriteHandle};
use cirrus_types::{ContentHasher, FileDoc};
use tracing::{debug, info, warn};

use crate::backup::BackupPath;
use crate::error::{VfsError, VfsResult};
use crate::extract::{extractor_for, MetaExtractor};
use crate::indexer::Indexer;

/// Cooperative cancellation flag shared with the calling layer.
///
/// Cancelling does not tear a session down: the next write fails and the
/// session rolls back when it is closed.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a [`WriteSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Writing,
    Committed,
    RolledBack,
}

/// Where the previous revision was moved, and where it goes back to.
#[derive(Debug)]
struct Restore {
    backup: BackupPath,
    original: String,
}

impl Restore {
    fn put_back(&self, backend: &dyn Backend) {
        if let Err(e) = backend.rename(self.backup.as_str(), &self.original) {
            warn!(
                backup = %self.backup,
                path = %self.original,
                error = %e,
                "failed to restore previous revision"
            );
        }
    }
}

/// One in-progress file write. See the module docs for the protocol.
pub struct WriteSession {
    backend: Arc<dyn Backend>,
    indexer: Arc<dyn Indexer>,
    handle: Option<Box<dyn WriteHandle>>,
    hasher: ContentHasher,
    extractor: Option<Box<dyn MetaExtractor>>,
    write_err: Option<io::Error>,
    newdoc: FileDoc,
    olddoc: Option<FileDoc>,
    path: String,
    restore: Option<Restore>,
    cancel: Option<CancelToken>,
    state: SessionState,
}

impl WriteSession {
    pub(crate) fn begin(
        backend: Arc<dyn Backend>,
        indexer: Arc<dyn Indexer>,
        mut newdoc: FileDoc,
        olddoc: Option<FileDoc>,
    ) -> VfsResult<Self> {
        let parent = indexer.dir_by_id(&newdoc.dir_id)?;
        let path = newdoc.path_in(&parent);

        let mut restore = None;
        if let Some(old) = &olddoc {
            let original = if old.dir_id == newdoc.dir_id {
                old.path_in(&parent)
            } else {
                old.path_in(&indexer.dir_by_id(&old.dir_id)?)
            };
            let backup = BackupPath::allocate(&old.id, old.rev.as_ref());
            match backend.rename(&original, backup.as_str()) {
                Ok(()) => {}
                // Another writer moved it first.
                Err(e) if e.is_not_found() => return Err(VfsError::Conflict(original)),
                Err(e) => return Err(e.into()),
            }
            debug!(path = %original, %backup, "previous revision moved aside");
            newdoc.id = old.id.clone();
            newdoc.rev = old.rev.clone();
            newdoc.created_at = old.created_at;
            restore = Some(Restore { backup, original });
        }

        let handle = match backend.create_exclusive(&path, newdoc.mode()) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(restore) = &restore {
                    restore.put_back(backend.as_ref());
                }
                if e.is_already_exists() {
                    return Err(VfsError::Conflict(path));
                }
                return Err(e.into());
            }
        };

        let extractor = extractor_for(&newdoc.mime);
        Ok(Self {
            backend,
            indexer,
            handle: Some(handle),
            hasher: ContentHasher::new(),
            extractor,
            write_err: None,
            newdoc,
            olddoc,
            path,
            restore,
            cancel: None,
            state: SessionState::Writing,
        })
    }

    /// Observe `token`; once it is cancelled, writes fail and `close` rolls back.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Final path of the content being written.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.hasher.len()
    }

    /// Finish the write and index the document.
    ///
    /// Integrity failures (`HashMismatch`, `SizeMismatch`) and write errors
    /// leave the previous revision, if any, in place and readable. If the
    /// indexer fails, the new content stays on the backend along with the
    /// backup of the previous revision, and the indexer error is returned.
    pub fn close(mut self) -> VfsResult<FileDoc> {
        let closed = match self.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        };
        if self.is_cancelled() {
            self.rollback();
            return Err(VfsError::Cancelled);
        }
        if let Some(err) = self.write_err.take() {
            self.rollback();
            return Err(VfsError::Write(err));
        }
        if let Err(err) = closed {
            self.rollback();
            return Err(err.into());
        }

        let mut doc = self.newdoc.clone();
        let actual = self.hasher.finalize();
        match doc.content_hash {
            Some(expected) if expected != actual => {
                self.rollback();
                return Err(VfsError::HashMismatch { expected, actual });
            }
            _ => doc.content_hash = Some(actual),
        }
        let written = self.hasher.len();
        match doc.byte_size {
            Some(expected) if expected != written => {
                self.rollback();
                return Err(VfsError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
            _ => doc.byte_size = Some(written),
        }
        if let Some(meta) = self.extractor.take().and_then(|e| e.finish()) {
            doc.metadata = meta;
        }
        doc.updated_at = Utc::now();

        let indexed = match &self.olddoc {
            Some(old) => self.indexer.update_file_doc(old, &mut doc),
            None => self.indexer.create_file_doc(&mut doc),
        };
        self.state = SessionState::Committed;
        if let Err(err) = indexed {
            warn!(path = %self.path, error = %err, "content written but not indexed");
            return Err(err.into());
        }

        if let Some(restore) = self.restore.take() {
            if let Err(e) = self.backend.remove(restore.backup.as_str()) {
                warn!(backup = %restore.backup, error = %e, "failed to remove backup");
            }
        }
        info!(path = %self.path, bytes = written, hash = %actual.short_hex(), "file committed");
        Ok(doc)
    }

    /// Abandon the write and restore the previous state.
    pub fn cancel(mut self) {
        debug!(path = %self.path, "write session cancelled");
        self.rollback();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn record(&mut self, err: &io::Error) {
        if self.write_err.is_none() {
            self.write_err = Some(io::Error::new(err.kind(), err.to_string()));
        }
    }

    fn rollback(&mut self) {
        drop(self.handle.take());
        self.extractor = None;
        match self.backend.remove(&self.path) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(path = %self.path, error = %e, "failed to remove partial write"),
        }
        if let Some(restore) = self.restore.take() {
            restore.put_back(self.backend.as_ref());
        }
        self.state = SessionState::RolledBack;
        debug!(path = %self.path, "write session rolled back");
    }
}

impl Write for WriteSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state != SessionState::Writing {
            return Err(io::Error::new(io::ErrorKind::Other, "write session is closed"));
        }
        if self.is_cancelled() {
            let err = io::Error::new(io::ErrorKind::Other, "write cancelled");
            self.record(&err);
            return Err(err);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "write session is closed"));
        };
        let n = match handle.write(buf) {
            Ok(n) => n,
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.record(&e);
                }
                return Err(e);
            }
        };
        let accepted = &buf[..n];
        self.hasher.update(accepted);
        if let Some(extractor) = self.extractor.as_mut() {
            if let Err(e) = extractor.write_all(accepted) {
                debug!(path = %self.path, error = %e, "metadata extraction abandoned");
                self.extractor = None;
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for WriteSession {
    fn drop(&mut self) {
        if self.state == SessionState::Writing {
            warn!(path = %self.path, "write session dropped without close");
            self.rollback();
        }
    }
}

impl std::fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("written", &self.hasher.len())
            .field("backup", &self.restore.as_ref().map(|r| &r.backup))
            .finish()
    }
}
