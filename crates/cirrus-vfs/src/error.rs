//! Error types for the virtual filesystem.

use cirrus_backend::BackendError;
use cirrus_types::{ContentHash, DocId, Revision, TypeError};

/// Errors raised by an [`Indexer`](crate::Indexer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexerError {
    /// No document with this id or path.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Another entry already has this name in the same directory.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// The caller's revision is not the stored one.
    #[error("revision conflict on {id}: stored {stored}, got {given}")]
    RevisionConflict {
        id: DocId,
        stored: Revision,
        given: String,
    },

    /// The document cannot be stored as given.
    #[error("invalid document: {0}")]
    Invalid(String),
}

/// Convenience alias for indexer results.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Errors surfaced by VFS operations.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Lost a race with another writer. Re-fetch the current revision and retry.
    #[error("conflict on {0}")]
    Conflict(String),

    #[error("content hash mismatch: declared {expected}, written {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("content length mismatch: declared {expected} bytes, written {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("path is not absolute: {0}")]
    NonAbsolutePath(String),

    #[error("cannot move {from} into its own subtree ({to})")]
    ForbiddenMove { from: String, to: String },

    #[error("invalid document: {0}")]
    InvalidDoc(#[from] TypeError),

    /// First error raised while streaming content into a write session.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("indexer: {0}")]
    Indexer(IndexerError),

    #[error("write cancelled")]
    Cancelled,

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(BackendError),
}

impl VfsError {
    /// `true` for hash and size mismatches. These are terminal for a write;
    /// the content has to be resubmitted.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::HashMismatch { .. } | Self::SizeMismatch { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<BackendError> for VfsError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { path } => Self::NotFound(path),
            BackendError::AlreadyExists { path } => Self::AlreadyExists(path),
            BackendError::NonAbsolutePath { path } => Self::NonAbsolutePath(path),
            BackendError::Config(msg) => Self::Config(msg),
            other => Self::Backend(other),
        }
    }
}

impl From<IndexerError> for VfsError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::NotFound(what) => Self::NotFound(what),
            IndexerError::AlreadyExists(what) => Self::AlreadyExists(what),
            IndexerError::RevisionConflict { id, .. } => Self::Conflict(id.to_string()),
            other => Self::Indexer(other),
        }
    }
}

/// Convenience alias for VFS results.
pub type VfsResult<T> = Result<T, VfsError>;
