//! Error types for bundle installation.

use cirrus_backend::{BackendError, BackendKind, ObjectStoreError};

/// Errors that can occur while installing or reading a bundle.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// `copy` or `commit` called on a copier that is not started. This is a
    /// programming error, not something to retry.
    #[error("copier must be started before {op}")]
    NotStarted { op: &'static str },

    #[error("invalid slug or version: {0}")]
    InvalidTarget(String),

    #[error("invalid file name in bundle: {0}")]
    InvalidFileName(String),

    /// The backend cannot rename a directory atomically.
    #[error("{0} backends cannot commit a bundle in one rename; use ObjectStoreCopier")]
    UnsupportedBackend(BackendKind),

    /// Another installer holds the commit lock of this version.
    #[error("another install of {app} is in progress")]
    InProgress { app: String },

    #[error("{slug}/{version} is not installed")]
    NotInstalled { slug: String, version: String },

    /// Promotion failed; the staged files were discarded.
    #[error("commit failed after promoting {promoted} of {total} files: {reason}")]
    CommitFailed {
        promoted: usize,
        total: usize,
        reason: String,
    },

    #[error("installed file {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("object store: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// `true` for errors that signal misuse of the copier API.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotStarted { .. })
    }
}

/// Convenience alias for install results.
pub type InstallResult<T> = Result<T, InstallError>;
