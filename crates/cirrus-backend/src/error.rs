use thiserror::Error;

/// Errors surfaced by every backend.
///
/// Backend-native failures (OS errors, object-store client errors) are
/// translated into these kinds at the backend boundary so that callers can
/// match on them without knowing which backend is in use.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("path is not absolute: {path}")]
    NonAbsolutePath { path: String },

    #[error("directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store: {0}")]
    ObjectStore(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Translate an OS error raised by `op` on `path`.
    pub fn from_io(op: &'static str, path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(path),
            std::io::ErrorKind::AlreadyExists => Self::already_exists(path),
            _ => Self::Io {
                op,
                path: path.to_string(),
                source: err,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
