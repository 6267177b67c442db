use std::fmt;
use std::io::{Read, Write};

use serde::Serialize;

use crate::error::{BackendError, BackendResult};

/// Which family of store a backend talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    Local,
    Memory,
    ObjectStore,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Memory => write!(f, "memory"),
            Self::ObjectStore => write!(f, "object-store"),
        }
    }
}

/// Kind of entry found at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FileKind {
    File,
    Dir,
}

/// Result of [`Backend::stat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits (`0o644`, `0o755`, ...).
    pub mode: u32,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// Readable content stream returned by [`Backend::open`].
pub type ReadStream = Box<dyn Read + Send>;

/// Writable handle returned by [`Backend::create_exclusive`].
///
/// Content is only guaranteed to be durable and visible once `close` has
/// returned `Ok`. Dropping a handle without closing it releases the
/// underlying resource but leaves the written content unspecified.
pub trait WriteHandle: Write + Send {
    fn close(self: Box<Self>) -> BackendResult<()>;
}

/// The capability set every storage backend provides.
///
/// All paths are absolute and `/`-separated; implementations normalize them
/// and reject relative ones with [`BackendError::NonAbsolutePath`].
///
/// Implementations must preserve the atomicity of `create_exclusive` (exactly
/// one of several racing creators wins) and of `rename` for single files.
/// No other locking is provided.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Prepare the store (root directory, container, ...). Idempotent.
    fn init(&self) -> BackendResult<()>;

    /// Open a file for reading.
    ///
    /// Returns [`BackendError::NotFound`] if nothing exists at `path`.
    fn open(&self, path: &str) -> BackendResult<ReadStream>;

    /// Create a new file, failing with [`BackendError::AlreadyExists`] if
    /// anything is already present at `path`. The parent must exist.
    fn create_exclusive(&self, path: &str, mode: u32) -> BackendResult<Box<dyn WriteHandle>>;

    /// Move a file or directory. The destination must not exist.
    fn rename(&self, from: &str, to: &str) -> BackendResult<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &str) -> BackendResult<()>;

    /// Remove `path` and everything beneath it. Missing paths are not an error.
    fn remove_all(&self, path: &str) -> BackendResult<()>;

    /// Create a single directory. The parent must exist.
    fn create_dir(&self, path: &str, mode: u32) -> BackendResult<()>;

    /// Create a directory and all missing ancestors.
    fn create_dir_all(&self, path: &str, mode: u32) -> BackendResult<()>;

    fn stat(&self, path: &str) -> BackendResult<Stat>;

    /// Change the permission bits of an existing entry.
    fn set_mode(&self, path: &str, mode: u32) -> BackendResult<()>;

    fn exists(&self, path: &str) -> BackendResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole file into memory.
    fn read_all(&self, path: &str) -> BackendResult<Vec<u8>> {
        let mut stream = self.open(path)?;
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|e| BackendError::from_io("read", path, e))?;
        Ok(data)
    }
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind()).finish()
    }
}

pub(crate) fn is_a_directory(path: &str) -> BackendError {
    BackendError::Io {
        op: "open",
        path: path.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "is a directory"),
    }
}

pub(crate) fn not_a_directory(op: &'static str, path: &str) -> BackendError {
    BackendError::Io {
        op,
        path: path.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
    }
}

pub(crate) fn move_into_itself(from: &str, to: &str) -> BackendError {
    BackendError::Io {
        op: "rename",
        path: from.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cannot move into its own subtree: {to}"),
        ),
    }
}
