//! Backend rooted in a directory of the host filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::path;
use crate::traits::{
    is_a_directory, move_into_itself, Backend, BackendKind, FileKind, ReadStream, Stat, WriteHandle,
};

/// Filesystem backend confined to `root`.
///
/// Backend paths are normalized before being joined onto the root, so `..`
/// components can never escape it.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a backend path and map it onto the host filesystem.
    fn resolve(&self, p: &str) -> BackendResult<(String, PathBuf)> {
        let clean = path::absolute(p)?;
        let rel = clean.trim_start_matches('/');
        let host = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        Ok((clean, host))
    }

    fn metadata(&self, clean: &str, host: &Path) -> BackendResult<fs::Metadata> {
        fs::metadata(host).map_err(|e| BackendError::from_io("stat", clean, e))
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn init(&self) -> BackendResult<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| BackendError::from_io("mkdir", &self.root.display().to_string(), e))
    }

    fn open(&self, p: &str) -> BackendResult<ReadStream> {
        let (clean, host) = self.resolve(p)?;
        if self.metadata(&clean, &host)?.is_dir() {
            return Err(is_a_directory(&clean));
        }
        let file = File::open(&host).map_err(|e| BackendError::from_io("open", &clean, e))?;
        Ok(Box::new(file))
    }

    fn create_exclusive(&self, p: &str, mode: u32) -> BackendResult<Box<dyn WriteHandle>> {
        let (clean, host) = self.resolve(p)?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let file = options
            .open(&host)
            .map_err(|e| BackendError::from_io("create", &clean, e))?;
        debug!(path = %clean, "created file");
        Ok(Box::new(LocalWriteHandle {
            writer: BufWriter::new(file),
            path: clean,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let (from, from_host) = self.resolve(from)?;
        let (to, to_host) = self.resolve(to)?;
        if path::is_descendant(&to, &from) {
            return Err(move_into_itself(&from, &to));
        }
        let meta = self.metadata(&from, &from_host)?;
        if meta.is_file() {
            // Linking fails atomically on an existing destination, unlike rename(2).
            match fs::hard_link(&from_host, &to_host) {
                Ok(()) => {
                    return fs::remove_file(&from_host)
                        .map_err(|e| BackendError::from_io("rename", &from, e));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound
                    ) =>
                {
                    return Err(BackendError::from_io("rename", &to, e));
                }
                Err(e) => debug!(path = %to, error = %e, "hard links unsupported, renaming"),
            }
        }
        // std::fs::rename silently replaces an existing file, or an empty
        // directory, on unix. A destination created after this check is lost.
        match fs::symlink_metadata(&to_host) {
            Ok(_) => return Err(BackendError::already_exists(to)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BackendError::from_io("stat", &to, e)),
        }
        fs::rename(&from_host, &to_host).map_err(|e| BackendError::from_io("rename", &from, e))
    }

    fn remove(&self, p: &str) -> BackendResult<()> {
        let (clean, host) = self.resolve(p)?;
        if self.metadata(&clean, &host)?.is_dir() {
            let mut entries =
                fs::read_dir(&host).map_err(|e| BackendError::from_io("readdir", &clean, e))?;
            if entries.next().is_some() {
                return Err(BackendError::NotEmpty { path: clean });
            }
            fs::remove_dir(&host).map_err(|e| BackendError::from_io("rmdir", &clean, e))
        } else {
            fs::remove_file(&host).map_err(|e| BackendError::from_io("remove", &clean, e))
        }
    }

    fn remove_all(&self, p: &str) -> BackendResult<()> {
        let (clean, host) = self.resolve(p)?;
        let meta = match fs::symlink_metadata(&host) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BackendError::from_io("stat", &clean, e)),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(&host)
        } else {
            fs::remove_file(&host)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::from_io("remove_all", &clean, e)),
        }
    }

    fn create_dir(&self, p: &str, mode: u32) -> BackendResult<()> {
        let (clean, host) = self.resolve(p)?;
        fs::create_dir(&host).map_err(|e| BackendError::from_io("mkdir", &clean, e))?;
        set_host_mode(&clean, &host, mode)
    }

    fn create_dir_all(&self, p: &str, mode: u32) -> BackendResult<()> {
        let (clean, host) = self.resolve(p)?;
        if host.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&host).map_err(|e| BackendError::from_io("mkdir", &clean, e))?;
        set_host_mode(&clean, &host, mode)
    }

    fn stat(&self, p: &str) -> BackendResult<Stat> {
        let (clean, host) = self.resolve(p)?;
        let meta = self.metadata(&clean, &host)?;
        Ok(Stat {
            kind: if meta.is_dir() { FileKind::Dir } else { FileKind::File },
            size: if meta.is_dir() { 0 } else { meta.len() },
            mode: host_mode(&meta),
        })
    }

    fn set_mode(&self, p: &str, mode: u32) -> BackendResult<()> {
        let (clean, host) = self.resolve(p)?;
        self.metadata(&clean, &host)?;
        set_host_mode(&clean, &host, mode)
    }
}

#[cfg(unix)]
fn host_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn host_mode(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(unix)]
fn set_host_mode(clean: &str, host: &Path, mode: u32) -> BackendResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(host, fs::Permissions::from_mode(mode))
        .map_err(|e| BackendError::from_io("chmod", clean, e))
}

#[cfg(not(unix))]
fn set_host_mode(_clean: &str, _host: &Path, _mode: u32) -> BackendResult<()> {
    Ok(())
}

struct LocalWriteHandle {
    writer: BufWriter<File>,
    path: String,
}

impl Write for LocalWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl WriteHandle for LocalWriteHandle {
    fn close(self: Box<Self>) -> BackendResult<()> {
        let LocalWriteHandle { writer, path } = *self;
        let file = writer
            .into_inner()
            .map_err(|e| BackendError::from_io("flush", &path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| BackendError::from_io("sync", &path, e))
    }
}
