use std::io::{self, Cursor, Write};
use std::sync::Arc;

use tracing::debug;

use super::client::{Headers, ObjectStoreClient, ObjectStoreError, PutOptions};
use crate::error::{BackendError, BackendResult};
use crate::path;
use crate::traits::{
    is_a_directory, move_into_itself, not_a_directory, Backend, BackendKind, FileKind, ReadStream,
    Stat, WriteHandle,
};

/// Header carrying an entry's permission bits, in octal.
pub const MODE_HEADER: &str = "file-mode";

/// Content type of directory marker objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Filesystem contract on top of a flat object namespace.
///
/// A file at `/a/b` is the object `<prefix>a/b`. A directory is either an
/// explicit zero-byte marker object `<prefix>a/` or implied by any object
/// whose name starts with that marker. Renaming a directory moves every
/// object under it one by one: it is not atomic, and an interrupted rename
/// leaves the subtree split between both names.
pub struct ObjectStoreBackend {
    client: Arc<dyn ObjectStoreClient>,
    container: String,
    prefix: String,
}

impl ObjectStoreBackend {
    /// Backend over a whole container.
    pub fn new(client: Arc<dyn ObjectStoreClient>, container: impl Into<String>) -> Self {
        Self::with_prefix(client, container, "")
    }

    /// Backend confined to the objects of `container` whose names start with
    /// `prefix` (typically one tenant's domain).
    pub fn with_prefix(
        client: Arc<dyn ObjectStoreClient>,
        container: impl Into<String>,
        prefix: &str,
    ) -> Self {
        let prefix = prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        Self {
            client,
            container: container.into(),
            prefix,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn client(&self) -> &Arc<dyn ObjectStoreClient> {
        &self.client
    }

    fn object_name(&self, clean: &str) -> String {
        format!("{}{}", self.prefix, clean.trim_start_matches('/'))
    }

    fn dir_marker(&self, clean: &str) -> String {
        if clean == "/" {
            self.prefix.clone()
        } else {
            format!("{}/", self.object_name(clean))
        }
    }

    fn translate(&self, clean: &str, err: ObjectStoreError) -> BackendError {
        match err {
            ObjectStoreError::ContainerNotFound(_) | ObjectStoreError::ObjectNotFound { .. } => {
                BackendError::not_found(clean)
            }
            ObjectStoreError::PreconditionFailed { .. } => BackendError::already_exists(clean),
            ObjectStoreError::Transport(msg) => BackendError::ObjectStore(msg),
        }
    }

    /// What exists at `clean`, if anything.
    fn lookup(&self, clean: &str) -> BackendResult<Option<Stat>> {
        if clean == "/" {
            return Ok(Some(Stat {
                kind: FileKind::Dir,
                size: 0,
                mode: DEFAULT_DIR_MODE,
            }));
        }
        match self.client.head_object(&self.container, &self.object_name(clean)) {
            Ok(info) => {
                return Ok(Some(Stat {
                    kind: FileKind::File,
                    size: info.size,
                    mode: parse_mode(&info.headers, DEFAULT_FILE_MODE),
                }))
            }
            Err(ObjectStoreError::ObjectNotFound { .. }) => {}
            Err(ObjectStoreError::ContainerNotFound(_)) => return Ok(None),
            Err(e) => return Err(self.translate(clean, e)),
        }
        let marker = self.dir_marker(clean);
        match self.client.head_object(&self.container, &marker) {
            Ok(info) => {
                return Ok(Some(Stat {
                    kind: FileKind::Dir,
                    size: 0,
                    mode: parse_mode(&info.headers, DEFAULT_DIR_MODE),
                }))
            }
            Err(ObjectStoreError::ObjectNotFound { .. }) => {}
            Err(e) => return Err(self.translate(clean, e)),
        }
        let implied = !self.list(clean, &marker)?.is_empty();
        Ok(implied.then_some(Stat {
            kind: FileKind::Dir,
            size: 0,
            mode: DEFAULT_DIR_MODE,
        }))
    }

    fn list(&self, clean: &str, prefix: &str) -> BackendResult<Vec<String>> {
        match self.client.list_names(&self.container, prefix) {
            Ok(names) => Ok(names),
            Err(ObjectStoreError::ContainerNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(self.translate(clean, e)),
        }
    }

    fn require_parent_dir(&self, clean: &str) -> BackendResult<()> {
        let parent = path::parent(clean);
        match self.lookup(&parent)? {
            Some(stat) if stat.is_dir() => Ok(()),
            Some(_) => Err(not_a_directory("lookup", &parent)),
            None => Err(BackendError::not_found(parent)),
        }
    }

    fn put_marker(&self, clean: &str, mode: u32, if_none_match: bool) -> BackendResult<()> {
        let options = PutOptions {
            content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
            headers: mode_headers(mode),
            if_none_match,
        };
        self.client
            .put_object(&self.container, &self.dir_marker(clean), Vec::new(), &options)
            .map_err(|e| self.translate(clean, e))
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn mode_headers(mode: u32) -> Headers {
    let mut headers = Headers::new();
    headers.insert(MODE_HEADER.to_string(), format!("{mode:o}"));
    headers
}

fn parse_mode(headers: &Headers, default: u32) -> u32 {
    headers
        .get(MODE_HEADER)
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .unwrap_or(default)
}

impl Backend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn init(&self) -> BackendResult<()> {
        let exists = self
            .client
            .container_exists(&self.container)
            .map_err(|e| self.translate("/", e))?;
        if !exists {
            debug!(container = %self.container, "creating container");
            self.client
                .create_container(&self.container)
                .map_err(|e| self.translate("/", e))?;
        }
        if !self.prefix.is_empty() {
            match self.put_marker("/", DEFAULT_DIR_MODE, true) {
                Ok(()) | Err(BackendError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn open(&self, p: &str) -> BackendResult<ReadStream> {
        let clean = path::absolute(p)?;
        match self.client.get_object(&self.container, &self.object_name(&clean)) {
            Ok((_, data)) => Ok(Box::new(Cursor::new(data))),
            Err(ObjectStoreError::ObjectNotFound { .. }) if self.lookup(&clean)?.is_some() => {
                Err(is_a_directory(&clean))
            }
            Err(e) => Err(self.translate(&clean, e)),
        }
    }

    fn create_exclusive(&self, p: &str, mode: u32) -> BackendResult<Box<dyn WriteHandle>> {
        let clean = path::absolute(p)?;
        self.require_parent_dir(&clean)?;
        if self.lookup(&clean)?.is_some() {
            return Err(BackendError::already_exists(clean));
        }
        // Reserve the name with an empty placeholder; the conditional put
        // decides the winner between racing creators.
        let name = self.object_name(&clean);
        let options = PutOptions {
            content_type: None,
            headers: mode_headers(mode),
            if_none_match: true,
        };
        self.client
            .put_object(&self.container, &name, Vec::new(), &options)
            .map_err(|e| self.translate(&clean, e))?;
        debug!(container = %self.container, object = %name, "reserved object");
        Ok(Box::new(ObjectWriteHandle {
            client: Arc::clone(&self.client),
            container: self.container.clone(),
            name,
            path: clean,
            mode,
            buf: Vec::new(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let from = path::absolute(from)?;
        let to = path::absolute(to)?;
        if path::is_descendant(&to, &from) {
            return Err(move_into_itself(&from, &to));
        }
        let source = self
            .lookup(&from)?
            .ok_or_else(|| BackendError::not_found(&from))?;
        if self.lookup(&to)?.is_some() {
            return Err(BackendError::already_exists(to));
        }
        self.require_parent_dir(&to)?;

        if source.is_file() {
            return self
                .client
                .move_object(&self.container, &self.object_name(&from), &self.object_name(&to))
                .map_err(|e| self.translate(&from, e));
        }
        let from_marker = self.dir_marker(&from);
        let to_marker = self.dir_marker(&to);
        for name in self.list(&from, &from_marker)? {
            let target = format!("{to_marker}{}", &name[from_marker.len()..]);
            self.client
                .move_object(&self.container, &name, &target)
                .map_err(|e| self.translate(&from, e))?;
        }
        Ok(())
    }

    fn remove(&self, p: &str) -> BackendResult<()> {
        let clean = path::absolute(p)?;
        let stat = self
            .lookup(&clean)?
            .ok_or_else(|| BackendError::not_found(&clean))?;
        if stat.is_file() {
            return self
                .client
                .delete_object(&self.container, &self.object_name(&clean))
                .map_err(|e| self.translate(&clean, e));
        }
        let marker = self.dir_marker(&clean);
        if self.list(&clean, &marker)?.iter().any(|n| *n != marker) {
            return Err(BackendError::NotEmpty { path: clean });
        }
        if clean == "/" {
            return Ok(());
        }
        match self.client.delete_object(&self.container, &marker) {
            // Implied directories have no marker to delete.
            Ok(()) | Err(ObjectStoreError::ObjectNotFound { .. }) => Ok(()),
            Err(e) => Err(self.translate(&clean, e)),
        }
    }

    fn remove_all(&self, p: &str) -> BackendResult<()> {
        let clean = path::absolute(p)?;
        let mut names = self.list(&clean, &self.dir_marker(&clean))?;
        if clean != "/" {
            names.push(self.object_name(&clean));
        } else {
            // Keep the tenant's root marker.
            names.retain(|n| *n != self.prefix);
        }
        if names.is_empty() {
            return Ok(());
        }
        match self.client.bulk_delete(&self.container, &names) {
            Ok(count) => {
                debug!(path = %clean, count, "bulk deleted objects");
                Ok(())
            }
            Err(ObjectStoreError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(self.translate(&clean, e)),
        }
    }

    fn create_dir(&self, p: &str, mode: u32) -> BackendResult<()> {
        let clean = path::absolute(p)?;
        if self.lookup(&clean)?.is_some() {
            return Err(BackendError::already_exists(clean));
        }
        self.require_parent_dir(&clean)?;
        self.put_marker(&clean, mode, true)
    }

    fn create_dir_all(&self, p: &str, mode: u32) -> BackendResult<()> {
        let clean = path::absolute(p)?;
        let mut chain = path::ancestors(&clean);
        chain.push(clean);
        for dir in chain.iter().filter(|d| d.as_str() != "/") {
            match self.lookup(dir)? {
                Some(stat) if stat.is_dir() => {}
                Some(_) => return Err(not_a_directory("mkdir", dir)),
                None => match self.put_marker(dir, mode, true) {
                    Ok(()) | Err(BackendError::AlreadyExists { .. }) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn stat(&self, p: &str) -> BackendResult<Stat> {
        let clean = path::absolute(p)?;
        self.lookup(&clean)?
            .ok_or_else(|| BackendError::not_found(clean))
    }

    fn set_mode(&self, p: &str, mode: u32) -> BackendResult<()> {
        let clean = path::absolute(p)?;
        let stat = self
            .lookup(&clean)?
            .ok_or_else(|| BackendError::not_found(&clean))?;
        if clean == "/" {
            return Ok(());
        }
        let name = if stat.is_file() {
            self.object_name(&clean)
        } else {
            self.dir_marker(&clean)
        };
        match self.client.head_object(&self.container, &name) {
            Ok(info) => {
                let mut headers = info.headers;
                headers.insert(MODE_HEADER.to_string(), format!("{mode:o}"));
                self.client
                    .set_object_headers(&self.container, &name, headers)
                    .map_err(|e| self.translate(&clean, e))
            }
            Err(ObjectStoreError::ObjectNotFound { .. }) if stat.is_dir() => {
                self.put_marker(&clean, mode, false)
            }
            Err(e) => Err(self.translate(&clean, e)),
        }
    }
}

/// Buffers content and uploads it over the reserved placeholder on close.
struct ObjectWriteHandle {
    client: Arc<dyn ObjectStoreClient>,
    container: String,
    name: String,
    path: String,
    mode: u32,
    buf: Vec<u8>,
}

impl Write for ObjectWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteHandle for ObjectWriteHandle {
    fn close(self: Box<Self>) -> BackendResult<()> {
        let ObjectWriteHandle {
            client,
            container,
            name,
            path,
            mode,
            buf,
        } = *self;
        let not_found = |_| BackendError::not_found(&path);
        // The placeholder disappearing means someone removed the file.
        client.head_object(&container, &name).map_err(not_found)?;
        let options = PutOptions {
            content_type: None,
            headers: mode_headers(mode),
            if_none_match: false,
        };
        client
            .put_object(&container, &name, buf, &options)
            .map_err(|e| match e {
                ObjectStoreError::Transport(msg) => BackendError::ObjectStore(msg),
                _ => BackendError::not_found(&path),
            })
    }
}
