//! Bundle installation into a hierarchical backend.
//!
//! Files are written gzipped as `<name>.gz` inside `/<slug>/tmp-<random>/`.
//! Commit renames that directory to `/<slug>/<version>`; the existence of the
//! version directory is the completion marker.
//!
//! Only backends with an atomic directory rename qualify. Object stores move
//! a prefix object by object and are served by
//! [`ObjectStoreCopier`](crate::object::ObjectStoreCopier) instead.

use std::io::Read;
use std::sync::Arc;

use cirrus_backend::{path, Backend, BackendKind};
use tracing::{debug, info, warn};

use crate::copier::{
    gunzip, gzip_into, staging_name, validate_file_name, validate_target, Copier, CopierState,
    FileInfo,
};
use crate::error::{InstallError, InstallResult};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

pub struct FsCopier {
    backend: Arc<dyn Backend>,
    app_dir: String,
    tmp_dir: String,
    state: CopierState,
}

impl FsCopier {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            app_dir: String::new(),
            tmp_dir: String::new(),
            state: CopierState::Unstarted,
        }
    }

    /// Staging directory of the current install, empty before start.
    pub fn staging_dir(&self) -> &str {
        &self.tmp_dir
    }

    fn require_started(&self, op: &'static str) -> InstallResult<()> {
        if self.state != CopierState::Started {
            return Err(InstallError::NotStarted { op });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FsCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCopier")
            .field("backend", &self.backend.kind())
            .field("app", &self.app_dir)
            .field("state", &self.state)
            .finish()
    }
}

impl Copier for FsCopier {
    fn state(&self) -> CopierState {
        self.state
    }

    fn start(&mut self, slug: &str, version: &str) -> InstallResult<bool> {
        validate_target(slug, version)?;
        if self.backend.kind() == BackendKind::ObjectStore {
            return Err(InstallError::UnsupportedBackend(self.backend.kind()));
        }
        let slug_dir = format!("/{slug}");
        self.app_dir = path::join(&slug_dir, version);
        if self.backend.exists(&self.app_dir)? {
            self.state = CopierState::Exists;
            return Ok(true);
        }
        self.backend.create_dir_all(&slug_dir, DIR_MODE)?;
        let tmp_dir = path::join(&slug_dir, &staging_name());
        self.backend.create_dir(&tmp_dir, DIR_MODE)?;
        self.tmp_dir = tmp_dir;
        self.state = CopierState::Started;
        debug!(app = %self.app_dir, staging = %self.tmp_dir, "install started");
        Ok(false)
    }

    fn copy(&mut self, file: &FileInfo, src: &mut dyn Read) -> InstallResult<()> {
        self.require_started("copy")?;
        let name = validate_file_name(&file.name)?;
        let full = format!("{}.gz", path::join(&self.tmp_dir, &name));
        self.backend.create_dir_all(&path::parent(&full), DIR_MODE)?;
        let handle = self.backend.create_exclusive(&full, FILE_MODE)?;
        let (handle, length) = gzip_into(src, handle)?;
        handle.close()?;
        debug!(file = %full, length, "staged");
        Ok(())
    }

    fn commit(&mut self) -> InstallResult<()> {
        self.require_started("commit")?;
        if let Err(e) = self.backend.rename(&self.tmp_dir, &self.app_dir) {
            if let Err(abort) = self.abort() {
                warn!(staging = %self.tmp_dir, error = %abort, "abort after failed commit");
            }
            if e.is_already_exists() {
                info!(app = %self.app_dir, "version committed by another job");
                self.state = CopierState::Exists;
                return Ok(());
            }
            return Err(e.into());
        }
        self.state = CopierState::Committed;
        info!(backend = %self.backend.kind(), app = %self.app_dir, "install committed");
        Ok(())
    }

    fn abort(&mut self) -> InstallResult<()> {
        if self.tmp_dir.is_empty()
            || matches!(self.state, CopierState::Committed | CopierState::Exists)
        {
            return Ok(());
        }
        self.backend.remove_all(&self.tmp_dir)?;
        self.state = CopierState::Aborted;
        debug!(staging = %self.tmp_dir, "install aborted");
        Ok(())
    }

    fn read_file(&self, slug: &str, version: &str, name: &str) -> InstallResult<Vec<u8>> {
        validate_target(slug, version)?;
        let name = validate_file_name(name)?;
        let app_dir = format!("/{slug}/{version}");
        if !self.backend.exists(&app_dir)? {
            return Err(InstallError::NotInstalled {
                slug: slug.to_string(),
                version: version.to_string(),
            });
        }
        let data = self
            .backend
            .read_all(&format!("{}.gz", path::join(&app_dir, &name)))?;
        gunzip(&name, &data)
    }
}
