use std::path::Path;
use std::sync::Arc;

use cirrus_backend::{connect, ObjectStoreClient, StorageUrl};
use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::indexer::Indexer;
use crate::vfs::Vfs;

/// Where a tenant's files live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `file:///abs/root`, `mem://`, or `swift://<container>`.
    pub fs_url: String,
    /// Tenant domain; scopes the backend to one subtree or name prefix.
    pub domain: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fs_url: "mem://".to_string(),
            domain: "cirrus.localhost".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str(s).map_err(|e| VfsError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> VfsResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn url(&self) -> VfsResult<StorageUrl> {
        Ok(StorageUrl::parse(&self.fs_url)?)
    }

    /// Build the VFS for this tenant. `swift://` URLs need `object_client`.
    ///
    /// The returned VFS is not initialized (see [`Vfs::init`]).
    pub fn open(
        &self,
        indexer: Arc<dyn Indexer>,
        object_client: Option<Arc<dyn ObjectStoreClient>>,
    ) -> VfsResult<Vfs> {
        let backend = connect(&self.url()?, &self.domain, object_client)?;
        Ok(Vfs::new(backend, indexer))
    }
}
