//! Backend selection from a storage URL.
//!
//! | URL                     | backend                                         |
//! |-------------------------|-------------------------------------------------|
//! | `file:///var/lib/data`  | [`LocalBackend`] rooted at `/var/lib/data/<domain>` |
//! | `mem://`                | [`InMemoryBackend`]                             |
//! | `swift://<container>`   | [`ObjectStoreBackend`] with objects under `<domain>/` |

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::{BackendError, BackendResult};
use crate::local::LocalBackend;
use crate::memory::InMemoryBackend;
use crate::object::{ObjectStoreBackend, ObjectStoreClient};
use crate::traits::Backend;

/// A parsed storage URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageUrl {
    File(PathBuf),
    Mem,
    Swift { container: String },
}

impl StorageUrl {
    pub fn parse(url: &str) -> BackendResult<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| BackendError::Config(format!("missing scheme in storage url: {url}")))?;
        match scheme {
            "file" => {
                if rest.is_empty() || !rest.starts_with('/') {
                    return Err(BackendError::Config(format!(
                        "please check the supplied fs url: {url}"
                    )));
                }
                Ok(Self::File(PathBuf::from(rest)))
            }
            "mem" => Ok(Self::Mem),
            "swift" => {
                let container = rest.trim_matches('/');
                if container.is_empty() || container.contains('/') {
                    return Err(BackendError::Config(format!(
                        "invalid container name in storage url: {url}"
                    )));
                }
                Ok(Self::Swift {
                    container: container.to_string(),
                })
            }
            other => Err(BackendError::Config(format!("unsupported scheme {other}"))),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Mem => "mem",
            Self::Swift { .. } => "swift",
        }
    }
}

/// Validate a tenant domain used to scope storage.
pub fn validate_domain(domain: &str) -> BackendResult<()> {
    if domain.is_empty() {
        return Err(BackendError::Config("specified domain is empty".into()));
    }
    if domain.contains('/') || domain == "." || domain == ".." {
        return Err(BackendError::Config(format!("invalid domain: {domain}")));
    }
    Ok(())
}

/// Build the backend for `url`, scoped to one tenant `domain`.
///
/// `swift://` URLs need a connected `object_client`; other schemes ignore it.
/// The returned backend has not been initialized (see [`Backend::init`]).
pub fn connect(
    url: &StorageUrl,
    domain: &str,
    object_client: Option<Arc<dyn ObjectStoreClient>>,
) -> BackendResult<Arc<dyn Backend>> {
    validate_domain(domain)?;
    let backend: Arc<dyn Backend> = match url {
        StorageUrl::File(root) => Arc::new(LocalBackend::new(root.join(domain))),
        StorageUrl::Mem => Arc::new(InMemoryBackend::new()),
        StorageUrl::Swift { container } => {
            let client = object_client.ok_or_else(|| {
                BackendError::Config("swift storage requires an object store client".into())
            })?;
            Arc::new(ObjectStoreBackend::with_prefix(client, container.clone(), domain))
        }
    };
    info!(scheme = url.scheme(), domain, "storage backend selected");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::InMemoryObjectStore;
    use crate::traits::BackendKind;

    #[test]
    fn parse_supported_schemes() {
        assert_eq!(
            StorageUrl::parse("file:///var/lib/cirrus").unwrap(),
            StorageUrl::File(PathBuf::from("/var/lib/cirrus"))
        );
        assert_eq!(StorageUrl::parse("mem://").unwrap(), StorageUrl::Mem);
        assert_eq!(
            StorageUrl::parse("swift://user-data").unwrap(),
            StorageUrl::Swift {
                container: "user-data".into()
            }
        );
    }

    #[test]
    fn parse_rejects_bad_urls() {
        assert!(StorageUrl::parse("file://").is_err());
        assert!(StorageUrl::parse("file://relative/path").is_err());
        assert!(StorageUrl::parse("s3://bucket").is_err());
        assert!(StorageUrl::parse("no-scheme").is_err());
        assert!(StorageUrl::parse("swift://").is_err());
    }

    #[test]
    fn domain_is_required() {
        assert!(connect(&StorageUrl::Mem, "", None).is_err());
        assert!(connect(&StorageUrl::Mem, "../up", None).is_err());
    }

    #[test]
    fn swift_needs_client() {
        let url = StorageUrl::parse("swift://c").unwrap();
        assert!(matches!(
            connect(&url, "tenant", None),
            Err(BackendError::Config(_))
        ));
        let client: Arc<dyn ObjectStoreClient> = Arc::new(InMemoryObjectStore::new());
        let backend = connect(&url, "tenant", Some(client)).unwrap();
        assert_eq!(backend.kind(), BackendKind::ObjectStore);
    }

    #[test]
    fn file_backend_is_scoped_to_domain() {
        let dir = tempfile::tempdir().unwrap();
        let url = StorageUrl::File(dir.path().to_path_buf());
        let backend = connect(&url, "alice.example", None).unwrap();
        backend.init().unwrap();
        assert!(dir.path().join("alice.example").is_dir());
    }
}
