use std::collections::BTreeMap;

use thiserror::Error;

/// Per-object metadata headers.
pub type Headers = BTreeMap<String, String>;

/// Errors reported by an object store client.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("object not found: {container}/{name}")]
    ObjectNotFound { container: String, name: String },

    /// A conditional request (`if_none_match`) lost against an existing object.
    #[error("precondition failed: {container}/{name}")]
    PreconditionFailed { container: String, name: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result alias for object store client calls.
pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Description of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub headers: Headers,
}

/// Options for [`ObjectStoreClient::put_object`].
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub headers: Headers,
    /// Fail with [`ObjectStoreError::PreconditionFailed`] if the object
    /// already exists. The check and the write are atomic.
    pub if_none_match: bool,
}

/// A container-based object store (Swift-style API).
///
/// Object names are flat strings; `/` has no meaning to the store itself.
pub trait ObjectStoreClient: Send + Sync {
    fn container_exists(&self, container: &str) -> ObjectStoreResult<bool>;

    fn create_container(&self, container: &str) -> ObjectStoreResult<()>;

    fn head_object(&self, container: &str, name: &str) -> ObjectStoreResult<ObjectInfo>;

    fn get_object(&self, container: &str, name: &str) -> ObjectStoreResult<(ObjectInfo, Vec<u8>)>;

    fn put_object(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> ObjectStoreResult<()>;

    /// Replace the headers of an existing object without rewriting its data.
    fn set_object_headers(&self, container: &str, name: &str, headers: Headers) -> ObjectStoreResult<()>;

    /// Server-side move. Overwrites `to` if it exists.
    fn move_object(&self, container: &str, from: &str, to: &str) -> ObjectStoreResult<()>;

    fn delete_object(&self, container: &str, name: &str) -> ObjectStoreResult<()>;

    /// Delete many objects in one request. Missing names are ignored; returns
    /// the number of objects actually deleted.
    fn bulk_delete(&self, container: &str, names: &[String]) -> ObjectStoreResult<usize>;

    /// Every object name starting with `prefix`, sorted.
    fn list_names(&self, container: &str, prefix: &str) -> ObjectStoreResult<Vec<String>>;
}
