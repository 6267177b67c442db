use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::client::{
    Headers, ObjectInfo, ObjectStoreClient, ObjectStoreError, ObjectStoreResult, PutOptions,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    headers: Headers,
}

impl StoredObject {
    fn info(&self, name: &str) -> ObjectInfo {
        ObjectInfo {
            name: name.to_string(),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            headers: self.headers.clone(),
        }
    }
}

type Container = BTreeMap<String, StoredObject>;

/// In-process object store client.
///
/// Intended for tests and embedding. Containers are `BTreeMap`s behind a
/// single `RwLock`, so conditional puts and moves are atomic.
pub struct InMemoryObjectStore {
    containers: RwLock<HashMap<String, Container>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects in a container (0 if it does not exist).
    pub fn len(&self, container: &str) -> usize {
        self.containers
            .read()
            .expect("lock poisoned")
            .get(container)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, container: &str) -> bool {
        self.len(container) == 0
    }

    /// Total bytes stored in a container.
    pub fn total_bytes(&self, container: &str) -> u64 {
        self.containers
            .read()
            .expect("lock poisoned")
            .get(container)
            .map(|c| c.values().map(|o| o.data.len() as u64).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.containers.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryObjectStore")
            .field("container_count", &count)
            .finish()
    }
}

fn missing_container(container: &str) -> ObjectStoreError {
    ObjectStoreError::ContainerNotFound(container.to_string())
}

fn missing_object(container: &str, name: &str) -> ObjectStoreError {
    ObjectStoreError::ObjectNotFound {
        container: container.to_string(),
        name: name.to_string(),
    }
}

impl ObjectStoreClient for InMemoryObjectStore {
    fn container_exists(&self, container: &str) -> ObjectStoreResult<bool> {
        Ok(self
            .containers
            .read()
            .expect("lock poisoned")
            .contains_key(container))
    }

    fn create_container(&self, container: &str) -> ObjectStoreResult<()> {
        self.containers
            .write()
            .expect("lock poisoned")
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    fn head_object(&self, container: &str, name: &str) -> ObjectStoreResult<ObjectInfo> {
        let map = self.containers.read().expect("lock poisoned");
        let c = map.get(container).ok_or_else(|| missing_container(container))?;
        c.get(name)
            .map(|o| o.info(name))
            .ok_or_else(|| missing_object(container, name))
    }

    fn get_object(&self, container: &str, name: &str) -> ObjectStoreResult<(ObjectInfo, Vec<u8>)> {
        let map = self.containers.read().expect("lock poisoned");
        let c = map.get(container).ok_or_else(|| missing_container(container))?;
        c.get(name)
            .map(|o| (o.info(name), o.data.clone()))
            .ok_or_else(|| missing_object(container, name))
    }

    fn put_object(
        &self,
        container: &str,
        name: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> ObjectStoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        let c = map
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        if options.if_none_match && c.contains_key(name) {
            return Err(ObjectStoreError::PreconditionFailed {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        c.insert(
            name.to_string(),
            StoredObject {
                data,
                content_type,
                headers: options.headers.clone(),
            },
        );
        Ok(())
    }

    fn set_object_headers(&self, container: &str, name: &str, headers: Headers) -> ObjectStoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        let c = map
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        let obj = c.get_mut(name).ok_or_else(|| missing_object(container, name))?;
        obj.headers = headers;
        Ok(())
    }

    fn move_object(&self, container: &str, from: &str, to: &str) -> ObjectStoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        let c = map
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        let obj = c.remove(from).ok_or_else(|| missing_object(container, from))?;
        c.insert(to.to_string(), obj);
        Ok(())
    }

    fn delete_object(&self, container: &str, name: &str) -> ObjectStoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        let c = map
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        c.remove(name)
            .map(|_| ())
            .ok_or_else(|| missing_object(container, name))
    }

    fn bulk_delete(&self, container: &str, names: &[String]) -> ObjectStoreResult<usize> {
        let mut map = self.containers.write().expect("lock poisoned");
        let c = map
            .get_mut(container)
            .ok_or_else(|| missing_container(container))?;
        Ok(names.iter().filter(|n| c.remove(n.as_str()).is_some()).count())
    }

    fn list_names(&self, container: &str, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let map = self.containers.read().expect("lock poisoned");
        let c = map.get(container).ok_or_else(|| missing_container(container))?;
        Ok(c.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store.create_container("apps").unwrap();
        store
    }

    #[test]
    fn put_and_get() {
        let store = store();
        let mut options = PutOptions::default();
        options.headers.insert("k".into(), "v".into());
        store.put_object("apps", "a/b", b"data".to_vec(), &options).unwrap();

        let (info, data) = store.get_object("apps", "a/b").unwrap();
        assert_eq!(data, b"data");
        assert_eq!(info.size, 4);
        assert_eq!(info.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(info.headers.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn conditional_put_loses_against_existing() {
        let store = store();
        let options = PutOptions {
            if_none_match: true,
            ..PutOptions::default()
        };
        store.put_object("apps", "x", vec![], &options).unwrap();
        let err = store.put_object("apps", "x", vec![1], &options).unwrap_err();
        assert!(matches!(err, ObjectStoreError::PreconditionFailed { .. }));
    }

    #[test]
    fn missing_container_and_object() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.head_object("nope", "x"),
            Err(ObjectStoreError::ContainerNotFound(_))
        ));
        store.create_container("c").unwrap();
        assert!(matches!(
            store.head_object("c", "x"),
            Err(ObjectStoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn list_by_prefix_and_bulk_delete() {
        let store = store();
        for name in ["tmp-1/a", "tmp-1/b/c", "tmp-2/a", "weather/1.0.0"] {
            store.put_object("apps", name, vec![0], &PutOptions::default()).unwrap();
        }
        let names = store.list_names("apps", "tmp-1/").unwrap();
        assert_eq!(names, vec!["tmp-1/a".to_string(), "tmp-1/b/c".to_string()]);

        let deleted = store
            .bulk_delete("apps", &[names[0].clone(), names[1].clone(), "ghost".into()])
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len("apps"), 2);
    }

    #[test]
    fn move_overwrites_destination() {
        let store = store();
        store.put_object("apps", "src", b"new".to_vec(), &PutOptions::default()).unwrap();
        store.put_object("apps", "dst", b"old".to_vec(), &PutOptions::default()).unwrap();
        store.move_object("apps", "src", "dst").unwrap();
        assert_eq!(store.get_object("apps", "dst").unwrap().1, b"new");
        assert!(store.head_object("apps", "src").is_err());
        assert_eq!(store.total_bytes("apps"), 3);
    }
}
