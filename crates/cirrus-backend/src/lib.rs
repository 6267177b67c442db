//! Storage backends for Cirrus.
//!
//! Every backend implements the [`Backend`] trait, one capability set over
//! three very different stores:
//!
//! - [`LocalBackend`] -- a directory of the host filesystem
//! - [`InMemoryBackend`] -- a `BTreeMap` filesystem for tests and embedding
//! - [`ObjectStoreBackend`] -- a container of a Swift-style object store, with
//!   directories emulated by name prefixes
//!
//! # Design Rules
//!
//! 1. Paths are absolute, `/`-separated, and normalized at the boundary.
//! 2. Backend-native errors are translated into [`BackendError`] kinds here;
//!    nothing above this crate sees an `io::ErrorKind` or a client error.
//! 3. `create_exclusive` and single-file `rename` keep the store's native
//!    atomicity. No other locking is provided.
//! 4. A backend is selected once, at construction (see [`connect`]).

pub mod connect;
pub mod error;
pub mod local;
pub mod memory;
pub mod object;
pub mod path;
pub mod traits;

pub use connect::{connect, validate_domain, StorageUrl};
pub use error::{BackendError, BackendResult};
pub use local::LocalBackend;
pub use memory::InMemoryBackend;
pub use object::{
    Headers, InMemoryObjectStore, ObjectInfo, ObjectStoreBackend, ObjectStoreClient,
    ObjectStoreError, ObjectStoreResult, PutOptions,
};
pub use traits::{Backend, BackendKind, FileKind, ReadStream, Stat, WriteHandle};

/// The same contract checks, run against every backend.
#[cfg(test)]
mod conformance {
    use std::io::{Read, Write};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn backends() -> Vec<(Option<tempfile::TempDir>, Arc<dyn Backend>)> {
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn Backend> = Arc::new(LocalBackend::new(dir.path().join("tenant")));
        let memory: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let object: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::with_prefix(
            Arc::new(InMemoryObjectStore::new()),
            "data",
            "tenant",
        ));
        let all = vec![(Some(dir), local), (None, memory), (None, object)];
        for (_, backend) in &all {
            backend.init().unwrap();
        }
        all
    }

    fn write_file(backend: &dyn Backend, path: &str, data: &[u8]) {
        let mut handle = backend.create_exclusive(path, 0o644).unwrap();
        handle.write_all(data).unwrap();
        handle.close().unwrap();
    }

    #[test]
    fn write_then_read_round_trips() {
        for (_guard, backend) in backends() {
            let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
            write_file(backend.as_ref(), "/blob.bin", &data);

            let mut back = Vec::new();
            backend.open("/blob.bin").unwrap().read_to_end(&mut back).unwrap();
            assert_eq!(back, data, "{:?}", backend.kind());
            let stat = backend.stat("/blob.bin").unwrap();
            assert!(stat.is_file());
            assert_eq!(stat.size, data.len() as u64);
        }
    }

    #[test]
    fn missing_paths_are_not_found() {
        for (_guard, backend) in backends() {
            let kind = backend.kind();
            assert!(backend.open("/nope").err().unwrap().is_not_found(), "{kind:?}");
            assert!(backend.stat("/nope").unwrap_err().is_not_found(), "{kind:?}");
            assert!(backend.remove("/nope").unwrap_err().is_not_found(), "{kind:?}");
            assert!(backend.rename("/nope", "/other").unwrap_err().is_not_found(), "{kind:?}");
            assert!(!backend.exists("/nope").unwrap());
            backend.remove_all("/nope").unwrap();
        }
    }

    #[test]
    fn relative_paths_are_rejected() {
        for (_guard, backend) in backends() {
            assert!(matches!(
                backend.stat("relative"),
                Err(BackendError::NonAbsolutePath { .. })
            ));
        }
    }

    #[test]
    fn create_exclusive_refuses_existing() {
        for (_guard, backend) in backends() {
            write_file(backend.as_ref(), "/once", b"first");
            let err = backend.create_exclusive("/once", 0o644).err().unwrap();
            assert!(err.is_already_exists(), "{:?}: {err}", backend.kind());
            assert_eq!(backend.read_all("/once").unwrap(), b"first");
        }
    }

    #[test]
    fn create_exclusive_requires_parent() {
        for (_guard, backend) in backends() {
            let err = backend.create_exclusive("/no/such/dir/file", 0o644).err().unwrap();
            assert!(err.is_not_found(), "{:?}: {err}", backend.kind());
        }
    }

    #[test]
    fn rename_refuses_existing_destination() {
        for (_guard, backend) in backends() {
            write_file(backend.as_ref(), "/a", b"a");
            write_file(backend.as_ref(), "/b", b"b");
            assert!(backend.rename("/a", "/b").unwrap_err().is_already_exists());
            assert_eq!(backend.read_all("/b").unwrap(), b"b");

            backend.rename("/a", "/c").unwrap();
            assert!(!backend.exists("/a").unwrap());
            assert_eq!(backend.read_all("/c").unwrap(), b"a");
        }
    }

    #[test]
    fn rename_directory_carries_children() {
        for (_guard, backend) in backends() {
            backend.create_dir_all("/src/nested", 0o755).unwrap();
            write_file(backend.as_ref(), "/src/nested/f.txt", b"deep");
            backend.rename("/src", "/dst").unwrap();
            assert!(!backend.exists("/src").unwrap(), "{:?}", backend.kind());
            assert!(backend.stat("/dst/nested").unwrap().is_dir());
            assert_eq!(backend.read_all("/dst/nested/f.txt").unwrap(), b"deep");
        }
    }

    #[test]
    fn rename_into_own_subtree_fails() {
        for (_guard, backend) in backends() {
            backend.create_dir_all("/a/b", 0o755).unwrap();
            assert!(backend.rename("/a", "/a/b/a").is_err());
            assert!(backend.stat("/a/b").unwrap().is_dir());
        }
    }

    #[test]
    fn remove_refuses_non_empty_directory() {
        for (_guard, backend) in backends() {
            backend.create_dir("/d", 0o755).unwrap();
            write_file(backend.as_ref(), "/d/f", b"x");
            assert!(matches!(backend.remove("/d"), Err(BackendError::NotEmpty { .. })));
            backend.remove("/d/f").unwrap();
            backend.remove("/d").unwrap();
            assert!(!backend.exists("/d").unwrap());
        }
    }

    #[test]
    fn remove_all_clears_subtree_only() {
        for (_guard, backend) in backends() {
            backend.create_dir_all("/tree/x/y", 0o755).unwrap();
            write_file(backend.as_ref(), "/tree/x/y/z", b"z");
            write_file(backend.as_ref(), "/tree-sibling", b"keep");
            backend.remove_all("/tree").unwrap();
            assert!(!backend.exists("/tree").unwrap(), "{:?}", backend.kind());
            assert!(!backend.exists("/tree/x/y/z").unwrap());
            assert_eq!(backend.read_all("/tree-sibling").unwrap(), b"keep");
        }
    }

    #[test]
    fn create_dir_semantics() {
        for (_guard, backend) in backends() {
            backend.create_dir("/d", 0o755).unwrap();
            assert!(backend.create_dir("/d", 0o755).unwrap_err().is_already_exists());
            assert!(backend.create_dir("/x/y", 0o755).unwrap_err().is_not_found());
            backend.create_dir_all("/d/e/f", 0o755).unwrap();
            backend.create_dir_all("/d/e/f", 0o755).unwrap();
            assert!(backend.stat("/d/e").unwrap().is_dir());
        }
    }

    #[test]
    fn racing_exclusive_creates_have_one_winner() {
        for (_guard, backend) in backends() {
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let backend = Arc::clone(&backend);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        match backend.create_exclusive("/contended", 0o644) {
                            Ok(mut handle) => {
                                handle.write_all(format!("writer-{i}").as_bytes()).unwrap();
                                handle.close().unwrap();
                                true
                            }
                            Err(e) => {
                                assert!(e.is_already_exists(), "unexpected error: {e}");
                                false
                            }
                        }
                    })
                })
                .collect();
            let winners = handles
                .into_iter()
                .map(|h| h.join().expect("thread should not panic"))
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "{:?}", backend.kind());
        }
    }
}
