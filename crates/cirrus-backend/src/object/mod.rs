//! Container-based object store support.
//!
//! - [`client`] -- the [`ObjectStoreClient`] trait: a flat object namespace per
//!   container with per-object headers, server-side move and bulk delete
//! - [`memory`] -- [`InMemoryObjectStore`], an in-process client
//! - [`backend`] -- [`ObjectStoreBackend`], the filesystem contract on top of a
//!   client, with directories emulated by name prefixes

pub mod backend;
pub mod client;
pub mod memory;

pub use backend::ObjectStoreBackend;
pub use client::{
    Headers, ObjectInfo, ObjectStoreClient, ObjectStoreError, ObjectStoreResult, PutOptions,
};
pub use memory::InMemoryObjectStore;
