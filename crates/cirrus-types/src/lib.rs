//! Foundation types for Cirrus storage.
//!
//! This crate provides the document and identity types shared by every other
//! Cirrus crate. Documents are owned by an external indexer; the storage core
//! only reads and mutates them through that indexer.
//!
//! # Key Types
//!
//! - [`DocId`] -- Opaque document identifier (UUID v7)
//! - [`Revision`] -- Opaque revision token, advanced on each update
//! - [`ContentHash`] -- Fixed-width BLAKE3 digest of file content
//! - [`FileDoc`] / [`DirDoc`] -- Indexed file and directory records

pub mod doc;
pub mod error;
pub mod hash;
pub mod id;
pub mod magic;

pub use doc::{DirDoc, DirOrFile, FileDoc, Metadata, ROOT_DIR_ID, TRASH_DIR_ID, TRASH_DIR_NAME};
pub use error::TypeError;
pub use hash::{ContentHash, ContentHasher};
pub use id::{DocId, Revision};
