//! Virtual filesystem for Cirrus.
//!
//! A [`Vfs`] binds one storage backend to one document [`Indexer`] and
//! provides the file operations the rest of the platform uses:
//!
//! - [`WriteSession`] -- streaming writes that hash content, extract image
//!   metadata, and overwrite safely through a hidden backup
//! - [`tree`] -- validated moves and depth-first destruction of directories
//! - [`StorageConfig`] -- backend selection from a storage URL and a domain
//!
//! # Design Rules
//!
//! 1. Metadata is never persisted here; every document goes through the indexer.
//! 2. A declared hash or size that disagrees with the written content fails
//!    the write and leaves the previous revision untouched.
//! 3. Races on create or overwrite surface as [`VfsError::Conflict`], never
//!    as a raw backend error.
//! 4. Tree operations are fail-fast: the first error ends the operation.

pub mod backup;
pub mod config;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod session;
pub mod tree;
pub mod vfs;

pub use backup::BackupPath;
pub use config::StorageConfig;
pub use error::{IndexerError, IndexerResult, VfsError, VfsResult};
pub use extract::{extractor_for, MetaExtractor};
pub use indexer::{DirIterator, Indexer, InMemoryIndexer, IteratorOptions};
pub use session::{CancelToken, SessionState, WriteSession};
pub use vfs::{Vfs, DIR_MODE};
