//! Staged installation of application bundles.
//!
//! A bundle is a set of files installed under `<slug>/<version>`. Every
//! install goes through a [`Copier`]:
//!
//! - [`FsCopier`] -- hierarchical backends; one directory rename commits
//! - [`ObjectStoreCopier`] -- object store containers; a zero-byte marker
//!   object commits
//!
//! # Design Rules
//!
//! 1. Nothing is visible under the final name before commit succeeds.
//! 2. An installed version is never reinstalled; `start` reports it instead.
//! 3. Files are stored gzip-compressed and decompressed on read.
//! 4. A failed commit leaves no partial install behind.

pub mod copier;
pub mod error;
pub mod fs;
pub mod object;

pub use copier::{install, Copier, CopierState, FileInfo, InstallOutcome};
pub use error::{InstallError, InstallResult};
pub use fs::FsCopier;
pub use object::{
    ObjectStoreCopier, CONTENT_ENCODING_HEADER, DEFAULT_LOCK_TTL, LOCK_ACQUIRED_HEADER, LOCK_PREFIX,
    ORIGINAL_LENGTH_HEADER,
};
