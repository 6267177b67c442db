//! The document index consumed by the VFS.
//!
//! The index owns every [`FileDoc`] and [`DirDoc`]. The storage core never
//! persists metadata itself: it asks the indexer to create, update, delete,
//! look up, and iterate documents.

pub mod memory;

use cirrus_types::{DirDoc, DirOrFile, DocId, FileDoc};

use crate::error::IndexerResult;

pub use memory::InMemoryIndexer;

/// Default number of entries fetched per iterator batch.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Options for [`Indexer::dir_iterator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IteratorOptions {
    /// Entries fetched from the index per round trip.
    pub batch_size: usize,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Lazy, finite, non-restartable listing of one directory.
///
/// `None` is the end-of-iteration signal. The first `Some(Err(_))` ends the
/// listing as well; callers stop there.
pub type DirIterator<'a> = Box<dyn Iterator<Item = IndexerResult<DirOrFile>> + 'a>;

/// Metadata store for file and directory documents.
///
/// Create methods assign the first revision; update methods check that the
/// old document carries the stored revision and assign the next one.
pub trait Indexer: Send + Sync {
    /// Prepare the index: the root and trash directory documents exist afterwards.
    fn init_index(&self) -> IndexerResult<()>;

    fn create_dir_doc(&self, doc: &mut DirDoc) -> IndexerResult<()>;

    /// Replace `old` with `new`. When the full path changes, the recorded
    /// paths of every descendant directory change with it.
    fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> IndexerResult<()>;

    fn delete_dir_doc(&self, doc: &DirDoc) -> IndexerResult<()>;

    fn create_file_doc(&self, doc: &mut FileDoc) -> IndexerResult<()>;

    fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> IndexerResult<()>;

    fn delete_file_doc(&self, doc: &FileDoc) -> IndexerResult<()>;

    fn dir_by_id(&self, id: &DocId) -> IndexerResult<DirDoc>;

    fn dir_by_path(&self, path: &str) -> IndexerResult<DirDoc>;

    fn file_by_id(&self, id: &DocId) -> IndexerResult<FileDoc>;

    fn file_by_path(&self, path: &str) -> IndexerResult<FileDoc>;

    /// Iterate the direct children of `dir`, directories and files alike.
    fn dir_iterator<'a>(&'a self, dir: &DirDoc, options: IteratorOptions) -> DirIterator<'a>;
}
