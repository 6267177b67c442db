use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use cirrus_backend::path;
use cirrus_types::{DirDoc, DirOrFile, DocId, FileDoc, Revision};
use tracing::debug;

use super::{DirIterator, Indexer, IteratorOptions};
use crate::error::{IndexerError, IndexerResult};

#[derive(Default)]
struct State {
    dirs: HashMap<DocId, DirDoc>,
    files: HashMap<DocId, FileDoc>,
}

impl State {
    fn name_taken(&self, dir_id: &DocId, name: &str, except: &DocId) -> bool {
        self.dirs
            .values()
            .any(|d| d.dir_id.as_ref() == Some(dir_id) && d.name == name && &d.id != except)
            || self
                .files
                .values()
                .any(|f| &f.dir_id == dir_id && f.name == name && &f.id != except)
    }

    fn has_children(&self, dir_id: &DocId) -> bool {
        self.dirs.values().any(|d| d.dir_id.as_ref() == Some(dir_id))
            || self.files.values().any(|f| &f.dir_id == dir_id)
    }

    fn parent(&self, id: &DocId) -> IndexerResult<&DirDoc> {
        self.dirs
            .get(id)
            .ok_or_else(|| IndexerError::NotFound(format!("parent directory {id}")))
    }

    /// Children of `dir_id` sorted by name, strictly after `after`.
    fn children_after(&self, dir_id: &DocId, after: Option<&str>, limit: usize) -> Vec<DirOrFile> {
        let mut children: Vec<DirOrFile> = self
            .dirs
            .values()
            .filter(|d| d.dir_id.as_ref() == Some(dir_id))
            .map(|d| DirOrFile::Dir(d.clone()))
            .chain(
                self.files
                    .values()
                    .filter(|f| &f.dir_id == dir_id)
                    .map(|f| DirOrFile::File(f.clone())),
            )
            .filter(|entry| after.map_or(true, |cursor| entry.name() > cursor))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        children.truncate(limit);
        children
    }
}

fn check_rev(id: &DocId, stored: &Option<Revision>, given: &Option<Revision>) -> IndexerResult<()> {
    match stored {
        Some(stored) if given.as_ref() != Some(stored) => Err(IndexerError::RevisionConflict {
            id: id.clone(),
            stored: stored.clone(),
            given: given
                .as_ref()
                .map(Revision::to_string)
                .unwrap_or_else(|| "none".to_string()),
        }),
        _ => Ok(()),
    }
}

fn next_rev(stored: &Option<Revision>) -> Revision {
    stored.as_ref().map(Revision::next).unwrap_or_else(Revision::first)
}

/// In-process indexer.
///
/// Intended for tests, the CLI, and embedding. Documents live in two
/// `HashMap`s behind a single `RwLock`; directory listings are computed on
/// demand, one batch at a time.
pub struct InMemoryIndexer {
    state: RwLock<State>,
}

impl InMemoryIndexer {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn dir_count(&self) -> usize {
        self.state.read().expect("lock poisoned").dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.state.read().expect("lock poisoned").files.len()
    }
}

impl Default for InMemoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryIndexer")
            .field("dir_count", &state.dirs.len())
            .field("file_count", &state.files.len())
            .finish()
    }
}

impl Indexer for InMemoryIndexer {
    fn init_index(&self) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        for mut dir in [DirDoc::root(), DirDoc::trash()] {
            if !state.dirs.contains_key(&dir.id) {
                dir.rev = Some(Revision::first());
                state.dirs.insert(dir.id.clone(), dir);
            }
        }
        Ok(())
    }

    fn create_dir_doc(&self, doc: &mut DirDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.dirs.contains_key(&doc.id) || state.files.contains_key(&doc.id) {
            return Err(IndexerError::AlreadyExists(doc.id.to_string()));
        }
        let parent_id = doc
            .dir_id
            .clone()
            .ok_or_else(|| IndexerError::Invalid("only the root directory has no parent".into()))?;
        let parent = state.parent(&parent_id)?;
        let expected = path::join(&parent.fullpath, &doc.name);
        if doc.fullpath != expected {
            return Err(IndexerError::Invalid(format!(
                "fullpath {} does not match {expected}",
                doc.fullpath
            )));
        }
        if state.name_taken(&parent_id, &doc.name, &doc.id) {
            return Err(IndexerError::AlreadyExists(doc.fullpath.clone()));
        }
        doc.rev = Some(Revision::first());
        debug!(id = %doc.id, path = %doc.fullpath, "dir doc created");
        state.dirs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let stored = state
            .dirs
            .get(&old.id)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(old.id.to_string()))?;
        check_rev(&old.id, &stored.rev, &old.rev)?;
        if new.id != old.id {
            return Err(IndexerError::Invalid("a document cannot change its id".into()));
        }
        if stored.is_root() {
            return Err(IndexerError::Invalid("the root directory cannot be updated".into()));
        }
        let parent_id = new
            .dir_id
            .clone()
            .ok_or_else(|| IndexerError::Invalid("only the root directory has no parent".into()))?;
        let parent = state.parent(&parent_id)?;
        if parent.id == stored.id || path::is_descendant(&parent.fullpath, &stored.fullpath) {
            return Err(IndexerError::Invalid(format!(
                "{} cannot be moved under itself",
                stored.fullpath
            )));
        }
        new.fullpath = path::join(&parent.fullpath, &new.name);
        if state.name_taken(&parent_id, &new.name, &new.id) {
            return Err(IndexerError::AlreadyExists(new.fullpath.clone()));
        }

        if new.fullpath != stored.fullpath {
            let mut rewritten = 0usize;
            for dir in state.dirs.values_mut() {
                if path::is_descendant(&dir.fullpath, &stored.fullpath) {
                    dir.fullpath = format!("{}{}", new.fullpath, &dir.fullpath[stored.fullpath.len()..]);
                    rewritten += 1;
                }
            }
            debug!(from = %stored.fullpath, to = %new.fullpath, rewritten, "dir doc moved");
        }
        new.rev = Some(next_rev(&stored.rev));
        state.dirs.insert(new.id.clone(), new.clone());
        Ok(())
    }

    fn delete_dir_doc(&self, doc: &DirDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let stored = state
            .dirs
            .get(&doc.id)
            .ok_or_else(|| IndexerError::NotFound(doc.id.to_string()))?;
        if doc.rev.is_some() {
            check_rev(&doc.id, &stored.rev, &doc.rev)?;
        }
        if stored.is_root() {
            return Err(IndexerError::Invalid("the root directory cannot be deleted".into()));
        }
        if state.has_children(&doc.id) {
            return Err(IndexerError::Invalid(format!(
                "directory {} is not empty",
                stored.fullpath
            )));
        }
        state.dirs.remove(&doc.id);
        Ok(())
    }

    fn create_file_doc(&self, doc: &mut FileDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.files.contains_key(&doc.id) || state.dirs.contains_key(&doc.id) {
            return Err(IndexerError::AlreadyExists(doc.id.to_string()));
        }
        let parent = state.parent(&doc.dir_id)?;
        if state.name_taken(&doc.dir_id, &doc.name, &doc.id) {
            return Err(IndexerError::AlreadyExists(doc.path_in(parent)));
        }
        doc.rev = Some(Revision::first());
        state.files.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    fn update_file_doc(&self, old: &FileDoc, new: &mut FileDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let stored = state
            .files
            .get(&old.id)
            .ok_or_else(|| IndexerError::NotFound(old.id.to_string()))?;
        check_rev(&old.id, &stored.rev, &old.rev)?;
        if new.id != old.id {
            return Err(IndexerError::Invalid("a document cannot change its id".into()));
        }
        let rev = next_rev(&stored.rev);
        let parent = state.parent(&new.dir_id)?;
        if state.name_taken(&new.dir_id, &new.name, &new.id) {
            return Err(IndexerError::AlreadyExists(new.path_in(parent)));
        }
        new.rev = Some(rev);
        state.files.insert(new.id.clone(), new.clone());
        Ok(())
    }

    fn delete_file_doc(&self, doc: &FileDoc) -> IndexerResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let stored = state
            .files
            .get(&doc.id)
            .ok_or_else(|| IndexerError::NotFound(doc.id.to_string()))?;
        if doc.rev.is_some() {
            check_rev(&doc.id, &stored.rev, &doc.rev)?;
        }
        state.files.remove(&doc.id);
        Ok(())
    }

    fn dir_by_id(&self, id: &DocId) -> IndexerResult<DirDoc> {
        self.state
            .read()
            .expect("lock poisoned")
            .dirs
            .get(id)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(id.to_string()))
    }

    fn dir_by_path(&self, p: &str) -> IndexerResult<DirDoc> {
        let p = path::clean(p);
        self.state
            .read()
            .expect("lock poisoned")
            .dirs
            .values()
            .find(|d| d.fullpath == p)
            .cloned()
            .ok_or(IndexerError::NotFound(p))
    }

    fn file_by_id(&self, id: &DocId) -> IndexerResult<FileDoc> {
        self.state
            .read()
            .expect("lock poisoned")
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(id.to_string()))
    }

    fn file_by_path(&self, p: &str) -> IndexerResult<FileDoc> {
        let p = path::clean(p);
        let parent = self.dir_by_path(&path::parent(&p))?;
        let name = path::base(&p);
        self.state
            .read()
            .expect("lock poisoned")
            .files
            .values()
            .find(|f| f.dir_id == parent.id && f.name == name)
            .cloned()
            .ok_or(IndexerError::NotFound(p))
    }

    fn dir_iterator<'a>(&'a self, dir: &DirDoc, options: IteratorOptions) -> DirIterator<'a> {
        Box::new(MemDirIterator {
            indexer: self,
            dir_id: dir.id.clone(),
            batch_size: options.batch_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
        })
    }
}

/// Cursor-based listing: each batch resumes after the last name seen, so
/// entries deleted between batches do not shift the listing.
struct MemDirIterator<'a> {
    indexer: &'a InMemoryIndexer,
    dir_id: DocId,
    batch_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<DirOrFile>,
    done: bool,
}

impl MemDirIterator<'_> {
    fn fetch(&mut self) -> IndexerResult<()> {
        let state = self.indexer.state.read().expect("lock poisoned");
        if !state.dirs.contains_key(&self.dir_id) {
            return Err(IndexerError::NotFound(self.dir_id.to_string()));
        }
        let batch = state.children_after(&self.dir_id, self.cursor.as_deref(), self.batch_size);
        if batch.len() < self.batch_size {
            self.done = true;
        }
        if let Some(last) = batch.last() {
            self.cursor = Some(last.name().to_string());
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for MemDirIterator<'_> {
    type Item = IndexerResult<DirOrFile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fetch() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
