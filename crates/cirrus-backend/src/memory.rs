use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, RwLock};

use crate::error::{BackendError, BackendResult};
use crate::path;
use crate::traits::{
    is_a_directory, move_into_itself, not_a_directory, Backend, BackendKind, FileKind, ReadStream,
    Stat, WriteHandle,
};

#[derive(Clone, Debug)]
enum Node {
    Dir { mode: u32 },
    File { data: Arc<[u8]>, mode: u32 },
}

type Tree = BTreeMap<String, Node>;

/// In-memory filesystem backend.
///
/// Every entry lives in a `BTreeMap` keyed by normalized path behind a
/// `RwLock`, so each operation (including directory renames) is atomic with
/// respect to the others. Content written through a [`WriteHandle`] becomes
/// visible when the handle is closed.
pub struct InMemoryBackend {
    nodes: Arc<RwLock<Tree>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.insert("/".to_string(), Node::Dir { mode: 0o755 });
        Self {
            nodes: Arc::new(RwLock::new(tree)),
        }
    }

    /// Number of entries, directories included (the root counts).
    pub fn len(&self) -> usize {
        self.nodes.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Sorted list of every path currently present.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.read().expect("lock poisoned").keys().cloned().collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("entry_count", &self.len())
            .finish()
    }
}

fn child_prefix(p: &str) -> String {
    if p == "/" {
        "/".to_string()
    } else {
        format!("{p}/")
    }
}

/// Paths strictly beneath `p`.
fn descendants(tree: &Tree, p: &str) -> Vec<String> {
    let prefix = child_prefix(p);
    tree.range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter(|(k, _)| k.as_str() != p)
        .map(|(k, _)| k.clone())
        .collect()
}

fn require_parent_dir(tree: &Tree, p: &str) -> BackendResult<()> {
    let parent = path::parent(p);
    match tree.get(&parent) {
        Some(Node::Dir { .. }) => Ok(()),
        Some(Node::File { .. }) => Err(not_a_directory("lookup", &parent)),
        None => Err(BackendError::not_found(parent)),
    }
}

impl Backend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn init(&self) -> BackendResult<()> {
        Ok(())
    }

    fn open(&self, p: &str) -> BackendResult<ReadStream> {
        let p = path::absolute(p)?;
        let tree = self.nodes.read().expect("lock poisoned");
        match tree.get(&p) {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(Arc::clone(data)))),
            Some(Node::Dir { .. }) => Err(is_a_directory(&p)),
            None => Err(BackendError::not_found(p)),
        }
    }

    fn create_exclusive(&self, p: &str, mode: u32) -> BackendResult<Box<dyn WriteHandle>> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        if tree.contains_key(&p) {
            return Err(BackendError::already_exists(p));
        }
        require_parent_dir(&tree, &p)?;
        tree.insert(
            p.clone(),
            Node::File {
                data: Arc::from(Vec::new()),
                mode,
            },
        );
        Ok(Box::new(MemWriteHandle {
            nodes: Arc::clone(&self.nodes),
            path: p,
            buf: Vec::new(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> BackendResult<()> {
        let from = path::absolute(from)?;
        let to = path::absolute(to)?;
        if path::is_descendant(&to, &from) {
            return Err(move_into_itself(&from, &to));
        }
        let mut tree = self.nodes.write().expect("lock poisoned");
        if !tree.contains_key(&from) {
            return Err(BackendError::not_found(from));
        }
        if tree.contains_key(&to) {
            return Err(BackendError::already_exists(to));
        }
        require_parent_dir(&tree, &to)?;

        let mut moved = descendants(&tree, &from);
        moved.push(from.clone());
        for old in moved {
            if let Some(node) = tree.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                tree.insert(new, node);
            }
        }
        Ok(())
    }

    fn remove(&self, p: &str) -> BackendResult<()> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        match tree.get(&p) {
            None => return Err(BackendError::not_found(p)),
            Some(Node::Dir { .. }) if !descendants(&tree, &p).is_empty() => {
                return Err(BackendError::NotEmpty { path: p });
            }
            Some(_) => {}
        }
        if p != "/" {
            tree.remove(&p);
        }
        Ok(())
    }

    fn remove_all(&self, p: &str) -> BackendResult<()> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        for key in descendants(&tree, &p) {
            tree.remove(&key);
        }
        if p != "/" {
            tree.remove(&p);
        }
        Ok(())
    }

    fn create_dir(&self, p: &str, mode: u32) -> BackendResult<()> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        if tree.contains_key(&p) {
            return Err(BackendError::already_exists(p));
        }
        require_parent_dir(&tree, &p)?;
        tree.insert(p, Node::Dir { mode });
        Ok(())
    }

    fn create_dir_all(&self, p: &str, mode: u32) -> BackendResult<()> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        let mut chain = path::ancestors(&p);
        chain.push(p);
        for dir in chain {
            match tree.get(&dir) {
                Some(Node::Dir { .. }) => {}
                Some(Node::File { .. }) => return Err(not_a_directory("mkdir", &dir)),
                None => {
                    tree.insert(dir, Node::Dir { mode });
                }
            }
        }
        Ok(())
    }

    fn stat(&self, p: &str) -> BackendResult<Stat> {
        let p = path::absolute(p)?;
        let tree = self.nodes.read().expect("lock poisoned");
        match tree.get(&p) {
            Some(Node::Dir { mode }) => Ok(Stat {
                kind: FileKind::Dir,
                size: 0,
                mode: *mode,
            }),
            Some(Node::File { data, mode }) => Ok(Stat {
                kind: FileKind::File,
                size: data.len() as u64,
                mode: *mode,
            }),
            None => Err(BackendError::not_found(p)),
        }
    }

    fn set_mode(&self, p: &str, new_mode: u32) -> BackendResult<()> {
        let p = path::absolute(p)?;
        let mut tree = self.nodes.write().expect("lock poisoned");
        match tree.get_mut(&p) {
            Some(Node::Dir { mode }) | Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            None => Err(BackendError::not_found(p)),
        }
    }
}

/// Buffers writes and publishes them into the tree on close.
struct MemWriteHandle {
    nodes: Arc<RwLock<Tree>>,
    path: String,
    buf: Vec<u8>,
}

impl Write for MemWriteHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteHandle for MemWriteHandle {
    fn close(self: Box<Self>) -> BackendResult<()> {
        let MemWriteHandle { nodes, path, buf } = *self;
        let mut tree = nodes.write().expect("lock poisoned");
        match tree.get_mut(&path) {
            Some(Node::File { data, .. }) => {
                *data = Arc::from(buf);
                Ok(())
            }
            // Removed or replaced by a directory while we were writing.
            _ => Err(BackendError::not_found(path)),
        }
    }
}
