//! File and directory documents.
//!
//! Documents are the indexed view of the storage tree. A [`FileDoc`] does not
//! store its full path: the path is derived from its parent [`DirDoc`], so a
//! directory move only has to rewrite directory records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;
use crate::id::{DocId, Revision};
use crate::magic;

/// Id of the root directory document.
pub const ROOT_DIR_ID: &str = "root-dir";

/// Id of the trash directory document.
pub const TRASH_DIR_ID: &str = "trash-dir";

/// Path of the trash directory, relative to the root.
pub const TRASH_DIR_NAME: &str = ".trash";

/// Metadata extracted from file content (e.g. image dimensions).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// An indexed file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDoc {
    pub id: DocId,
    /// `None` until the indexer has stored the document.
    pub rev: Option<Revision>,
    pub dir_id: DocId,
    pub name: String,
    /// Declared size; `None` means "take whatever was written".
    pub byte_size: Option<u64>,
    /// Declared hash; `None` means "take whatever was written".
    pub content_hash: Option<ContentHash>,
    pub mime: String,
    /// Top-level media type (`image`, `text`, ...).
    pub class: String,
    pub executable: bool,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileDoc {
    /// Build a new, not yet indexed, file document.
    pub fn new(
        name: &str,
        dir_id: DocId,
        byte_size: Option<u64>,
        content_hash: Option<ContentHash>,
        executable: bool,
    ) -> Result<Self, TypeError> {
        validate_name(name)?;
        let mime = magic::mime_by_name(name).unwrap_or_else(|| magic::OCTET_STREAM.to_string());
        let class = magic::class_of(&mime).to_string();
        let now = Utc::now();
        Ok(Self {
            id: DocId::new(),
            rev: None,
            dir_id,
            name: name.to_string(),
            byte_size,
            content_hash,
            mime,
            class,
            executable,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Unix permission bits the content should carry.
    pub fn mode(&self) -> u32 {
        if self.executable {
            0o755
        } else {
            0o644
        }
    }

    /// Full path of this file inside `parent`.
    pub fn path_in(&self, parent: &DirDoc) -> String {
        join(&parent.fullpath, &self.name)
    }
}

/// An indexed directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirDoc {
    pub id: DocId,
    pub rev: Option<Revision>,
    pub name: String,
    /// Parent directory; `None` only for the root.
    pub dir_id: Option<DocId>,
    pub fullpath: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirDoc {
    /// Build a new, not yet indexed, directory under `parent`.
    pub fn new(name: &str, parent: &DirDoc) -> Result<Self, TypeError> {
        validate_name(name)?;
        let now = Utc::now();
        Ok(Self {
            id: DocId::new(),
            rev: None,
            name: name.to_string(),
            dir_id: Some(parent.id.clone()),
            fullpath: join(&parent.fullpath, name),
            created_at: now,
            updated_at: now,
        })
    }

    /// The root directory document.
    pub fn root() -> Self {
        let now = Utc::now();
        Self {
            id: DocId::from(ROOT_DIR_ID),
            rev: None,
            name: String::new(),
            dir_id: None,
            fullpath: "/".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The trash directory document.
    pub fn trash() -> Self {
        let now = Utc::now();
        Self {
            id: DocId::from(TRASH_DIR_ID),
            rev: None,
            name: TRASH_DIR_NAME.to_string(),
            dir_id: Some(DocId::from(ROOT_DIR_ID)),
            fullpath: join("/", TRASH_DIR_NAME),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.dir_id.is_none()
    }
}

/// One entry yielded while iterating a directory.
#[derive(Clone, Debug, PartialEq)]
pub enum DirOrFile {
    Dir(DirDoc),
    File(FileDoc),
}

impl DirOrFile {
    pub fn name(&self) -> &str {
        match self {
            Self::Dir(d) => &d.name,
            Self::File(f) => &f.name,
        }
    }
}

/// Validate a single path component used as a document name.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(TypeError::InvalidName(name.to_string()));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(TypeError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
