use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of an indexed document.
///
/// Freshly created documents get a UUID v7 (time-ordered), rendered without
/// dashes. Well-known documents such as the root directory use fixed ids.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Generate a new unique document id.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// Wrap an existing id.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({})", self.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque revision token of a document.
///
/// Rendered as `<generation>-<nonce>`. The generation increases by one on
/// every successful update; the nonce tells apart two revisions that share a
/// generation (e.g. concurrent writers starting from the same parent).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    generation: u64,
    nonce: String,
}

impl Revision {
    /// The revision assigned on document creation.
    pub fn first() -> Self {
        Self {
            generation: 1,
            nonce: random_nonce(),
        }
    }

    /// The revision following this one.
    pub fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            nonce: random_nonce(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Parse a `<generation>-<nonce>` token.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (head, nonce) = s
            .split_once('-')
            .ok_or_else(|| TypeError::InvalidRevision(s.to_string()))?;
        let generation = head
            .parse::<u64>()
            .map_err(|_| TypeError::InvalidRevision(s.to_string()))?;
        if generation == 0 || nonce.is_empty() || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TypeError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            generation,
            nonce: nonce.to_string(),
        })
    }
}

fn random_nonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({self})")
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.nonce)
    }
}

impl TryFrom<String> for Revision {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}
