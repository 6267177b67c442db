//! Names for the hidden copies that hold a file's previous revision while it
//! is being overwritten.

use std::fmt;

use cirrus_types::{DocId, Revision};
use rand::distributions::Alphanumeric;
use rand::Rng;

const NONCE_LEN: usize = 12;

/// Path of a backup object, at the root of the tenant's tree.
///
/// Names are keyed by document id and revision plus a random nonce, so two
/// sessions never share a backup even when they start from the same revision.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BackupPath(String);

impl BackupPath {
    pub fn allocate(id: &DocId, rev: Option<&Revision>) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        let rev = rev.map(Revision::to_string).unwrap_or_else(|| "0".to_string());
        Self(format!("/.{id}_{rev}~{nonce}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BackupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackupPath({})", self.0)
    }
}

impl fmt::Display for BackupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_at_root_and_keyed_by_doc() {
        let id = DocId::from("f00d");
        let rev = Revision::parse("3-abc").unwrap();
        let backup = BackupPath::allocate(&id, Some(&rev));
        assert!(backup.as_str().starts_with("/.f00d_3-abc~"));
        assert_eq!(backup.as_str().matches('/').count(), 1);
    }

    #[test]
    fn allocations_never_collide() {
        let id = DocId::from("same");
        let rev = Revision::first();
        let a = BackupPath::allocate(&id, Some(&rev));
        let b = BackupPath::allocate(&id, Some(&rev));
        assert_ne!(a, b);
    }

    #[test]
    fn unindexed_doc_uses_zero_revision() {
        let backup = BackupPath::allocate(&DocId::from("x"), None);
        assert!(backup.to_string().starts_with("/.x_0~"));
    }
}
