//! Dedup keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized, hashed identity of a remote entry under a root.
///
/// Root and name are trimmed of `/`, lower-cased and joined as
/// `/root/name` before hashing, so the identity survives restarts and is
/// insensitive to case and surrounding slashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryIdentity(String);

impl EntryIdentity {
    pub fn new(root: &str, name: &str) -> Self {
        let path = normalized_path(root, name);
        Self(blake3::hash(path.as_bytes()).to_hex().to_string())
    }

    /// Identity of a file nested under a directory entry.
    ///
    /// Unlike [`EntryIdentity::new`], `rel` keeps its case: two files in one
    /// directory may differ only by case and must not share a record.
    pub fn leaf(root: &str, rel: &str) -> Self {
        let path = leaf_path(root, rel);
        Self(blake3::hash(format!("leaf:{}", path).as_bytes()).to_hex().to_string())
    }

    /// Wrap an already computed key, as read back from the store.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `/root/name`, trimmed and lower-cased. This is what gets hashed.
pub fn normalized_path(root: &str, name: &str) -> String {
    let root = root.trim_matches('/').to_lowercase();
    let name = name.trim_matches('/').to_lowercase();
    format!("/{}/{}", root, name)
}

/// `/root/rel` with the root normalized and `rel` only trimmed of `/`.
pub fn leaf_path(root: &str, rel: &str) -> String {
    let root = root.trim_matches('/').to_lowercase();
    format!("/{}/{}", root, rel.trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_case_and_slashes() {
        let a = EntryIdentity::new("/data", "File.TXT");
        let b = EntryIdentity::new("data/", "/file.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_is_fixed_length_hex() {
        let id = EntryIdentity::new("/data", "report.csv");
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_distinguishes_roots() {
        assert_ne!(
            EntryIdentity::new("/data", "a"),
            EntryIdentity::new("/other", "a")
        );
    }

    #[test]
    fn test_normalized_path() {
        assert_eq!(normalized_path("//Data//", "/Archive/2023.log"), "/data/archive/2023.log");
    }

    #[test]
    fn test_leaf_identity_keeps_case() {
        assert_ne!(
            EntryIdentity::leaf("/data", "batch/A.log"),
            EntryIdentity::leaf("/data", "batch/a.log")
        );
        assert_eq!(
            EntryIdentity::leaf("DATA/", "/batch/a.log"),
            EntryIdentity::leaf("/data", "batch/a.log")
        );
    }

    #[test]
    fn test_leaf_identity_differs_from_entry_identity() {
        assert_ne!(
            EntryIdentity::leaf("/data", "batch/a.log"),
            EntryIdentity::new("/data", "batch/a.log")
        );
    }
}
