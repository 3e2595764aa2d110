//! # haul-remote
//!
//! The transport haul pulls from. The engine only needs three things from a
//! remote: a one-level listing, a depth-first walk, and a readable stream
//! for a file. Authentication happens before a [`RemoteFs`] is built.
//!
//! Two transports exist: [`MountedFs`] for a tree mounted into the local
//! namespace, and `SftpFs` (cargo feature `sftp`) which talks SFTP itself.
//!
//! Remote paths are always `/`-separated strings, independent of the local
//! platform.

mod listing;
mod mounted;
#[cfg(feature = "sftp")]
mod sftp;

pub use listing::walk_listing;
pub use mounted::MountedFs;
#[cfg(feature = "sftp")]
pub use sftp::{SftpAuth, SftpFs, SftpSettings};

use std::io::{self, Read};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote unreachable at {location}: {reason}")]
    Unreachable { location: String, reason: String },

    #[error("I/O error on remote path {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        RemoteError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// One item of a single-level listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Unique within the parent listing
    pub name: String,
    pub is_dir: bool,
    /// Bytes; only meaningful for files
    pub size: u64,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
        }
    }
}

/// One step of a recursive walk, carrying the full remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

pub type Walk<'a> = Box<dyn Iterator<Item = Result<WalkEntry>> + 'a>;

/// An open remote file.
pub trait RemoteFile: Read + Send {
    /// Total size as reported by the remote
    fn size(&self) -> Result<u64>;
}

/// Remote filesystem transport
pub trait RemoteFs: Send + Sync {
    /// List the immediate children of `path`; no recursion.
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>>;

    /// Depth-first walk of the subtree at `path`, starting with `path` itself.
    fn walk(&self, path: &str) -> Walk<'_>;

    /// Open a remote file for reading.
    fn open(&self, path: &str) -> Result<Box<dyn RemoteFile>>;
}

/// `"/root/name"` with surrounding slashes of both parts removed.
pub fn join_remote(root: &str, name: &str) -> String {
    let root = root.trim_matches('/');
    let name = name.trim_matches('/');
    match (root.is_empty(), name.is_empty()) {
        (true, _) => format!("/{}", name),
        (false, true) => format!("/{}", root),
        (false, false) => format!("/{}/{}", root, name),
    }
}

/// Path of `path` relative to `root`, or `None` if it lies outside.
///
/// Both sides are compared in their slash-trimmed form; `root` itself maps
/// to the empty string.
pub fn relative_to<'p>(root: &str, path: &'p str) -> Option<&'p str> {
    let root = root.trim_matches('/');
    let path = path.trim_matches('/');
    if root.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/data/", "/report.csv"), "/data/report.csv");
        assert_eq!(join_remote("data", "archive"), "/data/archive");
        assert_eq!(join_remote("/", "top"), "/top");
        assert_eq!(join_remote("/data/", ""), "/data");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/data", "/data/archive/2023.log"), Some("archive/2023.log"));
        assert_eq!(relative_to("/data/", "/data"), Some(""));
        assert_eq!(relative_to("/", "/x/y"), Some("x/y"));
    }

    #[test]
    fn test_relative_to_rejects_sibling_prefix() {
        assert_eq!(relative_to("/data", "/database/x"), None);
        assert_eq!(relative_to("/data", "/other/x"), None);
    }
}
