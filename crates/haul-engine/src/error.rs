//! Error types for haul-engine.

use std::io;
use std::path::PathBuf;

use haul_remote::RemoteError;
use haul_store::StoreError;
use thiserror::Error;

/// Failure of a single file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot open local destination {path}: {source}")]
    OpenLocal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("copy {from} -> {to} failed: {source}")]
    Copy {
        from: String,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot flush {path} to disk: {source}")]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure while mirroring a directory subtree.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("cannot create local directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("remote path {path} is outside remote root {root}")]
    OutsideRoot { path: String, root: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot promote {path}: {source}")]
    Promote {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of one top-level entry. Contained to its worker.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("cannot promote {path}: {source}")]
    Promote {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot clear staged leftovers at {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to retrieve entry with unsafe name {0:?}")]
    UnsafeName(String),
}

/// Failure that aborts a whole run before any entry is dispatched.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot prepare local directory {path}: {source}")]
    LocalDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "staging {staging} and target {target} are on different filesystems; promotion needs rename"
    )]
    CrossDevice { staging: PathBuf, target: PathBuf },

    #[error("cannot list remote root: {0}")]
    List(#[source] RemoteError),
}
