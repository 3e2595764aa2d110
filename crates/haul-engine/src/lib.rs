//! # haul-engine
//!
//! Incremental retrieval of a remote tree into a local target.
//!
//! Each run lists the top level of the remote root and hands every entry
//! to its own worker thread, bounded by a [`ConcurrencyLimiter`]. A worker
//! checks the [`haul_store::DedupStore`], transfers the entry into the
//! staging root, promotes it into the target root and records it, all
//! inside one store transaction. A failed entry leaves no record and is
//! picked up again by the next run.

pub mod coordinator;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod mirror;
pub mod progress;
pub mod stage;
pub mod transfer;

pub use coordinator::{
    RetrievalCoordinator, RetrievalOptions, RunHandle, RunOutcome, RunReport,
};
pub use error::{EntryError, MirrorError, RunError, TransferError};
pub use guard::{RunGuard, RunState, RunToken};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use mirror::{DirectoryMirror, LeafLedger, MirrorStats};
pub use progress::{LogProgress, ProgressEvent, ProgressSink};
pub use transfer::{EntryTransferer, DEFAULT_PROGRESS_INTERVAL};
