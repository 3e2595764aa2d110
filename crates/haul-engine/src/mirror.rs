//! Recursive retrieval of a remote directory entry.

use std::path::Path;
use std::sync::Arc;

use haul_config::{log_transfer_debug, log_transfer_info};
use haul_remote::{relative_to, RemoteFs};

use crate::error::MirrorError;
use crate::stage::{ensure_dir, local_relative};
use crate::transfer::EntryTransferer;

/// Per-file bookkeeping below a top-level directory.
///
/// Only consulted under `DedupGranularity::PerLeaf`.
pub trait LeafLedger {
    /// Whether the file at `rel` (relative to the remote root) is already done.
    fn is_done(&self, rel: &str) -> Result<bool, MirrorError>;

    /// Called right after the file at `rel` landed at `staged`.
    fn complete(&self, rel: &str, staged: &Path, bytes: u64) -> Result<(), MirrorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    /// Files passed over because a [`LeafLedger`] had them
    pub skipped: u64,
}

#[derive(Clone)]
pub struct DirectoryMirror {
    remote: Arc<dyn RemoteFs>,
    transferer: EntryTransferer,
    remote_root: String,
}

impl DirectoryMirror {
    /// Local paths are derived by stripping `remote_root` from remote paths.
    pub fn new(
        remote: Arc<dyn RemoteFs>,
        transferer: EntryTransferer,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            transferer,
            remote_root: remote_root.into(),
        }
    }

    /// Depth-first copy of the subtree at `remote_dir` into `local_root`.
    ///
    /// Stops at the first walk or transfer error. Nothing is recorded for
    /// files below the top level unless a ledger is supplied.
    pub fn mirror(
        &self,
        remote_dir: &str,
        local_root: &Path,
        ledger: Option<&dyn LeafLedger>,
    ) -> Result<MirrorStats, MirrorError> {
        let mut stats = MirrorStats::default();

        for step in self.remote.walk(remote_dir) {
            let step = step?;
            let outside = || MirrorError::OutsideRoot {
                path: step.path.clone(),
                root: self.remote_root.clone(),
            };
            let rel = relative_to(&self.remote_root, &step.path).ok_or_else(outside)?;
            let local = local_root.join(local_relative(rel).ok_or_else(outside)?);

            if step.is_dir {
                let created = ensure_dir(&local).map_err(|e| MirrorError::CreateDir {
                    path: local.clone(),
                    source: e,
                })?;
                if created {
                    log_transfer_info!(
                        "Created local dir",
                        path = tracing::field::display(local.display())
                    );
                }
                stats.dirs += 1;
                continue;
            }

            if let Some(ledger) = ledger {
                if ledger.is_done(rel)? {
                    log_transfer_debug!("Skipped remote file", path = step.path.as_str());
                    stats.skipped += 1;
                    continue;
                }
            }

            if let Some(parent) = local.parent() {
                ensure_dir(parent).map_err(|e| MirrorError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let bytes = self.transferer.transfer(&step.path, &local)?;
            stats.files += 1;
            stats.bytes += bytes;

            if let Some(ledger) = ledger {
                ledger.complete(rel, &local, bytes)?;
            }
        }

        Ok(stats)
    }
}
