//! Single-file transfer from the remote into a local path.

use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use haul_config::log_transfer_info;
use haul_remote::RemoteFs;

use crate::error::TransferError;
use crate::progress::{CountingWriter, LogProgress, ProgressSink, ProgressTicker};

/// Default interval between progress events
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct EntryTransferer {
    remote: Arc<dyn RemoteFs>,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
}

impl EntryTransferer {
    pub fn new(remote: Arc<dyn RemoteFs>) -> Self {
        Self {
            remote,
            sink: Arc::new(LogProgress),
            interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        self.sink = sink;
        self.interval = interval;
        self
    }

    /// Copy `source` on the remote to `dest`, returning the bytes written.
    ///
    /// `dest` is truncated on open, so a retry always starts from scratch.
    /// On failure the partial file is left where it is. The data is synced
    /// to disk before this returns `Ok`.
    pub fn transfer(&self, source: &str, dest: &Path) -> Result<u64, TransferError> {
        log_transfer_info!("Starting download", source = source);

        let out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .map_err(|e| TransferError::OpenLocal {
                path: dest.to_path_buf(),
                source: e,
            })?;

        let mut input = self.remote.open(source)?;
        let total = input.size()?;

        let written = Arc::new(AtomicU64::new(0));
        let _ticker = ProgressTicker::start(
            Arc::clone(&self.sink),
            dest.to_path_buf(),
            total,
            Arc::clone(&written),
            self.interval,
        );

        let copy_err = |e: io::Error| TransferError::Copy {
            from: source.to_string(),
            to: dest.to_path_buf(),
            source: e,
        };

        let mut writer = CountingWriter::new(BufWriter::new(out), written);
        let copied = io::copy(&mut input, &mut writer).map_err(copy_err)?;
        let out = writer
            .into_inner()
            .into_inner()
            .map_err(|e| copy_err(e.into_error()))?;

        out.sync_all().map_err(|e| TransferError::Sync {
            path: dest.to_path_buf(),
            source: e,
        })?;

        Ok(copied)
    }
}
