//! Periodic progress events for running transfers.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use haul_config::{log_transfer_error, log_transfer_info};
use indicatif::HumanBytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub dest: PathBuf,
    pub written: u64,
    pub total: u64,
}

/// Receives progress events. Never required for correctness.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Logs each event with human-readable sizes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        log_transfer_info!(
            "Downloading",
            dest = tracing::field::display(event.dest.display()),
            loaded = tracing::field::display(HumanBytes(event.written)),
            total = tracing::field::display(HumanBytes(event.total)),
        );
    }
}

/// Emits a [`ProgressEvent`] every `every` until dropped.
pub(crate) struct ProgressTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub(crate) fn start(
        sink: Arc<dyn ProgressSink>,
        dest: PathBuf,
        total: u64,
        written: Arc<AtomicU64>,
        every: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticks = tick(every);

        let spawned = thread::Builder::new()
            .name("haul-progress".to_string())
            .spawn(move || loop {
                select! {
                    recv(ticks) -> _ => sink.on_progress(&ProgressEvent {
                        dest: dest.clone(),
                        written: written.load(Ordering::Relaxed),
                        total,
                    }),
                    // Sender dropped: transfer is over.
                    recv(stop_rx) -> _ => break,
                }
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log_transfer_error!(
                    "Progress reporting unavailable",
                    error = tracing::field::display(&e)
                );
                None
            }
        };

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Writer that tallies bytes into a shared counter.
pub(crate) struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W, written: Arc<AtomicU64>) -> Self {
        Self { inner, written }
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
