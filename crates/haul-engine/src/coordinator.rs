//! One retrieval pass over the remote root.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use haul_config::{
    log_run_debug, log_run_error, log_run_info, Config, DedupGranularity, OverlapPolicy,
};
use haul_remote::{join_remote, Entry, RemoteFs};
use haul_store::{Completion, DedupStore};

use crate::error::{EntryError, MirrorError, RunError};
use crate::guard::{RunGuard, RunState};
use crate::limiter::ConcurrencyLimiter;
use crate::mirror::{DirectoryMirror, LeafLedger};
use crate::progress::{LogProgress, ProgressSink};
use crate::stage::{clear, ensure_dir, local_relative, promote, same_filesystem};
use crate::transfer::{EntryTransferer, DEFAULT_PROGRESS_INTERVAL};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub remote_root: String,
    pub target_root: PathBuf,
    pub staging_root: PathBuf,
    pub concurrency: usize,
    pub progress_interval: Duration,
    pub granularity: DedupGranularity,
    pub overlap: OverlapPolicy,
}

impl RetrievalOptions {
    /// Defaults for everything but the three roots.
    pub fn new(
        remote_root: impl Into<String>,
        target_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_root: remote_root.into(),
            target_root: target_root.into(),
            staging_root: staging_root.into(),
            concurrency: 4,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            granularity: DedupGranularity::default(),
            overlap: OverlapPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            remote_root: config.remote.root.clone(),
            target_root: config.local.target.clone(),
            staging_root: config.local.staging.clone(),
            concurrency: config.engine.concurrency,
            progress_interval: config.engine.progress_interval(),
            granularity: config.engine.granularity,
            overlap: config.engine.overlap,
        }
    }
}

// ============================================================================
// Run results
// ============================================================================

pub enum RunOutcome {
    /// Every listed entry was handed to a worker.
    Dispatched(RunHandle),
    /// A previous run was still active and the overlap policy is `Skip`.
    Skipped,
}

/// Tally of one run, available once all its workers have finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    /// Entries that already had a completion record
    pub skipped: usize,
    /// `(entry name, error)` for each entry left for the next run
    pub failed: Vec<(String, String)>,
    pub bytes: u64,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Retrieved {
    Skipped,
    Completed(u64),
}

/// Workers of a dispatched run. Dropping it detaches them.
pub struct RunHandle {
    workers: Vec<(String, JoinHandle<Result<Retrieved, EntryError>>)>,
    spawn_failures: Vec<(String, String)>,
}

impl RunHandle {
    /// Number of entries handed to a worker
    pub fn dispatched(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker. A panicked worker counts as a failed entry.
    pub fn join(self) -> RunReport {
        let mut report = RunReport {
            failed: self.spawn_failures,
            ..RunReport::default()
        };

        for (name, handle) in self.workers {
            match handle.join() {
                Ok(Ok(Retrieved::Skipped)) => report.skipped += 1,
                Ok(Ok(Retrieved::Completed(bytes))) => {
                    report.completed += 1;
                    report.bytes += bytes;
                }
                Ok(Err(e)) => report.failed.push((name, e.to_string())),
                Err(panic) => report.failed.push((name, panic_message(panic))),
            }
        }

        log_run_info!(
            "Run finished",
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed.len(),
            bytes = report.bytes,
        );
        report
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Lists the remote root and retrieves every entry not yet recorded.
pub struct RetrievalCoordinator {
    remote: Arc<dyn RemoteFs>,
    store: DedupStore,
    options: RetrievalOptions,
    limiter: ConcurrencyLimiter,
    guard: RunGuard,
    sink: Arc<dyn ProgressSink>,
}

impl RetrievalCoordinator {
    pub fn new(remote: Arc<dyn RemoteFs>, store: DedupStore, options: RetrievalOptions) -> Self {
        Self {
            limiter: ConcurrencyLimiter::new(options.concurrency),
            remote,
            store,
            options,
            guard: RunGuard::new(),
            sink: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    pub fn state(&self) -> RunState {
        self.guard.state()
    }

    /// Block until the current run, if any, has no live workers.
    pub fn wait_idle(&self) {
        self.guard.wait_idle()
    }

    /// Dispatch one worker per top-level entry and return.
    ///
    /// Returns once every entry has a worker, not once the workers are done;
    /// use [`RunHandle::join`] to wait. Listing and local directory failures
    /// abort the run before anything is dispatched. Entry failures never do.
    pub fn run(&self) -> Result<RunOutcome, RunError> {
        let Some(token) = self.guard.enter(self.options.overlap) else {
            log_run_info!("Previous run still active, skipping");
            return Ok(RunOutcome::Skipped);
        };

        for dir in [&self.options.target_root, &self.options.staging_root] {
            ensure_dir(dir).map_err(|e| RunError::LocalDir {
                path: dir.clone(),
                source: e,
            })?;
        }

        let staging = &self.options.staging_root;
        let target = &self.options.target_root;
        let shared = same_filesystem(staging, target).map_err(|e| RunError::LocalDir {
            path: staging.clone(),
            source: e,
        })?;
        if !shared {
            return Err(RunError::CrossDevice {
                staging: staging.clone(),
                target: target.clone(),
            });
        }

        let entries = self
            .remote
            .read_dir(&self.options.remote_root)
            .map_err(RunError::List)?;

        log_run_info!(
            "Dispatching entries",
            root = self.options.remote_root.as_str(),
            count = entries.len(),
        );

        let transferer = EntryTransferer::new(Arc::clone(&self.remote))
            .with_progress(Arc::clone(&self.sink), self.options.progress_interval);
        let worker = Arc::new(Worker {
            store: self.store.clone(),
            mirror: DirectoryMirror::new(
                Arc::clone(&self.remote),
                transferer.clone(),
                self.options.remote_root.clone(),
            ),
            transferer,
            options: self.options.clone(),
        });

        let mut workers = Vec::with_capacity(entries.len());
        let mut spawn_failures = Vec::new();

        for (n, entry) in entries.into_iter().enumerate() {
            let permit = self.limiter.acquire();
            let token = token.clone();
            let worker = Arc::clone(&worker);
            let name = entry.name.clone();

            let spawned = thread::Builder::new()
                .name(format!("haul-worker-{}", n))
                .spawn(move || {
                    let _permit = permit;
                    let _token = token;
                    worker.retrieve(&entry)
                });

            match spawned {
                Ok(handle) => workers.push((name, handle)),
                Err(e) => {
                    log_run_error!(
                        "Failed to start worker",
                        name = name.as_str(),
                        error = tracing::field::display(&e)
                    );
                    spawn_failures.push((name, e.to_string()));
                }
            }
        }

        Ok(RunOutcome::Dispatched(RunHandle {
            workers,
            spawn_failures,
        }))
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    store: DedupStore,
    transferer: EntryTransferer,
    mirror: DirectoryMirror,
    options: RetrievalOptions,
}

impl Worker {
    fn retrieve(&self, entry: &Entry) -> Result<Retrieved, EntryError> {
        let result = self.retrieve_in_txn(entry);
        if let Err(e) = &result {
            log_run_error!(
                "Failed to download entry, will be retried during next batch",
                name = entry.name.as_str(),
                error = tracing::field::display(e)
            );
        }
        result
    }

    fn retrieve_in_txn(&self, entry: &Entry) -> Result<Retrieved, EntryError> {
        let root = self.options.remote_root.as_str();

        self.store.with_transaction(|txn| {
            if !self.store.should_process(txn, root, &entry.name)? {
                log_run_debug!("Skipping already retrieved entry", name = entry.name.as_str());
                return Ok(Retrieved::Skipped);
            }

            // A listing name must map to exactly one local path component.
            let local = local_relative(&entry.name)
                .filter(|p| p.components().count() == 1)
                .ok_or_else(|| EntryError::UnsafeName(entry.name.clone()))?;
            let staged = self.options.staging_root.join(&local);
            let target = self.options.target_root.join(&local);
            let remote_path = join_remote(root, &entry.name);

            // Leftovers of a failed attempt may hold files the remote no
            // longer has.
            clear(&staged).map_err(|e| EntryError::Stage {
                path: staged.clone(),
                source: e,
            })?;

            let bytes = if entry.is_dir {
                let leaves = match self.options.granularity {
                    DedupGranularity::PerEntry => None,
                    DedupGranularity::PerLeaf => Some(StoreLeaves {
                        store: &self.store,
                        root,
                        target_root: &self.options.target_root,
                    }),
                };
                let ledger = leaves.as_ref().map(|l| l as &dyn LeafLedger);
                self.mirror
                    .mirror(&remote_path, &self.options.staging_root, ledger)?
                    .bytes
            } else {
                self.transferer.transfer(&remote_path, &staged)?
            };

            promote(&staged, &target).map_err(|e| EntryError::Promote {
                path: staged.clone(),
                source: e,
            })?;

            self.store.mark_complete(
                txn,
                root,
                &entry.name,
                Completion {
                    is_dir: entry.is_dir,
                    bytes,
                },
            );
            Ok(Retrieved::Completed(bytes))
        })
    }
}

/// Per-file records under `DedupGranularity::PerLeaf`.
///
/// Each file is promoted and recorded in its own committed transaction as
/// soon as it lands, independent of the enclosing entry's transaction.
struct StoreLeaves<'a> {
    store: &'a DedupStore,
    root: &'a str,
    target_root: &'a Path,
}

impl LeafLedger for StoreLeaves<'_> {
    fn is_done(&self, rel: &str) -> Result<bool, MirrorError> {
        let pending = self
            .store
            .with_transaction(|txn| self.store.should_process_leaf(txn, self.root, rel))?;
        Ok(!pending)
    }

    fn complete(&self, rel: &str, staged: &Path, bytes: u64) -> Result<(), MirrorError> {
        let target = match local_relative(rel) {
            Some(local) => self.target_root.join(local),
            None => {
                return Err(MirrorError::OutsideRoot {
                    path: rel.to_string(),
                    root: self.root.to_string(),
                })
            }
        };
        promote(staged, &target).map_err(|e| MirrorError::Promote {
            path: staged.to_path_buf(),
            source: e,
        })?;

        self.store.with_transaction(|txn| {
            self.store.mark_leaf_complete(txn, self.root, rel, bytes);
            Ok::<_, MirrorError>(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_remote::MountedFs;
    use std::fs;
    use tempfile::TempDir;

    fn coordinator(temp: &TempDir) -> RetrievalCoordinator {
        let remote = MountedFs::new(temp.path().join("remote")).unwrap();
        let store = DedupStore::open(temp.path().join("store")).unwrap();
        let options = RetrievalOptions::new(
            "/data",
            temp.path().join("target"),
            temp.path().join("staging"),
        );
        RetrievalCoordinator::new(Arc::new(remote), store, options)
    }

    fn run_to_end(coordinator: &RetrievalCoordinator) -> RunReport {
        match coordinator.run().unwrap() {
            RunOutcome::Dispatched(handle) => handle.join(),
            RunOutcome::Skipped => panic!("run unexpectedly skipped"),
        }
    }

    #[test]
    fn test_run_creates_local_roots() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("remote/data")).unwrap();
        let coordinator = coordinator(&temp);

        let report = run_to_end(&coordinator);

        assert_eq!(report, RunReport::default());
        assert!(temp.path().join("target").is_dir());
        assert!(temp.path().join("staging").is_dir());
    }

    #[test]
    fn test_missing_remote_root_aborts_run() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("remote")).unwrap();
        let coordinator = coordinator(&temp);

        let err = coordinator.run().err().unwrap();
        assert!(matches!(err, RunError::List(_)));
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[test]
    fn test_file_entry_is_promoted_and_recorded() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("remote/data")).unwrap();
        fs::write(temp.path().join("remote/data/notes.txt"), b"hello").unwrap();
        let coordinator = coordinator(&temp);

        let report = run_to_end(&coordinator);

        assert_eq!(report.completed, 1);
        assert_eq!(report.bytes, 5);
        assert_eq!(fs::read(temp.path().join("target/notes.txt")).unwrap(), b"hello");
        assert!(!temp.path().join("staging/notes.txt").exists());
        assert_eq!(coordinator.store().len().unwrap(), 1);
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.remote.root = "/data".to_string();
        config.local.target = PathBuf::from("/t");
        config.local.staging = PathBuf::from("/s");
        config.engine.concurrency = 7;
        config.engine.granularity = DedupGranularity::PerLeaf;

        let options = RetrievalOptions::from_config(&config);
        assert_eq!(options.remote_root, "/data");
        assert_eq!(options.concurrency, 7);
        assert_eq!(options.granularity, DedupGranularity::PerLeaf);
        assert_eq!(options.overlap, OverlapPolicy::Skip);
        assert_eq!(options.progress_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_panic_message_formats() {
        assert_eq!(panic_message(Box::new("boom")), "worker panicked: boom");
        assert_eq!(
            panic_message(Box::new("bang".to_string())),
            "worker panicked: bang"
        );
        assert_eq!(panic_message(Box::new(3u8)), "worker panicked");
    }
}
