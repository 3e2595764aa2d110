//! # haul-store
//!
//! LMDB-backed completion records keyed by [`EntryIdentity`].
//!
//! A record exists only once everything under its entry has been fetched;
//! records are never updated or deleted here.
//!
//! Transactions are two-layered, like a delta over a base:
//! - Base: committed records in LMDB
//! - Pending: writes buffered in the [`StoreTxn`], invisible to anyone else
//!
//! LMDB allows a single writer at a time, so holding a real write
//! transaction for the length of a download would serialize every worker.
//! Instead the pending layer is applied in one short write transaction at
//! commit, and simply dropped on error or panic.

mod identity;

pub use identity::{leaf_path, normalized_path, EntryIdentity};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use haul_config::log_store_debug;
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Value stored under an identity. Only its presence matters to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Normalized `/root/name` the identity was derived from
    pub path: String,
    pub is_dir: bool,
    /// Bytes transferred by the run that completed the entry
    pub bytes: u64,
    /// Seconds since the Unix epoch
    pub completed_at: u64,
}

/// Details of a finished transfer, supplied to [`DedupStore::mark_complete`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Completion {
    pub is_dir: bool,
    pub bytes: u64,
}

/// Durable dedup store
#[derive(Clone)]
pub struct DedupStore {
    env: Env,
    records: Database<Str, SerdeBincode<CompletionRecord>>,
}

impl DedupStore {
    /// Default LMDB map size: 256MB (records are tiny)
    const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;

    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let records = env.create_database(&mut wtxn, Some("completions"))?;
        wtxn.commit()?;

        log_store_debug!("Opened completion store", path = &*path.to_string_lossy());

        Ok(Self { env, records })
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. On `Err`, or if `f` panics, the
    /// pending writes are discarded and nothing reaches LMDB.
    pub fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut txn = StoreTxn {
            store: self,
            pending: BTreeMap::new(),
        };
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// True iff no record exists for `(root, name)` as seen by `txn`.
    pub fn should_process(&self, txn: &StoreTxn<'_>, root: &str, name: &str) -> Result<bool> {
        let id = EntryIdentity::new(root, name);
        Ok(!txn.contains(&id)?)
    }

    /// Record `(root, name)` as complete once `txn` commits.
    pub fn mark_complete(
        &self,
        txn: &mut StoreTxn<'_>,
        root: &str,
        name: &str,
        completion: Completion,
    ) {
        let record = CompletionRecord {
            path: normalized_path(root, name),
            is_dir: completion.is_dir,
            bytes: completion.bytes,
            completed_at: now_secs(),
        };
        txn.put(EntryIdentity::new(root, name), record);
    }

    /// True iff no record exists for the nested file `rel` under `root`.
    ///
    /// Leaf records are keyed by [`EntryIdentity::leaf`], which is
    /// case-sensitive in `rel`.
    pub fn should_process_leaf(&self, txn: &StoreTxn<'_>, root: &str, rel: &str) -> Result<bool> {
        Ok(!txn.contains(&EntryIdentity::leaf(root, rel))?)
    }

    /// Record the nested file `rel` under `root` once `txn` commits.
    pub fn mark_leaf_complete(&self, txn: &mut StoreTxn<'_>, root: &str, rel: &str, bytes: u64) {
        let record = CompletionRecord {
            path: leaf_path(root, rel),
            is_dir: false,
            bytes,
            completed_at: now_secs(),
        };
        txn.put(EntryIdentity::leaf(root, rel), record);
    }

    /// Number of committed records
    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All committed records, ordered by identity.
    pub fn records(&self) -> Result<Vec<(EntryIdentity, CompletionRecord)>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.records.iter(&rtxn)? {
            let (key, record) = item?;
            out.push((EntryIdentity::from_hex(key), record));
        }
        Ok(out)
    }

    /// Flush LMDB to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }

    fn get_committed(&self, id: &EntryIdentity) -> Result<Option<CompletionRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.get(&rtxn, id.as_str())?)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A transaction scoped to one unit of work.
///
/// Reads see committed records plus this transaction's own pending writes,
/// never another transaction's pending writes.
pub struct StoreTxn<'s> {
    store: &'s DedupStore,
    pending: BTreeMap<EntryIdentity, CompletionRecord>,
}

impl StoreTxn<'_> {
    /// Whether a record for `id` is visible to this transaction.
    pub fn contains(&self, id: &EntryIdentity) -> Result<bool> {
        if self.pending.contains_key(id) {
            return Ok(true);
        }
        Ok(self.store.get_committed(id)?.is_some())
    }

    pub fn put(&mut self, id: EntryIdentity, record: CompletionRecord) {
        self.pending.insert(id, record);
    }

    /// Number of writes waiting for commit
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut wtxn = self.store.env.write_txn()?;
        for (id, record) in &self.pending {
            self.store.records.put(&mut wtxn, id.as_str(), record)?;
        }
        wtxn.commit()?;

        log_store_debug!("Committed completion records", count = self.pending.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug)]
    enum TestError {
        Store(StoreError),
        Induced,
    }

    impl From<StoreError> for TestError {
        fn from(e: StoreError) -> Self {
            TestError::Store(e)
        }
    }

    fn open_temp() -> (TempDir, DedupStore) {
        let temp = TempDir::new().unwrap();
        let store = DedupStore::open(temp.path().join("store")).unwrap();
        (temp, store)
    }

    #[test]
    fn test_unknown_entry_should_process() {
        let (_temp, store) = open_temp();
        let fresh = store
            .with_transaction(|txn| store.should_process(txn, "/data", "report.csv"))
            .map_err(TestError::Store)
            .unwrap();
        assert!(fresh);
    }

    #[test]
    fn test_commit_makes_record_visible() {
        let (_temp, store) = open_temp();

        store
            .with_transaction::<_, StoreError, _>(|txn| {
                store.mark_complete(txn, "/data", "report.csv", Completion::default());
                Ok(())
            })
            .unwrap();

        let fresh = store
            .with_transaction::<_, StoreError, _>(|txn| {
                store.should_process(txn, "/DATA/", "Report.CSV")
            })
            .unwrap();
        assert!(!fresh);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_leaf_records_are_case_sensitive() {
        let (_temp, store) = open_temp();

        store
            .with_transaction::<_, StoreError, _>(|txn| {
                store.mark_leaf_complete(txn, "/data", "batch/A.log", 3);
                Ok(())
            })
            .unwrap();

        let (upper, lower, entry) = store
            .with_transaction::<_, StoreError, _>(|txn| {
                Ok((
                    store.should_process_leaf(txn, "/data", "batch/A.log")?,
                    store.should_process_leaf(txn, "/data", "batch/a.log")?,
                    store.should_process(txn, "/data", "batch/A.log")?,
                ))
            })
            .unwrap();
        assert!(!upper);
        assert!(lower);
        assert!(entry);

        let records = store.records().unwrap();
        assert_eq!(records[0].1.path, "/data/batch/A.log");
    }

    #[test]
    fn test_error_rolls_back() {
        let (_temp, store) = open_temp();

        let result: std::result::Result<(), TestError> = store.with_transaction(|txn| {
            store.mark_complete(txn, "/data", "a", Completion::default());
            Err(TestError::Induced)
        });

        assert!(matches!(result, Err(TestError::Induced)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_panic_rolls_back() {
        let (_temp, store) = open_temp();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: std::result::Result<(), StoreError> = store.with_transaction(|txn| {
                store.mark_complete(txn, "/data", "a", Completion::default());
                panic!("transfer blew up");
            });
        }));

        assert!(outcome.is_err());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_pending_writes_are_isolated() {
        let (_temp, store) = open_temp();

        store
            .with_transaction::<_, StoreError, _>(|outer| {
                store.mark_complete(outer, "/data", "a", Completion::default());
                assert!(!store.should_process(outer, "/data", "a")?);

                // A concurrent transaction does not see the uncommitted write.
                let other_sees = store.with_transaction::<_, StoreError, _>(|inner| {
                    store.should_process(inner, "/data", "a")
                })?;
                assert!(other_sees);
                Ok(())
            })
            .unwrap();

        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store");

        {
            let store = DedupStore::open(&path).unwrap();
            store
                .with_transaction::<_, StoreError, _>(|txn| {
                    store.mark_complete(
                        txn,
                        "/data",
                        "archive",
                        Completion {
                            is_dir: true,
                            bytes: 42,
                        },
                    );
                    Ok(())
                })
                .unwrap();
        }

        let store = DedupStore::open(&path).unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        let (id, record) = &records[0];
        assert_eq!(id, &EntryIdentity::new("/data", "archive"));
        assert_eq!(record.path, "/data/archive");
        assert!(record.is_dir);
        assert_eq!(record.bytes, 42);
    }
}
