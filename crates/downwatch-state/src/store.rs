//! StateStore — redb-backed outcome log.
//!
//! Outcomes are JSON-serialized into redb's `&[u8]` value column under a
//! `(target_name, timestamp_ms)` key. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use downwatch_core::Outcome;
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, StorageError};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::OUTCOMES;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// The two operations reconciliation needs from durable state.
pub trait OutcomeStore: Send + Sync {
    /// Most recently written outcome for `target_name`, if any.
    fn last_outcome(&self, target_name: &str) -> StateResult<Option<Outcome>>;

    /// Persist `outcome`. Never overwrites an existing record.
    fn append(&self, outcome: &Outcome) -> StateResult<()>;
}

/// Hands a run the store it reconciles against.
pub trait OpenStore: Send + Sync {
    fn open_store(&self) -> StateResult<Arc<dyn OutcomeStore>>;
}

/// An already-open store, shared by every run.
impl OpenStore for Arc<dyn OutcomeStore> {
    fn open_store(&self) -> StateResult<Arc<dyn OutcomeStore>> {
        Ok(Arc::clone(self))
    }
}

/// Opens the redb file on every call.
///
/// redb holds an exclusive lock on the file while a `Database` is alive, so
/// long-lived callers use this to release the file between runs.
#[derive(Debug, Clone)]
pub struct StorePath {
    path: PathBuf,
}

impl StorePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OpenStore for StorePath {
    fn open_store(&self) -> StateResult<Arc<dyn OutcomeStore>> {
        Ok(Arc::new(StateStore::open(&self.path)?))
    }
}

/// Thread-safe outcome store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(open_error)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "outcome store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory outcome store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Up to `limit` outcomes for a target, most recent first.
    pub fn history(&self, target_name: &str, limit: usize) -> StateResult<Vec<Outcome>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        let range = table
            .range((target_name, 0u64)..=(target_name, u64::MAX))
            .map_err(map_err!(Read))?;

        let mut results = Vec::new();
        for entry in range.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let outcome: Outcome =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(outcome);
        }
        Ok(results)
    }

    /// Distinct names of every target with at least one recorded outcome.
    pub fn target_names(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        let mut names = BTreeSet::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let (name, _) = key.value();
            if !names.contains(name) {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// Lock contention and I/O failures are transient; anything else means the
/// file itself cannot be used.
fn open_error(err: DatabaseError) -> StateError {
    match err {
        DatabaseError::DatabaseAlreadyOpen => {
            StateError::Unavailable("database is already open elsewhere".to_string())
        }
        DatabaseError::Storage(StorageError::Io(e)) => StateError::Unavailable(e.to_string()),
        other => StateError::Open(other.to_string()),
    }
}

impl OutcomeStore for StateStore {
    fn last_outcome(&self, target_name: &str) -> StateResult<Option<Outcome>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        let mut range = table
            .range((target_name, 0u64)..=(target_name, u64::MAX))
            .map_err(map_err!(Read))?;

        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let outcome: Outcome =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    fn append(&self, outcome: &Outcome) -> StateResult<()> {
        let key = (outcome.target_name.as_str(), outcome.timestamp);
        let value = serde_json::to_vec(outcome).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict {
                    target: outcome.target_name.clone(),
                    timestamp: outcome.timestamp,
                });
            }
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            target_name = %outcome.target_name,
            timestamp = outcome.timestamp,
            exceptional = outcome.is_exceptional,
            "outcome stored"
        );
        Ok(())
    }
}
