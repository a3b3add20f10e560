//! In-memory key/value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use crate::table::OrderedTable;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An in-memory key/value store.
///
/// The store keeps two tables: the live one that `get`/`set` work on and
/// a durable one that `flush` copies the live table into. Tests use the
/// durable copy to tell "mutated" from "committed".
///
/// Clones share the same tables, so a test can keep a handle after
/// moving the store into a sync source.
///
/// # Example
///
/// ```rust
/// use cachesync_storage::{KeyValueStore, InMemoryStore};
///
/// let mut store = InMemoryStore::new();
/// let observer = store.clone();
/// store.set("a", "1");
/// assert!(observer.durable_entries().is_empty());
/// store.flush().unwrap();
/// assert_eq!(observer.durable_entries().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    live: Arc<RwLock<OrderedTable>>,
    durable: Arc<RwLock<OrderedTable>>,
    reject_flush: Arc<AtomicBool>,
    flushes: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose live and durable tables hold `entries`.
    ///
    /// Useful for seeding the state of a previous sync.
    #[must_use]
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = OrderedTable::new();
        for (key, value) in entries {
            table.insert(key.as_ref(), value.as_ref());
        }
        Self {
            live: Arc::new(RwLock::new(table.clone())),
            durable: Arc::new(RwLock::new(table)),
            ..Self::default()
        }
    }

    /// Makes every following `flush` fail (or succeed again).
    pub fn set_reject_flush(&self, reject: bool) {
        self.reject_flush.store(reject, Ordering::SeqCst);
    }

    /// Returns the entries as of the last successful flush.
    #[must_use]
    pub fn durable_entries(&self) -> Vec<(String, String)> {
        self.durable.read().to_vec()
    }

    /// Returns the durable value for `key`.
    #[must_use]
    pub fn durable_get(&self, key: &str) -> Option<String> {
        self.durable.read().get(key).map(str::to_string)
    }

    /// Returns how many flushes succeeded.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.live.read().get(key).map(str::to_string)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.live.write().insert(key, value);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.live.write().remove(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.live.read().to_vec()
    }

    fn len(&self) -> usize {
        self.live.read().len()
    }

    fn clear(&mut self) {
        self.live.write().clear();
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.reject_flush.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("in-memory store set to reject".into()));
        }
        let snapshot = self.live.read().clone();
        *self.durable.write() = snapshot;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
