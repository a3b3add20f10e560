//! The signature store: last-synced `key -> signature` map of a source.

use crate::signature::Signature;
use cachesync_storage::{KeyValueStore, PropertyFileStore, StorageResult};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Who owns the store behind a [`SignatureStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOwnership {
    /// Constructed by, and dropped with, the sync source.
    Owned,
    /// Injected by the caller, who keeps its own handle.
    Shared,
}

enum StoreHandle {
    Owned(Box<dyn KeyValueStore>),
    Shared(Arc<Mutex<dyn KeyValueStore>>),
}

/// Typed view of a source's persistent signature cache.
///
/// Mutations are visible to reads immediately but only become durable
/// on [`commit`](Self::commit). Entry order is not significant.
pub struct SignatureStore {
    handle: StoreHandle,
}

impl SignatureStore {
    /// Opens (or creates) the property-file cache of `source_name` under
    /// `config_dir` as an owned store.
    pub fn open_cache(config_dir: &Path, source_name: &str) -> StorageResult<Self> {
        Ok(Self::owned(PropertyFileStore::open_cache(config_dir, source_name)?))
    }

    /// Wraps a store the sync source will own.
    pub fn owned(store: impl KeyValueStore + 'static) -> Self {
        Self {
            handle: StoreHandle::Owned(Box::new(store)),
        }
    }

    /// Wraps a store shared with the caller.
    pub fn shared(store: Arc<Mutex<dyn KeyValueStore>>) -> Self {
        Self {
            handle: StoreHandle::Shared(store),
        }
    }

    /// Returns who owns the underlying store.
    pub fn ownership(&self) -> StoreOwnership {
        match self.handle {
            StoreHandle::Owned(_) => StoreOwnership::Owned,
            StoreHandle::Shared(_) => StoreOwnership::Shared,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&dyn KeyValueStore) -> R) -> R {
        match &self.handle {
            StoreHandle::Owned(store) => f(&**store),
            StoreHandle::Shared(store) => f(&*store.lock()),
        }
    }

    fn with_mut<R>(&mut self, f: impl FnOnce(&mut dyn KeyValueStore) -> R) -> R {
        match &mut self.handle {
            StoreHandle::Owned(store) => f(&mut **store),
            StoreHandle::Shared(store) => f(&mut *store.lock()),
        }
    }

    /// Returns the stored signature for `key`.
    pub fn get(&self, key: &str) -> Option<Signature> {
        self.with(|store| store.get(key)).map(Signature::from_stored)
    }

    /// Upserts the signature for `key`.
    pub fn put(&mut self, key: &str, signature: &Signature) {
        self.with_mut(|store| store.set(key, signature.as_str()));
    }

    /// Removes `key`; returns true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.with_mut(|store| store.remove(key))
    }

    /// Returns a snapshot of every entry.
    pub fn snapshot(&self) -> Vec<(String, Signature)> {
        self.with(|store| store.entries())
            .into_iter()
            .map(|(key, value)| (key, Signature::from_stored(value)))
            .collect()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.with(|store| store.len())
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every entry.
    pub fn clear(&mut self) {
        self.with_mut(|store| store.clear());
    }

    /// Makes the current contents durable.
    pub fn commit(&mut self) -> StorageResult<()> {
        self.with_mut(|store| store.flush())
    }
}

impl std::fmt::Debug for SignatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureStore")
            .field("ownership", &self.ownership())
            .field("len", &self.len())
            .finish()
    }
}
