//! Key/value store trait definition.

use crate::error::StorageResult;

/// A flat string-to-string store.
///
/// Stores are **opaque maps**. The sync engine keeps one entry per item
/// key with the item's content signature as the value; the store never
/// looks at either.
///
/// # Invariants
///
/// - `get` after `set` returns the new value, before any `flush`
/// - `entries` returns every live entry exactly once, in insertion order;
///   updating an existing key keeps its position
/// - `flush` makes the current contents durable; on failure the durable
///   copy is left as it was before the call
/// - Stores must be `Send + Sync` so they can be shared between owners
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::PropertyFileStore`] - For persistent caches
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Inserts or replaces the value for `key`.
    fn set(&mut self, key: &str, value: &str);

    /// Removes `key`. Returns true if an entry was removed.
    fn remove(&mut self, key: &str) -> bool;

    /// Returns a snapshot of all entries in insertion order.
    fn entries(&self) -> Vec<(String, String)>;

    /// Returns the number of live entries.
    fn len(&self) -> usize;

    /// Returns true if the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` has an entry.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes every entry.
    fn clear(&mut self);

    /// Flushes the current contents to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents cannot be persisted.
    fn flush(&mut self) -> StorageResult<()>;
}
