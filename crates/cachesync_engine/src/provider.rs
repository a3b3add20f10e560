//! Item provider abstraction: the local data a source synchronizes.

use crate::error::{ProviderError, ProviderResult};
use crate::signature::Signature;
use std::collections::HashSet;

/// Lazy, single-pass enumeration of item keys.
pub type KeyIter<'a> = Box<dyn Iterator<Item = String> + 'a>;

/// Access to the items of one data source (contacts, calendar, files...).
///
/// The engine never looks inside item content; it only fingerprints it.
/// Enumeration order matters: it is the order items reach the server.
pub trait ItemProvider {
    /// Enumerates every current item key, in a stable order.
    fn keys(&self) -> ProviderResult<KeyIter<'_>>;

    /// Returns the raw content of an item.
    ///
    /// Fails with [`ProviderError::NotFound`] if the key vanished after
    /// enumeration.
    fn content(&self, key: &str) -> ProviderResult<Vec<u8>>;

    /// Returns the item's signature. Defaults to the CRC of its content.
    fn signature(&self, key: &str) -> ProviderResult<Signature> {
        self.content(key).map(|data| Signature::of(&data))
    }

    /// Confirms that an item missing from enumeration is really gone.
    ///
    /// Returning false vetoes the deletion (the item may only be hidden
    /// by a filter).
    fn is_really_deleted(&self, _key: &str) -> bool {
        true
    }

    /// Stores a new item received from the server; returns its local key.
    fn insert(&mut self, content: &[u8]) -> ProviderResult<String>;

    /// Replaces an existing item with content received from the server.
    fn update(&mut self, key: &str, content: &[u8]) -> ProviderResult<()>;

    /// Deletes an item as requested by the server.
    fn delete(&mut self, key: &str) -> ProviderResult<()>;

    /// Deletes every local item (refresh from server).
    fn delete_all(&mut self) -> ProviderResult<()>;
}

/// An in-memory item provider for testing.
///
/// Items keep insertion order. Individual keys can be made unreadable,
/// deletions can be vetoed and the whole provider can report itself full.
#[derive(Debug, Default)]
pub struct MemoryItemProvider {
    items: Vec<(String, Vec<u8>)>,
    unreadable: HashSet<String>,
    vetoed: HashSet<String>,
    full: bool,
    next_id: u64,
}

impl MemoryItemProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider holding `items` in the given order.
    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let mut provider = Self::new();
        for (key, content) in items {
            provider.put(key, content);
        }
        provider
    }

    /// Inserts or replaces an item, keeping its position if it exists.
    pub fn put(&mut self, key: impl Into<String>, content: impl Into<Vec<u8>>) {
        let key = key.into();
        let content = content.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = content,
            None => self.items.push((key, content)),
        }
    }

    /// Removes an item; returns true if it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|(k, _)| k != key);
        self.items.len() != before
    }

    /// Makes `content(key)` fail with `NotFound` while the key still
    /// enumerates.
    pub fn make_unreadable(&mut self, key: impl Into<String>) {
        self.unreadable.insert(key.into());
    }

    /// Makes `is_really_deleted(key)` return false.
    pub fn veto_deletion(&mut self, key: impl Into<String>) {
        self.vetoed.insert(key.into());
    }

    /// Makes inserts and updates fail with `DeviceFull`.
    pub fn set_full(&mut self, full: bool) {
        self.full = full;
    }

    /// Returns the content of `key`, ignoring unreadable markers.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, data)| data.as_slice())
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn allocate_key(&mut self) -> String {
        loop {
            self.next_id += 1;
            let key = format!("local-{}", self.next_id);
            if self.get(&key).is_none() {
                return key;
            }
        }
    }
}

impl ItemProvider for MemoryItemProvider {
    fn keys(&self) -> ProviderResult<KeyIter<'_>> {
        Ok(Box::new(self.items.iter().map(|(key, _)| key.clone())))
    }

    fn content(&self, key: &str) -> ProviderResult<Vec<u8>> {
        if self.unreadable.contains(key) {
            return Err(ProviderError::NotFound(key.to_string()));
        }
        self.get(key)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ProviderError::NotFound(key.to_string()))
    }

    fn is_really_deleted(&self, key: &str) -> bool {
        !self.vetoed.contains(key)
    }

    fn insert(&mut self, content: &[u8]) -> ProviderResult<String> {
        if self.full {
            return Err(ProviderError::DeviceFull);
        }
        let key = self.allocate_key();
        self.items.push((key.clone(), content.to_vec()));
        Ok(key)
    }

    fn update(&mut self, key: &str, content: &[u8]) -> ProviderResult<()> {
        if self.full {
            return Err(ProviderError::DeviceFull);
        }
        match self.items.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => {
                entry.1 = content.to_vec();
                Ok(())
            }
            None => Err(ProviderError::NotFound(key.to_string())),
        }
    }

    fn delete(&mut self, key: &str) -> ProviderResult<()> {
        if self.remove(key) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(key.to_string()))
        }
    }

    fn delete_all(&mut self) -> ProviderResult<()> {
        self.items.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_insertion_order() {
        let provider = MemoryItemProvider::with_items([("b", "1"), ("a", "2"), ("c", "3")]);
        let keys: Vec<String> = provider.keys().unwrap().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn default_signature_is_content_crc() {
        let provider = MemoryItemProvider::with_items([("a", "X")]);
        assert_eq!(provider.signature("a").unwrap(), Signature::of(b"X"));
    }

    #[test]
    fn unreadable_item_still_enumerates() {
        let mut provider = MemoryItemProvider::with_items([("a", "X")]);
        provider.make_unreadable("a");

        assert_eq!(provider.keys().unwrap().count(), 1);
        assert_eq!(
            provider.content("a"),
            Err(ProviderError::NotFound("a".into()))
        );
        assert!(provider.signature("a").is_err());
    }

    #[test]
    fn insert_allocates_fresh_keys() {
        let mut provider = MemoryItemProvider::with_items([("local-1", "taken")]);
        let key = provider.insert(b"new").unwrap();
        assert_eq!(key, "local-2");
        assert_eq!(provider.get(&key), Some(&b"new"[..]));
    }

    #[test]
    fn full_provider_rejects_writes() {
        let mut provider = MemoryItemProvider::with_items([("a", "X")]);
        provider.set_full(true);
        assert_eq!(provider.insert(b"Y"), Err(ProviderError::DeviceFull));
        assert_eq!(provider.update("a", b"Y"), Err(ProviderError::DeviceFull));
        assert!(provider.delete("a").is_ok());
    }

    #[test]
    fn veto_and_delete_all() {
        let mut provider = MemoryItemProvider::with_items([("a", "X"), ("b", "Y")]);
        provider.veto_deletion("a");
        assert!(!provider.is_really_deleted("a"));
        assert!(provider.is_really_deleted("b"));

        provider.delete_all().unwrap();
        assert!(provider.is_empty());
    }
}
