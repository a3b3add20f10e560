//! Insertion-ordered string table shared by the store implementations.

use std::collections::{BTreeMap, HashMap};

/// A string map that enumerates in insertion order.
///
/// Each key is assigned a slot number when first inserted. Updating an
/// existing key rewrites the value in its slot; removing a key frees the
/// slot for good, so a later re-insert goes to the end.
#[derive(Debug, Clone, Default)]
pub struct OrderedTable {
    slots: BTreeMap<u64, (String, String)>,
    index: HashMap<String, u64>,
    next_slot: u64,
}

impl OrderedTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let slot = self.index.get(key)?;
        self.slots.get(slot).map(|(_, value)| value.as_str())
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.index.get(key) {
            if let Some(entry) = self.slots.get_mut(slot) {
                entry.1 = value.to_string();
                return;
            }
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.index.insert(key.to_string(), slot);
        self.slots.insert(slot, (key.to_string(), value.to_string()));
    }

    /// Removes `key`, returning true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(slot) => self.slots.remove(&slot).is_some(),
            None => false,
        }
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.slots
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns an owned copy of all entries in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.slots.values().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn update_keeps_position() {
        let mut table = OrderedTable::new();
        table.insert("a", "1");
        table.insert("b", "2");
        table.insert("a", "3");

        let entries = table.to_vec();
        assert_eq!(
            entries,
            vec![("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn reinsert_after_remove_goes_last() {
        let mut table = OrderedTable::new();
        table.insert("a", "1");
        table.insert("b", "2");
        assert!(table.remove("a"));
        table.insert("a", "1");

        let keys: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn remove_missing_key() {
        let mut table = OrderedTable::new();
        assert!(!table.remove("nope"));
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn len_matches_distinct_keys(keys in prop::collection::vec("[a-d]{1,2}", 0..40)) {
            let mut table = OrderedTable::new();
            for key in &keys {
                table.insert(key, "x");
            }
            let distinct: std::collections::HashSet<_> = keys.iter().collect();
            prop_assert_eq!(table.len(), distinct.len());
            prop_assert_eq!(table.iter().count(), distinct.len());
        }
    }
}
