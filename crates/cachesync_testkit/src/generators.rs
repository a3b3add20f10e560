//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated item sets and
//! caches overlap often enough to exercise every change classification.

use cachesync_engine::{status, Signature};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating item keys.
pub fn item_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-h][0-9]?").expect("Invalid regex")
}

/// Strategy for generating item content.
pub fn item_content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a set of items with unique keys, in key order.
pub fn item_set_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(item_key_strategy(), item_content_strategy(), 0..max)
        .prop_map(|items: BTreeMap<_, _>| items.into_iter().collect())
}

/// Strategy for a previous cache: keys mapped to content signatures.
pub fn cache_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Signature)>> {
    item_set_strategy(max).prop_map(|items| {
        items
            .into_iter()
            .map(|(key, content)| (key, Signature::of(&content)))
            .collect()
    })
}

/// Strategy for SyncML item statuses, weighted toward interesting codes.
pub fn syncml_status_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![
        3 => Just(status::OK),
        2 => Just(status::ITEM_ADDED),
        1 => Just(status::ALREADY_EXISTS),
        1 => Just(status::CHUNKED_ITEM_ACCEPTED),
        1 => Just(status::DEVICE_FULL),
        2 => Just(status::COMMAND_FAILED),
        1 => 100..600i32,
    ]
}

/// Strategy for media item statuses.
pub fn media_status_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![3 => Just(status::MEDIA_OK), 1 => -5..600i32]
}
