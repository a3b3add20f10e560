//! # Cachesync Storage
//!
//! Key/value property stores for the cachesync signature cache.
//!
//! This crate provides the lowest-level persistence used by the sync
//! engine. Stores are **flat string maps**: they do not interpret keys or
//! values, they only keep them and make them durable on `flush`.
//!
//! ## Design Principles
//!
//! - Mutations are visible to `get` immediately but only durable after `flush`
//! - Entries enumerate in insertion order (an update keeps the slot)
//! - Must be `Send + Sync` so a store can be shared between owners
//! - The engine owns all interpretation of keys and values
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral caches
//! - [`PropertyFileStore`] - `key=value` lines in a `.dat` file
//!
//! ## Example
//!
//! ```rust
//! use cachesync_storage::{KeyValueStore, InMemoryStore};
//!
//! let mut store = InMemoryStore::new();
//! store.set("contact-1", "3632233996");
//! assert_eq!(store.get("contact-1").as_deref(), Some("3632233996"));
//! store.flush().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod property_file;
mod store;
mod table;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;
pub use property_file::{PropertyFileStore, LINE_ENDING};
pub use store::KeyValueStore;
pub use table::OrderedTable;
