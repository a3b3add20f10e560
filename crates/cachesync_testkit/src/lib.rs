//! # Cachesync Testkit
//!
//! Test utilities for the cachesync engine.
//!
//! This crate provides:
//! - Temporary client configurations and file-backed sources
//! - Seeded item providers and sources
//! - Helpers that drain a source's outgoing items
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cachesync_testkit::prelude::*;
//!
//! #[test]
//! fn first_sync_sends_everything() {
//!     let store = InMemoryStore::new();
//!     let mut source = memory_source("contact", &[("a", "X")], &store);
//!     source.begin_sync(SyncMode::TwoWay).unwrap();
//!     assert_eq!(drain_new_keys(&mut source), ["a"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use cachesync_engine::{
        CacheSyncSource, ClientConfig, Command, MemoryItemProvider, SourceConfig, SyncMode, Target,
    };
    pub use cachesync_storage::InMemoryStore;
}

pub use fixtures::*;
pub use generators::*;
