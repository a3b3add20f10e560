//! # Cachesync Engine
//!
//! Cache-based change detection and sync source reconciliation for a
//! SyncML client.
//!
//! This crate provides:
//! - Content signatures (CRC32 of item content)
//! - A persistent signature store per source
//! - Change detection (new / updated / deleted) against that store
//! - The per-source reconciler driving one sync session
//! - Per-item status reports with SyncML and media success rules
//! - A session driver over a pluggable protocol adapter
//!
//! ## Architecture
//!
//! Each source keeps the signature of every item as of the last
//! successful sync. A session:
//! 1. Compares current item signatures with the stored ones
//! 2. Sends new, updated and deleted items to the server
//! 3. Writes a signature back only when the server confirms the item
//! 4. Applies the server's changes locally, caching their signatures
//! 5. Commits the store once, at the end
//!
//! ## Key Invariants
//!
//! - The store is only committed by a session that was not aborted
//! - A failed item keeps its old signature and is retried next time
//! - Confirmed deletions leave the store even if content is unreadable
//! - Chunk acknowledgments never change the store or the report

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod abort;
mod cache;
mod change_set;
mod config;
mod error;
mod protocol;
mod provider;
mod report;
mod session;
mod signature;
mod source;
pub mod status;

pub use abort::AbortFlag;
pub use cache::{SignatureStore, StoreOwnership};
pub use change_set::{compute_changes, has_local_changes, ChangeScan, ChangeSet};
pub use config::{ClientConfig, SourceConfig, SyncMode, CONFIG_DIR_ENV, DEFAULT_MAX_KEY_LEN};
pub use error::{ProviderError, ProviderResult, SyncError, SyncResult};
pub use protocol::{IncomingChange, MockProtocol, ProtocolAdapter};
pub use provider::{ItemProvider, KeyIter, MemoryItemProvider};
pub use report::{
    Command, ItemReport, ItemStatus, SourceError, SourceErrorKind, SourceState, SyncReport,
    SyncSourceReport, Target,
};
pub use session::SyncSession;
pub use signature::{crc32, Signature};
pub use source::{CacheSyncSource, ItemState, SyncItem};
pub use status::SuccessPredicateKind;
