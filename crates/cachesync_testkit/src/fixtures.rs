//! Test fixtures and source helpers.

use cachesync_engine::{
    CacheSyncSource, ClientConfig, Command, MemoryItemProvider, SourceConfig, SyncItem,
};
use cachesync_storage::InMemoryStore;
use std::path::Path;
use tempfile::TempDir;

/// A client configuration rooted in a temporary directory.
pub struct TestClient {
    /// The configuration.
    pub config: ClientConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestClient {
    /// Creates a configuration in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            config: ClientConfig::new(temp_dir.path()),
            _temp_dir: temp_dir,
        }
    }

    /// The configuration directory.
    pub fn path(&self) -> &Path {
        self.config.config_dir()
    }

    /// Opens a file-backed source named `name` over `items`.
    pub fn source(&self, name: &str, items: &[(&str, &str)]) -> CacheSyncSource<MemoryItemProvider> {
        CacheSyncSource::open(SourceConfig::new(name), &self.config, provider(items))
    }

    /// Reopens a file-backed source with an existing provider.
    pub fn reopen(
        &self,
        name: &str,
        provider: MemoryItemProvider,
    ) -> CacheSyncSource<MemoryItemProvider> {
        CacheSyncSource::open(SourceConfig::new(name), &self.config, provider)
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a provider holding `items` in order.
pub fn provider(items: &[(&str, &str)]) -> MemoryItemProvider {
    MemoryItemProvider::with_items(items.iter().copied())
}

/// Builds a source over `items` backed by a clone of `store`.
pub fn memory_source(
    name: &str,
    items: &[(&str, &str)],
    store: &InMemoryStore,
) -> CacheSyncSource<MemoryItemProvider> {
    CacheSyncSource::with_store(SourceConfig::new(name), provider(items), store.clone())
}

fn drain(
    source: &mut CacheSyncSource<MemoryItemProvider>,
    first: fn(&mut CacheSyncSource<MemoryItemProvider>) -> cachesync_engine::SyncResult<Option<SyncItem>>,
    next: fn(&mut CacheSyncSource<MemoryItemProvider>) -> cachesync_engine::SyncResult<Option<SyncItem>>,
) -> Vec<String> {
    let mut keys = Vec::new();
    let mut item = first(source).expect("Failed to fetch first item");
    while let Some(current) = item {
        keys.push(current.key);
        item = next(source).expect("Failed to fetch next item");
    }
    keys
}

/// Streams every new item, returning the keys.
pub fn drain_new_keys(source: &mut CacheSyncSource<MemoryItemProvider>) -> Vec<String> {
    drain(source, CacheSyncSource::first_new_item, CacheSyncSource::next_new_item)
}

/// Streams every updated item, returning the keys.
pub fn drain_updated_keys(source: &mut CacheSyncSource<MemoryItemProvider>) -> Vec<String> {
    drain(
        source,
        CacheSyncSource::first_updated_item,
        CacheSyncSource::next_updated_item,
    )
}

/// Streams every deleted key.
pub fn drain_deleted_keys(source: &mut CacheSyncSource<MemoryItemProvider>) -> Vec<String> {
    drain(
        source,
        CacheSyncSource::first_deleted_item,
        CacheSyncSource::next_deleted_item,
    )
}

/// Answers `status` for every key under `command`.
pub fn acknowledge_all(
    source: &mut CacheSyncSource<MemoryItemProvider>,
    keys: &[String],
    status: i32,
    command: Command,
) {
    for key in keys {
        source
            .set_item_status(key, status, command)
            .expect("Failed to set item status");
    }
}
