//! Integration tests for sources, sessions and the file-backed cache.

use cachesync_engine::{
    status, CacheSyncSource, ClientConfig, Command, IncomingChange, ItemProvider, ItemStatus,
    KeyIter, MemoryItemProvider, MockProtocol, ProtocolAdapter, ProviderResult, Signature, SourceConfig,
    SourceErrorKind, SyncError, SyncItem, SyncMode, SyncResult, SyncSession, Target,
};
use cachesync_storage::{InMemoryStore, KeyValueStore, PropertyFileStore};
use cachesync_testkit::prelude::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A server that keeps the items it receives, per source.
#[derive(Default)]
struct InMemoryServer {
    items: Mutex<BTreeMap<(String, String), Option<Vec<u8>>>>,
    outgoing: Mutex<BTreeMap<String, Vec<IncomingChange>>>,
    quota: Option<usize>,
}

impl InMemoryServer {
    fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    fn live_keys(&self, source: &str) -> Vec<String> {
        self.items
            .lock()
            .iter()
            .filter(|((name, _), data)| name == source && data.is_some())
            .map(|((_, key), _)| key.clone())
            .collect()
    }

    fn push_change(&self, source: &str, change: IncomingChange) {
        self.outgoing
            .lock()
            .entry(source.to_string())
            .or_default()
            .push(change);
    }
}

impl ProtocolAdapter for InMemoryServer {
    fn send_item(&self, source: &str, item: &SyncItem) -> SyncResult<Vec<ItemStatus>> {
        let mut items = self.items.lock();
        let id = (source.to_string(), item.key.clone());
        let live = items.values().filter(|data| data.is_some()).count();

        let code = match item.state.command() {
            Command::Delete => {
                items.insert(id, None);
                status::OK
            }
            _ if self.quota.is_some_and(|quota| live >= quota) => status::DEVICE_FULL,
            Command::Add if matches!(items.get(&id), Some(Some(_))) => status::ALREADY_EXISTS,
            Command::Add => {
                items.insert(id, item.data.clone());
                status::ITEM_ADDED
            }
            _ => {
                items.insert(id, item.data.clone());
                status::OK
            }
        };
        Ok(vec![ItemStatus::new(item.key.clone(), code)])
    }

    fn finish_upload(&self, _source: &str) -> SyncResult<Vec<ItemStatus>> {
        Ok(Vec::new())
    }

    fn receive_changes(&self, source: &str) -> SyncResult<Vec<IncomingChange>> {
        Ok(self.outgoing.lock().remove(source).unwrap_or_default())
    }

    fn send_statuses(&self, _source: &str, _statuses: &[ItemStatus]) -> SyncResult<()> {
        Ok(())
    }
}

/// A provider that raises an abort flag the first time content is read.
struct AbortingProvider {
    inner: MemoryItemProvider,
    abort: cachesync_engine::AbortFlag,
}

impl ItemProvider for AbortingProvider {
    fn keys(&self) -> ProviderResult<KeyIter<'_>> {
        self.inner.keys()
    }

    fn content(&self, key: &str) -> ProviderResult<Vec<u8>> {
        self.abort.abort();
        self.inner.content(key)
    }

    fn insert(&mut self, content: &[u8]) -> ProviderResult<String> {
        self.inner.insert(content)
    }

    fn update(&mut self, key: &str, content: &[u8]) -> ProviderResult<()> {
        self.inner.update(key, content)
    }

    fn delete(&mut self, key: &str) -> ProviderResult<()> {
        self.inner.delete(key)
    }

    fn delete_all(&mut self) -> ProviderResult<()> {
        self.inner.delete_all()
    }
}

#[test]
fn two_sessions_over_file_cache() {
    let client = TestClient::new();
    let mut source = client.source("contact", &[("a", "X"), ("b", "Y")]);

    source.begin_sync(SyncMode::TwoWay).unwrap();
    let new = drain_new_keys(&mut source);
    assert_eq!(new, ["a", "b"]);
    acknowledge_all(&mut source, &new, status::OK, Command::Add);
    source.end_sync().unwrap();

    let mut items = provider(&[("a", "X")]);
    items.put("c", "Z");
    drop(source);
    let mut source = client.reopen("contact", items);

    source.begin_sync(SyncMode::TwoWay).unwrap();
    assert_eq!(drain_new_keys(&mut source), ["c"]);
    assert!(drain_updated_keys(&mut source).is_empty());
    assert_eq!(drain_deleted_keys(&mut source), ["b"]);
}

#[test]
fn cache_file_holds_signatures() {
    let client = TestClient::new();
    let mut source = client.source("contact", &[("a=1", "X"), ("line\nbreak", "Y")]);

    source.begin_sync(SyncMode::TwoWay).unwrap();
    let new = drain_new_keys(&mut source);
    acknowledge_all(&mut source, &new, status::OK, Command::Add);
    source.end_sync().unwrap();

    let store = PropertyFileStore::open(&client.config.cache_path("contact")).unwrap();
    assert_eq!(store.get("a=1"), Some(Signature::of(b"X").to_string()));
    assert_eq!(store.get("line\nbreak"), Some(Signature::of(b"Y").to_string()));
}

#[test]
fn aborted_session_leaves_changes_for_next_time() {
    let client = TestClient::new();
    let mut session = SyncSession::new();
    let server = InMemoryServer::default();

    let mut source = CacheSyncSource::open(
        SourceConfig::new("contact"),
        &client.config,
        AbortingProvider {
            inner: provider(&[("a", "X"), ("b", "Y")]),
            abort: session.abort_flag(),
        },
    );
    let err = session.run_source(&mut source, &server, None).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(session.report().last_error_code(), 0);

    let items = std::mem::take(&mut source.provider_mut().inner);
    drop(source);
    let mut source = client.reopen("contact", items);
    source.begin_sync(SyncMode::TwoWay).unwrap();
    assert_eq!(drain_new_keys(&mut source), ["a", "b"]);
}

#[test]
fn session_round_trip_with_server() {
    let store = InMemoryStore::new();
    let mut source = memory_source("contact", &[("a", "X"), ("b", "Y")], &store);
    let server = InMemoryServer::default();

    let mut session = SyncSession::new();
    session.run_source(&mut source, &server, None).unwrap();
    assert_eq!(server.live_keys("contact"), ["a", "b"]);

    source.provider_mut().put("a", "X2");
    source.provider_mut().remove("b");
    server.push_change("contact", IncomingChange::add("srv-1", "S"));

    let mut session = SyncSession::new();
    session.run_source(&mut source, &server, None).unwrap();
    assert_eq!(server.live_keys("contact"), ["a"]);

    let report = session.report().source("contact").unwrap();
    assert_eq!(report.item_report_successful_count(Target::Server, Command::Replace), 1);
    assert_eq!(report.item_report_successful_count(Target::Server, Command::Delete), 1);
    assert_eq!(report.item_report_successful_count(Target::Client, Command::Add), 1);
    assert_eq!(report.total_successful_count(), 3);

    let mut session = SyncSession::new();
    session.run_source(&mut source, &server, None).unwrap();
    let report = session.report().source("contact").unwrap();
    assert_eq!(report.total_successful_count(), 0);
    assert_eq!(report.item_report_count(Target::Server, Command::Upload), 0);
}

#[test]
fn already_existing_items_count_as_synced() {
    let store = InMemoryStore::new();
    let server = InMemoryServer::default();
    server.send_item(
        "contact",
        &SyncItem {
            key: "a".into(),
            data: Some(b"X".to_vec()),
            state: cachesync_engine::ItemState::New,
        },
    )
    .unwrap();

    let mut source = memory_source("contact", &[("a", "X")], &store);
    let mut session = SyncSession::new();
    session.run_source(&mut source, &server, None).unwrap();

    let report = session.report().source("contact").unwrap();
    assert_eq!(report.item_report_already_exist_count(Target::Server, Command::Add), 1);
    assert!(store.durable_get("a").is_some());
}

#[test]
fn server_quota_stops_only_that_source() {
    let server = InMemoryServer::with_quota(1);
    let mut session = SyncSession::new();

    let contacts = InMemoryStore::new();
    let mut contact = memory_source("contact", &[("a", "X"), ("b", "Y"), ("c", "Z")], &contacts);
    let err = session.run_source(&mut contact, &server, None).unwrap_err();
    assert!(matches!(err, SyncError::SourceFailed { .. }));
    assert!(session.report().is_quota_exceeded("contact", Target::Server));
    assert_eq!(contacts.durable_entries().len(), 1);

    let events = InMemoryStore::new();
    let mut calendar = CacheSyncSource::with_store(
        SourceConfig::new("calendar").with_preferred_mode(SyncMode::OneWayFromServer),
        provider(&[("e", "1")]),
        events.clone(),
    );
    server.push_change("calendar", IncomingChange::add("srv-e", "2"));
    session.run_source(&mut calendar, &server, None).unwrap();

    assert_eq!(session.report().sources().len(), 2);
    assert!(session.report().source("calendar").unwrap().is_successful());
    assert!(!session.report().is_successful());
}

#[test]
fn slow_sync_resends_everything() {
    let store = InMemoryStore::new();
    let mut source = memory_source("contact", &[("a", "X"), ("b", "Y")], &store);
    let server = InMemoryServer::default();

    let mut session = SyncSession::new();
    session.run_source(&mut source, &server, None).unwrap();
    session
        .run_source(&mut source, &server, Some(SyncMode::Slow))
        .unwrap();

    let report = session.report().source("contact").unwrap();
    assert_eq!(report.item_report_count(Target::Server, Command::Replace), 2);
    assert_eq!(store.durable_entries().len(), 2);
}

#[test]
fn refresh_from_server_replaces_local_data() {
    let store = InMemoryStore::with_entries([("old", "1")]);
    let mut source = memory_source("contact", &[("old", "X")], &store);
    let server = InMemoryServer::default();
    server.push_change("contact", IncomingChange::add("srv-1", "fresh"));

    let mut session = SyncSession::new();
    session
        .run_source(&mut source, &server, Some(SyncMode::RefreshFromServer))
        .unwrap();

    assert_eq!(source.provider().len(), 1);
    assert_eq!(source.provider().get("local-1"), Some(&b"fresh"[..]));
    assert_eq!(store.durable_entries().len(), 1);
    assert!(store.durable_get("old").is_none());
}

#[test]
fn interrupted_refresh_does_not_delete_on_server() {
    let client = TestClient::new();
    let mut source = client.source("contact", &[("a", "X"), ("b", "Y")]);
    source.begin_sync(SyncMode::TwoWay).unwrap();
    let new = drain_new_keys(&mut source);
    acknowledge_all(&mut source, &new, status::OK, Command::Add);
    source.end_sync().unwrap();

    let protocol = MockProtocol::new();
    protocol.set_connected(false);
    let mut session = SyncSession::new();
    assert!(session
        .run_source(&mut source, &protocol, Some(SyncMode::RefreshFromServer))
        .is_err());
    assert!(source.provider().is_empty());

    let items = std::mem::take(source.provider_mut());
    drop(source);
    let mut source = client.reopen("contact", items);
    source.begin_sync(SyncMode::TwoWay).unwrap();
    assert!(drain_new_keys(&mut source).is_empty());
    assert!(drain_deleted_keys(&mut source).is_empty());
}

#[test]
fn commit_failure_is_reported_per_source() {
    let store = InMemoryStore::new();
    store.set_reject_flush(true);
    let mut source = memory_source("contact", &[("a", "X")], &store);

    let mut session = SyncSession::new();
    let err = session
        .run_source(&mut source, &InMemoryServer::default(), None)
        .unwrap_err();

    assert!(matches!(err, SyncError::CommitFailed { .. }));
    let report = session.report().source("contact").unwrap();
    assert_eq!(report.last_error_kind(), Some(SourceErrorKind::CommitFailed));
}

#[test]
fn shared_store_outlives_source() {
    let shared: Arc<Mutex<dyn KeyValueStore>> = Arc::new(Mutex::new(InMemoryStore::new()));
    let mut source = CacheSyncSource::with_shared_store(
        SourceConfig::new("contact"),
        provider(&[("a", "X")]),
        Arc::clone(&shared),
    );

    source.begin_sync(SyncMode::TwoWay).unwrap();
    let new = drain_new_keys(&mut source);
    acknowledge_all(&mut source, &new, status::OK, Command::Add);
    source.end_sync().unwrap();
    drop(source);

    assert_eq!(shared.lock().get("a"), Some(Signature::of(b"X").to_string()));
}

#[test]
fn client_config_from_env() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var(cachesync_engine::CONFIG_DIR_ENV, dir.path());

    let config = ClientConfig::from_env().unwrap();
    assert_eq!(config.config_dir(), dir.path());
    assert_eq!(
        config.cache_path("picture"),
        dir.path().join("item_cache").join("picture.dat")
    );
    std::env::remove_var(cachesync_engine::CONFIG_DIR_ENV);
}

#[test]
fn report_serializes_for_display() {
    let store = InMemoryStore::new();
    let mut source = memory_source("picture", &[("p", "jpeg")], &store);
    let mut session = SyncSession::new();
    session
        .run_source(&mut source, &MockProtocol::new().with_default_status(0), None)
        .unwrap();

    let json = serde_json::to_value(session.report()).unwrap();
    assert_eq!(json["sources"][0]["source_name"], "picture");
}
