//! Cache-based sync source: one source's reconciliation session.
//!
//! ```text
//! Inactive --begin_sync--> Active --first_item / first_new_item--> streaming
//!     ^                      |                                        |
//!     |                      +------------- set_item_status <---------+
//!     +------ end_sync (commit) <------------------------------------+
//! begin_sync on an unusable store --> Error (end_sync reports, never commits)
//! ```
//!
//! Full-enumeration mode clears the signature store and streams every item.
//! Incremental mode builds the change set once and streams its three
//! buckets on demand. The two modes are exclusive within a session.

use crate::abort::AbortFlag;
use crate::cache::SignatureStore;
use crate::change_set::{self, ChangeSet};
use crate::config::{ClientConfig, SourceConfig, SyncMode};
use crate::error::{ProviderError, SyncError, SyncResult};
use crate::provider::ItemProvider;
use crate::report::{Command, SourceErrorKind, SourceState, SyncSourceReport, Target};
use crate::signature::Signature;
use crate::status;
use cachesync_storage::KeyValueStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error code recorded when the signature store is unusable.
const NOT_INITIALIZED_CODE: i32 = status::COMMAND_FAILED;

fn not_initialized(source_name: &str, reason: Option<&str>) -> SyncError {
    SyncError::NotInitialized {
        source_name: source_name.to_string(),
        reason: reason.unwrap_or("no item cache").to_string(),
    }
}

/// How an outgoing item was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Streamed by a full enumeration.
    Full,
    /// Not in the cache.
    New,
    /// Signature changed.
    Updated,
    /// No longer present locally.
    Deleted,
}

impl ItemState {
    /// Command the item travels with.
    pub fn command(self) -> Command {
        match self {
            ItemState::Full | ItemState::Updated => Command::Replace,
            ItemState::New => Command::Add,
            ItemState::Deleted => Command::Delete,
        }
    }
}

/// An item handed to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    /// Item key.
    pub key: String,
    /// Item content; `None` for deletions.
    pub data: Option<Vec<u8>>,
    /// Classification.
    pub state: ItemState,
}

#[derive(Debug, Default)]
struct Cursor(usize);

impl Cursor {
    fn advance<'a>(&mut self, keys: &'a [String]) -> Option<&'a String> {
        let key = keys.get(self.0)?;
        self.0 += 1;
        Some(key)
    }
}

#[derive(Debug, Default)]
enum Streaming {
    #[default]
    Idle,
    Full(VecDeque<String>),
    Incremental {
        changes: ChangeSet,
        new: Cursor,
        updated: Cursor,
        deleted: Cursor,
    },
}

impl Streaming {
    fn name(&self) -> &'static str {
        match self {
            Streaming::Idle => "idle",
            Streaming::Full(_) => "full enumeration",
            Streaming::Incremental { .. } => "incremental",
        }
    }
}

/// Which bucket of the change set a cursor walks.
#[derive(Debug, Clone, Copy)]
enum Bucket {
    New,
    Updated,
    Deleted,
}

/// Reconciles one data source against its signature cache.
pub struct CacheSyncSource<P: ItemProvider> {
    config: SourceConfig,
    provider: P,
    store: Option<SignatureStore>,
    init_error: Option<String>,
    report: SyncSourceReport,
    abort: AbortFlag,
    abort_shared: bool,
    mode: SyncMode,
    streaming: Streaming,
}

impl<P: ItemProvider> CacheSyncSource<P> {
    /// Creates a source whose cache lives at
    /// `<config_dir>/item_cache/<name>.dat`.
    ///
    /// A cache that cannot be opened, or a source name that is not a
    /// plain file name, does not fail construction; the source is left
    /// uninitialized and `begin_sync` fails.
    pub fn open(config: SourceConfig, client: &ClientConfig, provider: P) -> Self {
        match SignatureStore::open_cache(client.config_dir(), &config.name) {
            Ok(store) => Self::build(config, provider, Some(store), None),
            Err(e) => {
                error!(source = %config.name, dir = %client.config_dir().display(), error = %e, "cannot open item cache");
                Self::build(config, provider, None, Some(e.to_string()))
            }
        }
    }

    /// Creates a source that owns `store`.
    pub fn with_store(config: SourceConfig, provider: P, store: impl KeyValueStore + 'static) -> Self {
        Self::build(config, provider, Some(SignatureStore::owned(store)), None)
    }

    /// Creates a source over a store the caller keeps a handle to.
    pub fn with_shared_store(
        config: SourceConfig,
        provider: P,
        store: Arc<Mutex<dyn KeyValueStore>>,
    ) -> Self {
        Self::build(config, provider, Some(SignatureStore::shared(store)), None)
    }

    fn build(
        config: SourceConfig,
        provider: P,
        store: Option<SignatureStore>,
        init_error: Option<String>,
    ) -> Self {
        let report = SyncSourceReport::new(config.name.clone(), config.success);
        Self {
            mode: config.preferred_mode,
            config,
            provider,
            store,
            init_error,
            report,
            abort: AbortFlag::new(),
            abort_shared: false,
            streaming: Streaming::Idle,
        }
    }

    /// Source configuration.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The item provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Mutable access to the item provider.
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// The signature store, if the source is initialized.
    pub fn store(&self) -> Option<&SignatureStore> {
        self.store.as_ref()
    }

    /// Returns true if the signature store is usable.
    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    /// Report of the current or last session.
    pub fn report(&self) -> &SyncSourceReport {
        &self.report
    }

    /// Mode of the current or last session.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Shares a session abort flag with this source.
    ///
    /// Without a shared flag the source owns one that `begin_sync`
    /// lowers again for every session.
    pub fn set_abort_flag(&mut self, abort: AbortFlag) {
        self.abort = abort;
        self.abort_shared = true;
    }

    /// The abort flag this source polls.
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    /// The change set of the running incremental session.
    pub fn changes(&self) -> Option<&ChangeSet> {
        match &self.streaming {
            Streaming::Incremental { changes, .. } => Some(changes),
            _ => None,
        }
    }

    /// Incoming changes and streaming are allowed until `end_sync`, even
    /// after a source error was recorded.
    fn require_session(&self, operation: &str) -> SyncResult<()> {
        if self.report.state() == SourceState::Inactive {
            Err(SyncError::InvalidStateTransition {
                from: "Inactive".into(),
                to: operation.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn not_initialized(&self) -> SyncError {
        not_initialized(&self.config.name, self.init_error.as_deref())
    }

    fn store_mut(&mut self) -> SyncResult<&mut SignatureStore> {
        match self.store {
            Some(ref mut store) => Ok(store),
            None => Err(not_initialized(&self.config.name, self.init_error.as_deref())),
        }
    }

    fn enumerate_keys(&self) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        for key in self.provider.keys()? {
            self.abort.check()?;
            self.warn_long_key(&key);
            keys.push(key);
        }
        Ok(keys)
    }

    fn warn_long_key(&self, key: &str) {
        if key.chars().count() > self.config.max_key_len {
            warn!(source = %self.config.name, key, limit = self.config.max_key_len, "item key exceeds length limit");
        }
    }

    fn current_signature(&self, key: &str) -> Signature {
        match self.provider.signature(key) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(source = %self.config.name, key, error = %e, "cannot read item, treating as changed");
                Signature::empty()
            }
        }
    }

    /// Starts a session.
    ///
    /// Fails with [`SyncError::NotInitialized`] if the signature store is
    /// unusable; the report then carries the error and the source is in
    /// `Error` state. `RefreshFromServer` deletes every local item and
    /// empties the cache here.
    pub fn begin_sync(&mut self, mode: SyncMode) -> SyncResult<()> {
        if self.report.state() == SourceState::Active {
            return Err(SyncError::InvalidStateTransition {
                from: "Active".into(),
                to: "begin_sync".into(),
            });
        }

        self.report = SyncSourceReport::new(self.config.name.clone(), self.config.success);
        self.streaming = Streaming::Idle;
        self.mode = mode;
        if !self.abort_shared {
            self.abort = AbortFlag::new();
        }

        if self.store.is_none() {
            let e = self.not_initialized();
            self.report
                .set_error(NOT_INITIALIZED_CODE, e.to_string(), SourceErrorKind::NotInitialized);
            error!(source = %self.config.name, error = %e, "cannot start sync");
            return Err(e);
        }

        if mode == SyncMode::RefreshFromServer {
            self.wipe_for_refresh()?;
        }

        self.report.set_state(SourceState::Active);
        info!(source = %self.config.name, ?mode, "sync started");
        Ok(())
    }

    /// Empties the cache durably, then deletes every local item.
    ///
    /// The cache goes first: a stale cache over an empty provider would
    /// turn every old key into a server deletion on the next sync.
    fn wipe_for_refresh(&mut self) -> SyncResult<()> {
        let store = self.store_mut()?;
        store.clear();
        if let Err(cause) = store.commit() {
            self.report.set_error(
                status::COMMAND_FAILED,
                format!("cannot commit item cache: {cause}"),
                SourceErrorKind::CommitFailed,
            );
            return Err(SyncError::CommitFailed {
                source_name: self.config.name.clone(),
                cause,
            });
        }
        self.provider.delete_all()?;
        info!(source = %self.config.name, "local items removed for refresh from server");
        Ok(())
    }

    /// Starts a full enumeration: clears the cache and returns the first item.
    pub fn first_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.require_session("first_item")?;
        if let Streaming::Incremental { .. } = self.streaming {
            return Err(SyncError::InvalidStateTransition {
                from: self.streaming.name().into(),
                to: "full enumeration".into(),
            });
        }

        let keys = self.enumerate_keys()?;
        self.store_mut()?.clear();
        debug!(source = %self.config.name, items = keys.len(), "full enumeration started");
        self.streaming = Streaming::Full(keys.into());
        self.next_item()
    }

    /// Returns the next item of a full enumeration.
    pub fn next_item(&mut self) -> SyncResult<Option<SyncItem>> {
        loop {
            self.abort.check()?;
            let key = match &mut self.streaming {
                Streaming::Full(keys) => match keys.pop_front() {
                    Some(key) => key,
                    None => return Ok(None),
                },
                other => {
                    return Err(SyncError::InvalidStateTransition {
                        from: other.name().into(),
                        to: "next_item".into(),
                    })
                }
            };
            if let Some(item) = self.fetch_item(key, ItemState::Full) {
                return Ok(Some(item));
            }
        }
    }

    fn fetch_item(&self, key: String, state: ItemState) -> Option<SyncItem> {
        match self.provider.content(&key) {
            Ok(data) => Some(SyncItem {
                key,
                data: Some(data),
                state,
            }),
            Err(e) => {
                warn!(source = %self.config.name, key = %key, ?state, error = %e, "skipping unreadable item");
                None
            }
        }
    }

    fn ensure_changes(&mut self) -> SyncResult<()> {
        self.require_session("incremental sync")?;
        match self.streaming {
            Streaming::Incremental { .. } => return Ok(()),
            Streaming::Full(_) => {
                return Err(SyncError::InvalidStateTransition {
                    from: self.streaming.name().into(),
                    to: "incremental sync".into(),
                })
            }
            Streaming::Idle => {}
        }

        let previous = match &self.store {
            Some(store) => store.snapshot(),
            None => return Err(self.not_initialized()),
        };
        let keys = self.provider.keys()?.inspect(|key| self.warn_long_key(key));
        let changes = change_set::compute_changes(
            keys,
            previous,
            |key| self.current_signature(key),
            |key| self.provider.is_really_deleted(key),
            &self.abort,
        )
        .into_result()?;

        info!(
            source = %self.config.name,
            new = changes.new_count(),
            updated = changes.updated_count(),
            deleted = changes.deleted_count(),
            "local changes detected"
        );
        self.streaming = Streaming::Incremental {
            changes,
            new: Cursor::default(),
            updated: Cursor::default(),
            deleted: Cursor::default(),
        };
        Ok(())
    }

    fn reset_cursor(&mut self, bucket: Bucket) {
        if let Streaming::Incremental {
            new,
            updated,
            deleted,
            ..
        } = &mut self.streaming
        {
            match bucket {
                Bucket::New => new.0 = 0,
                Bucket::Updated => updated.0 = 0,
                Bucket::Deleted => deleted.0 = 0,
            }
        }
    }

    fn next_in(&mut self, bucket: Bucket) -> SyncResult<Option<SyncItem>> {
        loop {
            self.abort.check()?;
            let key = match &mut self.streaming {
                Streaming::Incremental {
                    changes,
                    new,
                    updated,
                    deleted,
                } => {
                    let next = match bucket {
                        Bucket::New => new.advance(&changes.new),
                        Bucket::Updated => updated.advance(&changes.updated),
                        Bucket::Deleted => deleted.advance(&changes.deleted),
                    };
                    match next {
                        Some(key) => key.clone(),
                        None => return Ok(None),
                    }
                }
                other => {
                    return Err(SyncError::InvalidStateTransition {
                        from: other.name().into(),
                        to: "incremental item".into(),
                    })
                }
            };

            let item = match bucket {
                Bucket::Deleted => Some(SyncItem {
                    key,
                    data: None,
                    state: ItemState::Deleted,
                }),
                Bucket::New => self.fetch_item(key, ItemState::New),
                Bucket::Updated => self.fetch_item(key, ItemState::Updated),
            };
            if item.is_some() {
                return Ok(item);
            }
        }
    }

    /// Builds the change set (once per session) and returns the first new item.
    pub fn first_new_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.reset_cursor(Bucket::New);
        self.next_in(Bucket::New)
    }

    /// Returns the next new item.
    pub fn next_new_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.next_in(Bucket::New)
    }

    /// Restarts the updated bucket and returns its first item.
    pub fn first_updated_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.reset_cursor(Bucket::Updated);
        self.next_in(Bucket::Updated)
    }

    /// Returns the next updated item.
    pub fn next_updated_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.next_in(Bucket::Updated)
    }

    /// Restarts the deleted bucket and returns its first key.
    pub fn first_deleted_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.reset_cursor(Bucket::Deleted);
        self.next_in(Bucket::Deleted)
    }

    /// Returns the next deleted key; deletions carry no content.
    pub fn next_deleted_item(&mut self) -> SyncResult<Option<SyncItem>> {
        self.ensure_changes()?;
        self.next_in(Bucket::Deleted)
    }

    /// Applies the server's status for an item this source sent.
    pub fn set_item_status(&mut self, key: &str, status: i32, command: Command) -> SyncResult<()> {
        self.set_item_status_with_message(key, status, None, command)
    }

    /// Applies the server's status, keeping its diagnostic message.
    ///
    /// On success the cache takes the item's current signature (or drops
    /// the key for a delete). On failure the cache is left alone so the
    /// change is detected again next time. A chunk acknowledgment changes
    /// nothing.
    pub fn set_item_status_with_message(
        &mut self,
        key: &str,
        status: i32,
        message: Option<&str>,
        command: Command,
    ) -> SyncResult<()> {
        self.abort.check()?;
        self.require_session("set_item_status")?;
        self.store_mut()?;

        self.report
            .add_item(Target::Server, command, key, status, message);

        if status::is_chunk_ack(status) {
            warn!(source = %self.config.name, key, "chunk accepted, waiting for final status");
            return Ok(());
        }

        if !self.config.success.is_success(status) {
            debug!(source = %self.config.name, key, status, %command, "item rejected, cache untouched");
            if status::is_quota_exceeded(status) {
                self.report.set_quota_exceeded(Target::Server);
            }
            return Ok(());
        }

        if command == Command::Delete {
            self.store_mut()?.remove(key);
            debug!(source = %self.config.name, key, "deletion confirmed");
            return Ok(());
        }

        match self.provider.signature(key) {
            Ok(signature) => {
                self.store_mut()?.put(key, &signature);
                debug!(source = %self.config.name, key, %signature, "signature cached");
            }
            Err(e) => {
                warn!(source = %self.config.name, key, error = %e, "item vanished before caching, cache untouched");
            }
        }
        Ok(())
    }

    /// Adds an item received from the server; returns the client status.
    ///
    /// The new local key is cached right away so the item is not echoed
    /// back as new on the next sync.
    pub fn add_item(&mut self, server_id: &str, content: &[u8]) -> SyncResult<i32> {
        self.abort.check()?;
        self.require_session("add_item")?;

        let (id, status) = match self.provider.insert(content) {
            Ok(key) => {
                self.store_mut()?.put(&key, &Signature::of(content));
                (key, self.config.success.added_status())
            }
            Err(e) => (server_id.to_string(), self.local_failure_status(&e)),
        };
        self.report.add_item(Target::Client, Command::Add, &id, status, None);
        Ok(status)
    }

    /// Replaces a local item with server content; returns the client status.
    pub fn update_item(&mut self, key: &str, content: &[u8]) -> SyncResult<i32> {
        self.abort.check()?;
        self.require_session("update_item")?;

        let status = match self.provider.update(key, content) {
            Ok(()) => {
                self.store_mut()?.put(key, &Signature::of(content));
                self.config.success.ok_status()
            }
            Err(e) => self.local_failure_status(&e),
        };
        self.report.add_item(Target::Client, Command::Replace, key, status, None);
        Ok(status)
    }

    /// Deletes a local item as asked by the server; returns the client status.
    pub fn delete_item(&mut self, key: &str) -> SyncResult<i32> {
        self.abort.check()?;
        self.require_session("delete_item")?;

        let status = match self.provider.delete(key) {
            Ok(()) => {
                self.store_mut()?.remove(key);
                self.config.success.ok_status()
            }
            Err(e) => self.local_failure_status(&e),
        };
        self.report.add_item(Target::Client, Command::Delete, key, status, None);
        Ok(status)
    }

    fn local_failure_status(&mut self, e: &ProviderError) -> i32 {
        warn!(source = %self.config.name, error = %e, "cannot apply server change");
        match e {
            ProviderError::DeviceFull => {
                self.report.set_quota_exceeded(Target::Client);
                status::DEVICE_FULL
            }
            ProviderError::NotFound(_) => status::NOT_FOUND,
            ProviderError::Failed(_) => status::COMMAND_FAILED,
        }
    }

    /// Records a transfer in the upload or download progress bucket.
    pub fn record_progress(&mut self, target: Target, command: Command, key: &str) {
        let ok = self.config.success.ok_status();
        self.report.add_item(target, command, key, ok, None);
    }

    /// Ends the session and commits the cache.
    ///
    /// After an abort nothing is committed and `Cancelled` is returned, so
    /// the next sync finds the same changes. Otherwise the cache is
    /// committed and the last recorded source error, if any, is returned.
    pub fn end_sync(&mut self) -> SyncResult<()> {
        self.streaming = Streaming::Idle;

        if self.abort.is_aborted() {
            info!(source = %self.config.name, "sync aborted, item cache not committed");
            if self.report.state() == SourceState::Active {
                self.report.set_state(SourceState::Inactive);
            }
            return Err(SyncError::Cancelled);
        }

        let committed = match (&mut self.store, self.report.state()) {
            (Some(store), SourceState::Active) | (Some(store), SourceState::Error) => {
                Some(store.commit())
            }
            _ => None,
        };
        if let Some(Err(cause)) = committed {
            self.report.set_error(
                status::COMMAND_FAILED,
                format!("cannot commit item cache: {cause}"),
                SourceErrorKind::CommitFailed,
            );
            return Err(SyncError::CommitFailed {
                source_name: self.config.name.clone(),
                cause,
            });
        }

        if self.report.state() == SourceState::Active {
            self.report.set_state(SourceState::Inactive);
        }
        info!(
            source = %self.config.name,
            successful = self.report.total_successful_count(),
            error = self.report.last_error_code(),
            "sync ended"
        );

        match self.report.last_error() {
            None => Ok(()),
            Some(e) if e.kind == SourceErrorKind::NotInitialized => Err(SyncError::NotInitialized {
                source_name: self.config.name.clone(),
                reason: e.message.clone(),
            }),
            Some(e) => Err(SyncError::SourceFailed {
                source_name: self.config.name.clone(),
                code: e.code,
                message: e.message.clone(),
            }),
        }
    }

    /// Cheaply answers whether a sync would find local changes.
    ///
    /// Read-only: neither the cache nor the session state is touched.
    pub fn is_there_local_modification(&self) -> SyncResult<bool> {
        let Some(store) = &self.store else {
            return Err(self.not_initialized());
        };
        change_set::has_local_changes(
            self.provider.keys()?,
            &store.snapshot(),
            |key| self.current_signature(key),
            &self.abort,
        )
    }
}

impl<P: ItemProvider + std::fmt::Debug> std::fmt::Debug for CacheSyncSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSyncSource")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .field("store", &self.store)
            .field("state", &self.report.state())
            .field("streaming", &self.streaming.name())
            .finish()
    }
}
