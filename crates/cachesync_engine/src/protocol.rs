//! Protocol layer abstraction: what a session needs from the wire.
//!
//! The engine never builds SyncML messages itself. An adapter sends
//! outgoing items, hands back whatever item statuses the server returned
//! so far (statuses may arrive batched and out of order), and delivers
//! the server's own changes.

use crate::error::{SyncError, SyncResult};
use crate::report::{Command, ItemStatus};
use crate::source::SyncItem;
use crate::status;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A change sent by the server for the client to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChange {
    /// Add, replace or delete.
    pub command: Command,
    /// Server id for adds, local key otherwise.
    pub key: String,
    /// Content; absent for deletes.
    pub data: Option<Vec<u8>>,
}

impl IncomingChange {
    /// An add carrying `data`.
    pub fn add(server_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            command: Command::Add,
            key: server_id.into(),
            data: Some(data.into()),
        }
    }

    /// A replace of local item `key`.
    pub fn replace(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            command: Command::Replace,
            key: key.into(),
            data: Some(data.into()),
        }
    }

    /// A delete of local item `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: Command::Delete,
            key: key.into(),
            data: None,
        }
    }
}

/// Exchanges items with a sync server on behalf of a session.
pub trait ProtocolAdapter: Send + Sync {
    /// Sends one item. Returns the item statuses that arrived meanwhile,
    /// which may belong to earlier items.
    fn send_item(&self, source: &str, item: &SyncItem) -> SyncResult<Vec<ItemStatus>>;

    /// Ends the upload phase and returns every status still pending.
    fn finish_upload(&self, source: &str) -> SyncResult<Vec<ItemStatus>>;

    /// Fetches the server's changes for `source`.
    fn receive_changes(&self, source: &str) -> SyncResult<Vec<IncomingChange>>;

    /// Returns the client's statuses for applied server changes.
    fn send_statuses(&self, source: &str, statuses: &[ItemStatus]) -> SyncResult<()>;
}

/// A scripted protocol adapter for testing.
///
/// Every sent item is answered with `default_status` unless a status was
/// scripted for its key. Statuses are released in batches of
/// `batch_size` sends; the rest come back from `finish_upload`.
#[derive(Debug)]
pub struct MockProtocol {
    connected: AtomicBool,
    default_status: i32,
    batch_size: usize,
    scripted: Mutex<HashMap<String, VecDeque<ItemStatus>>>,
    pending: Mutex<Vec<ItemStatus>>,
    incoming: Mutex<HashMap<String, Vec<IncomingChange>>>,
    sent: Mutex<Vec<(String, SyncItem)>>,
    acknowledged: Mutex<Vec<(String, ItemStatus)>>,
    fail_after: Mutex<Option<usize>>,
}

impl Default for MockProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProtocol {
    /// Creates a connected mock that answers `200` to every item.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            default_status: status::OK,
            batch_size: 1,
            scripted: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            incoming: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
        }
    }

    /// Sets the status answered to unscripted items.
    pub fn with_default_status(mut self, status: i32) -> Self {
        self.default_status = status;
        self
    }

    /// Releases statuses only every `size` sends.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Queues a status for the next send of `key`. Several statuses for
    /// the same key are answered in order, which allows chunk
    /// acknowledgments followed by a final status.
    pub fn script_status(&self, key: impl Into<String>, status: i32) {
        let key = key.into();
        self.scripted
            .lock()
            .entry(key.clone())
            .or_default()
            .push_back(ItemStatus::new(key, status));
    }

    /// Queues a status carrying a server message.
    pub fn script_status_with_message(
        &self,
        key: impl Into<String>,
        status: i32,
        message: impl Into<String>,
    ) {
        let key = key.into();
        self.scripted
            .lock()
            .entry(key.clone())
            .or_default()
            .push_back(ItemStatus::new(key, status).with_message(message));
    }

    /// Sets the changes the server sends for `source`.
    pub fn set_incoming(&self, source: impl Into<String>, changes: Vec<IncomingChange>) {
        self.incoming.lock().insert(source.into(), changes);
    }

    /// Makes every send after the first `sends` fail.
    pub fn fail_after(&self, sends: usize) {
        *self.fail_after.lock() = Some(sends);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Items sent so far, with their source name.
    pub fn sent(&self) -> Vec<(String, SyncItem)> {
        self.sent.lock().clone()
    }

    /// Keys sent for `source`, in send order.
    pub fn sent_keys(&self, source: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == source)
            .map(|(_, item)| item.key.clone())
            .collect()
    }

    /// Client statuses received for server changes.
    pub fn acknowledged(&self) -> Vec<(String, ItemStatus)> {
        self.acknowledged.lock().clone()
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Protocol("not connected".into()))
        }
    }

    fn answer(&self, key: &str) -> Vec<ItemStatus> {
        let mut scripted = self.scripted.lock();
        let Some(queue) = scripted.get_mut(key) else {
            return vec![ItemStatus::new(key, self.default_status)];
        };
        let Some(first) = queue.pop_front() else {
            return vec![ItemStatus::new(key, self.default_status)];
        };
        let mut answers = vec![first];
        while answers
            .last()
            .is_some_and(|s| status::is_chunk_ack(s.status))
        {
            match queue.pop_front() {
                Some(next) => answers.push(next),
                None => break,
            }
        }
        answers
    }
}

impl ProtocolAdapter for MockProtocol {
    fn send_item(&self, source: &str, item: &SyncItem) -> SyncResult<Vec<ItemStatus>> {
        self.ensure_connected()?;
        let mut sent = self.sent.lock();
        if self.fail_after.lock().is_some_and(|limit| sent.len() >= limit) {
            return Err(SyncError::Protocol(format!(
                "connection lost while sending {}",
                item.key
            )));
        }
        sent.push((source.to_string(), item.clone()));
        let count = sent.len();
        drop(sent);

        let mut pending = self.pending.lock();
        pending.extend(self.answer(&item.key));
        if count % self.batch_size == 0 {
            Ok(std::mem::take(&mut *pending))
        } else {
            Ok(Vec::new())
        }
    }

    fn finish_upload(&self, _source: &str) -> SyncResult<Vec<ItemStatus>> {
        self.ensure_connected()?;
        Ok(std::mem::take(&mut *self.pending.lock()))
    }

    fn receive_changes(&self, source: &str) -> SyncResult<Vec<IncomingChange>> {
        self.ensure_connected()?;
        Ok(self.incoming.lock().remove(source).unwrap_or_default())
    }

    fn send_statuses(&self, source: &str, statuses: &[ItemStatus]) -> SyncResult<()> {
        self.ensure_connected()?;
        self.acknowledged
            .lock()
            .extend(statuses.iter().map(|s| (source.to_string(), s.clone())));
        Ok(())
    }
}
