//! Per-item outcome reports for sources and sessions.

use crate::status::{self, SuccessPredicateKind};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Side an item outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
    /// Outcome of applying a server change on the client.
    Client,
    /// Outcome of sending a client change to the server.
    Server,
}

/// Item command an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Command {
    /// Item added.
    Add,
    /// Item replaced.
    Replace,
    /// Item deleted.
    Delete,
    /// Media upload progress.
    Upload,
    /// Media download progress.
    Download,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Add => "Add",
            Command::Replace => "Replace",
            Command::Delete => "Delete",
            Command::Upload => "Upload",
            Command::Download => "Download",
        };
        f.write_str(name)
    }
}

/// Last known status of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    /// Item key.
    pub id: String,
    /// Status code.
    pub status: i32,
    /// Optional diagnostic message.
    pub message: Option<String>,
}

impl ItemStatus {
    /// Creates a status without message.
    pub fn new(id: impl Into<String>, status: i32) -> Self {
        Self {
            id: id.into(),
            status,
            message: None,
        }
    }

    /// Attaches a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outcomes for one (target, command) bucket, keyed by item id.
///
/// A repeated status for the same id overwrites the earlier one, so the
/// count never grows past the number of distinct ids.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemReport {
    items: Vec<ItemStatus>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ItemReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status` for `id`. Empty ids and chunk acknowledgments are
    /// ignored. Returns true if the report changed.
    pub fn add(&mut self, id: &str, status: i32, message: Option<&str>) -> bool {
        if id.is_empty() {
            return false;
        }
        if status::is_chunk_ack(status) {
            return false;
        }
        let message = message.map(str::to_string);
        match self.index.get(id) {
            Some(&slot) => {
                let entry = &mut self.items[slot];
                entry.status = status;
                entry.message = message;
            }
            None => {
                self.index.insert(id.to_string(), self.items.len());
                self.items.push(ItemStatus {
                    id: id.to_string(),
                    status,
                    message,
                });
            }
        }
        true
    }

    /// Returns the status recorded for `id`.
    pub fn get(&self, id: &str) -> Option<&ItemStatus> {
        self.index.get(id).map(|&slot| &self.items[slot])
    }

    /// Iterates statuses in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemStatus> {
        self.items.iter()
    }

    /// Number of distinct items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose status is a success under `kind`.
    pub fn successful_count(&self, kind: SuccessPredicateKind) -> usize {
        self.items.iter().filter(|i| kind.is_success(i.status)).count()
    }

    /// Items whose status is a failure under `kind`.
    pub fn failed_count(&self, kind: SuccessPredicateKind) -> usize {
        self.len() - self.successful_count(kind)
    }

    /// Items the other side already had.
    pub fn already_exist_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == status::ALREADY_EXISTS)
            .count()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }
}

/// Coarse state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceState {
    /// Not syncing.
    Inactive,
    /// A session is running.
    Active,
    /// The source hit a source-level error.
    Error,
}

/// Classification of a source's last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceErrorKind {
    /// Any error without a dedicated kind.
    Generic,
    /// The signature store could not be opened.
    NotInitialized,
    /// The signature store could not be committed.
    CommitFailed,
    /// Storage quota exceeded on one side.
    QuotaExceeded(Target),
}

/// Last source-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Error classification.
    pub kind: SourceErrorKind,
}

const BUCKETS: [(Target, Command); 8] = [
    (Target::Client, Command::Add),
    (Target::Client, Command::Replace),
    (Target::Client, Command::Delete),
    (Target::Server, Command::Add),
    (Target::Server, Command::Replace),
    (Target::Server, Command::Delete),
    (Target::Client, Command::Download),
    (Target::Server, Command::Upload),
];

/// Buckets that track outcomes, as opposed to transfer progress.
const OUTCOME_BUCKETS: usize = 6;

fn bucket_index(target: Target, command: Command) -> Option<usize> {
    BUCKETS
        .iter()
        .position(|&(t, c)| t == target && c == command)
}

/// Report of one source's sync session.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSourceReport {
    source_name: String,
    success_predicate: SuccessPredicateKind,
    state: SourceState,
    last_error: Option<SourceError>,
    buckets: [ItemReport; 8],
}

impl SyncSourceReport {
    /// Creates an inactive report with empty buckets.
    pub fn new(source_name: impl Into<String>, success_predicate: SuccessPredicateKind) -> Self {
        Self {
            source_name: source_name.into(),
            success_predicate,
            state: SourceState::Inactive,
            last_error: None,
            buckets: Default::default(),
        }
    }

    /// Source name.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Success predicate used for counting.
    pub fn success_predicate(&self) -> SuccessPredicateKind {
        self.success_predicate
    }

    /// Coarse state.
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Sets the coarse state.
    pub fn set_state(&mut self, state: SourceState) {
        self.state = state;
    }

    /// Records an item outcome.
    ///
    /// Ignored for empty ids, chunk acknowledgments and combinations that
    /// have no bucket (for instance client uploads).
    pub fn add_item(
        &mut self,
        target: Target,
        command: Command,
        id: &str,
        status: i32,
        message: Option<&str>,
    ) {
        let Some(index) = bucket_index(target, command) else {
            warn!(source = %self.source_name, ?target, %command, "no report bucket, item ignored");
            return;
        };
        if self.buckets[index].add(id, status, message) {
            debug!(source = %self.source_name, ?target, %command, id, status, "item status recorded");
        }
    }

    /// The bucket for (target, command), if that combination is tracked.
    pub fn item_report(&self, target: Target, command: Command) -> Option<&ItemReport> {
        bucket_index(target, command).map(|i| &self.buckets[i])
    }

    /// Number of items recorded for (target, command).
    pub fn item_report_count(&self, target: Target, command: Command) -> usize {
        self.item_report(target, command).map_or(0, ItemReport::len)
    }

    /// Number of successful items for (target, command).
    pub fn item_report_successful_count(&self, target: Target, command: Command) -> usize {
        self.item_report(target, command)
            .map_or(0, |r| r.successful_count(self.success_predicate))
    }

    /// Number of failed items for (target, command).
    pub fn item_report_failed_count(&self, target: Target, command: Command) -> usize {
        self.item_report(target, command)
            .map_or(0, |r| r.failed_count(self.success_predicate))
    }

    /// Number of already-existing items for (target, command).
    pub fn item_report_already_exist_count(&self, target: Target, command: Command) -> usize {
        self.item_report(target, command)
            .map_or(0, ItemReport::already_exist_count)
    }

    /// Successful items across add/replace/delete on both sides.
    ///
    /// Upload and download buckets track progress and are left out.
    pub fn total_successful_count(&self) -> usize {
        self.buckets[..OUTCOME_BUCKETS]
            .iter()
            .map(|r| r.successful_count(self.success_predicate))
            .sum()
    }

    /// Records a source-level error and moves the source to `Error`.
    pub fn set_error(&mut self, code: i32, message: impl Into<String>, kind: SourceErrorKind) {
        let message = message.into();
        warn!(source = %self.source_name, code, ?kind, %message, "source error");
        self.last_error = Some(SourceError { code, message, kind });
        self.state = SourceState::Error;
    }

    /// Records that one side ran out of storage.
    pub fn set_quota_exceeded(&mut self, side: Target) {
        let message = match side {
            Target::Client => "local storage is full",
            Target::Server => "server quota exceeded",
        };
        self.set_error(status::DEVICE_FULL, message, SourceErrorKind::QuotaExceeded(side));
    }

    /// Returns true if `side` ran out of storage during this session.
    pub fn is_quota_exceeded(&self, side: Target) -> bool {
        matches!(
            self.last_error,
            Some(SourceError { kind: SourceErrorKind::QuotaExceeded(s), .. }) if s == side
        )
    }

    /// Last error, if any.
    pub fn last_error(&self) -> Option<&SourceError> {
        self.last_error.as_ref()
    }

    /// Last error code, `0` if none.
    pub fn last_error_code(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |e| e.code)
    }

    /// Last error message.
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_ref().map(|e| e.message.as_str())
    }

    /// Last error kind.
    pub fn last_error_kind(&self) -> Option<SourceErrorKind> {
        self.last_error.as_ref().map(|e| e.kind)
    }

    /// Returns true if no source-level error was recorded.
    pub fn is_successful(&self) -> bool {
        self.last_error.is_none() && self.state != SourceState::Error
    }

    /// Empties every bucket. State and last error are kept.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}

/// Report of a whole sync invocation, one entry per source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    sources: Vec<SyncSourceReport>,
    last_error: Option<(i32, String)>,
}

impl SyncReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a source report, replacing an earlier one with the same name.
    pub fn push_source(&mut self, report: SyncSourceReport) {
        match self
            .sources
            .iter_mut()
            .find(|r| r.source_name() == report.source_name())
        {
            Some(existing) => existing.clone_from(&report),
            None => self.sources.push(report),
        }
    }

    /// The report of the named source.
    pub fn source(&self, name: &str) -> Option<&SyncSourceReport> {
        self.sources.iter().find(|r| r.source_name() == name)
    }

    /// All source reports, in run order.
    pub fn sources(&self) -> &[SyncSourceReport] {
        &self.sources
    }

    /// Records a session-level error.
    pub fn set_last_error(&mut self, code: i32, message: impl Into<String>) {
        self.last_error = Some((code, message.into()));
    }

    /// Session-level error code, `0` if none.
    pub fn last_error_code(&self) -> i32 {
        self.last_error.as_ref().map_or(0, |(code, _)| *code)
    }

    /// Session-level error message.
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_ref().map(|(_, message)| message.as_str())
    }

    /// Returns true if the named source ran out of storage on `side`.
    pub fn is_quota_exceeded(&self, name: &str, side: Target) -> bool {
        self.source(name).is_some_and(|r| r.is_quota_exceeded(side))
    }

    /// Successful items over every source.
    pub fn total_successful_count(&self) -> usize {
        self.sources
            .iter()
            .map(SyncSourceReport::total_successful_count)
            .sum()
    }

    /// Returns true if neither the session nor any source recorded an error.
    pub fn is_successful(&self) -> bool {
        self.last_error.is_none() && self.sources.iter().all(SyncSourceReport::is_successful)
    }
}
