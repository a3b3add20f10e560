//! Session driver: runs sources through a protocol adapter.
//!
//! A session owns the abort flag every source polls and collects one
//! report per source. For each enabled source it uploads local changes,
//! routing batched server statuses back to the items they answer, then
//! applies the server's changes and ends the source's sync.

use crate::abort::AbortFlag;
use crate::config::SyncMode;
use crate::error::{SyncError, SyncResult};
use crate::protocol::ProtocolAdapter;
use crate::provider::ItemProvider;
use crate::report::{Command, ItemStatus, SyncReport, Target};
use crate::source::{CacheSyncSource, SyncItem};
use crate::status;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outgoing item streams, in the order they are sent.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Full,
    New,
    Updated,
    Deleted,
}

impl Phase {
    fn first<P: ItemProvider>(self, source: &mut CacheSyncSource<P>) -> SyncResult<Option<SyncItem>> {
        match self {
            Phase::Full => source.first_item(),
            Phase::New => source.first_new_item(),
            Phase::Updated => source.first_updated_item(),
            Phase::Deleted => source.first_deleted_item(),
        }
    }

    fn next<P: ItemProvider>(self, source: &mut CacheSyncSource<P>) -> SyncResult<Option<SyncItem>> {
        match self {
            Phase::Full => source.next_item(),
            Phase::New => source.next_new_item(),
            Phase::Updated => source.next_updated_item(),
            Phase::Deleted => source.next_deleted_item(),
        }
    }
}

/// Items sent and still waiting for a final status.
#[derive(Debug, Default)]
struct InFlight {
    commands: HashMap<String, Command>,
}

impl InFlight {
    fn send(&mut self, item: &SyncItem) {
        self.commands.insert(item.key.clone(), item.state.command());
    }

    /// Routes statuses to the source. Returns true once the server quota
    /// is exhausted.
    fn apply<P: ItemProvider>(
        &mut self,
        source: &mut CacheSyncSource<P>,
        statuses: Vec<ItemStatus>,
    ) -> SyncResult<bool> {
        for status in statuses {
            let command = if status::is_chunk_ack(status.status) {
                self.commands.get(&status.id).copied()
            } else {
                self.commands.remove(&status.id)
            };
            let Some(command) = command else {
                warn!(source = %source.name(), id = %status.id, status = status.status, "status for unknown item");
                continue;
            };
            source.set_item_status_with_message(
                &status.id,
                status.status,
                status.message.as_deref(),
                command,
            )?;
        }
        Ok(source.report().is_quota_exceeded(Target::Server))
    }
}

/// One synchronization session over any number of sources.
#[derive(Debug, Default)]
pub struct SyncSession {
    abort: AbortFlag,
    report: SyncReport,
}

impl SyncSession {
    /// Creates a session with a fresh abort flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag that cancels this session; clone it to abort from
    /// another thread.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Report collected so far.
    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    /// Consumes the session, returning its report.
    pub fn into_report(self) -> SyncReport {
        self.report
    }

    /// Synchronizes one source, in `mode` or its preferred mode.
    ///
    /// The source's report is stored in the session report whatever the
    /// outcome. A protocol failure aborts the session, so no further
    /// source runs and nothing is committed for this one.
    pub fn run_source<P, A>(
        &mut self,
        source: &mut CacheSyncSource<P>,
        adapter: &A,
        mode: Option<SyncMode>,
    ) -> SyncResult<()>
    where
        P: ItemProvider,
        A: ProtocolAdapter + ?Sized,
    {
        if !source.config().enabled {
            info!(source = %source.name(), "source disabled, skipped");
            return Ok(());
        }
        self.abort.check()?;

        let mode = mode.unwrap_or(source.config().preferred_mode);
        source.set_abort_flag(self.abort.clone());
        if let Err(e) = source.begin_sync(mode) {
            self.report.push_source(source.report().clone());
            return Err(e);
        }

        let exchanged = self.exchange(source, adapter, mode);
        if let Err(e) = &exchanged {
            if let SyncError::Protocol(_) = e {
                self.abort.abort();
            }
            if !e.is_cancelled() {
                self.report.set_last_error(status::COMMAND_FAILED, e.to_string());
            }
        }

        let ended = source.end_sync();
        self.report.push_source(source.report().clone());
        exchanged?;
        ended
    }

    fn exchange<P, A>(
        &self,
        source: &mut CacheSyncSource<P>,
        adapter: &A,
        mode: SyncMode,
    ) -> SyncResult<()>
    where
        P: ItemProvider,
        A: ProtocolAdapter + ?Sized,
    {
        if mode.sends_client_changes() {
            self.upload(source, adapter, mode)?;
        }
        if mode.receives_server_changes() {
            self.download(source, adapter)?;
        }
        Ok(())
    }

    fn upload<P, A>(
        &self,
        source: &mut CacheSyncSource<P>,
        adapter: &A,
        mode: SyncMode,
    ) -> SyncResult<()>
    where
        P: ItemProvider,
        A: ProtocolAdapter + ?Sized,
    {
        let phases: &[Phase] = if mode.is_full_enumeration() {
            &[Phase::Full]
        } else {
            &[Phase::New, Phase::Updated, Phase::Deleted]
        };
        let name = source.name().to_string();
        let mut in_flight = InFlight::default();
        let mut sent = 0usize;

        for phase in phases {
            let mut item = phase.first(source)?;
            while let Some(current) = item {
                let statuses = adapter.send_item(&name, &current)?;
                in_flight.send(&current);
                source.record_progress(Target::Server, Command::Upload, &current.key);
                sent += 1;

                if in_flight.apply(source, statuses)? {
                    warn!(source = %name, sent, "server quota exceeded, upload stopped");
                    return Ok(());
                }
                item = phase.next(source)?;
            }
        }

        let remaining = adapter.finish_upload(&name)?;
        if in_flight.apply(source, remaining)? {
            warn!(source = %name, sent, "server quota exceeded");
        }
        if !in_flight.commands.is_empty() {
            warn!(source = %name, missing = in_flight.commands.len(), "no final status for some items");
        }
        debug!(source = %name, sent, "upload complete");
        Ok(())
    }

    fn download<P, A>(&self, source: &mut CacheSyncSource<P>, adapter: &A) -> SyncResult<()>
    where
        P: ItemProvider,
        A: ProtocolAdapter + ?Sized,
    {
        let name = source.name().to_string();
        let changes = adapter.receive_changes(&name)?;
        let mut statuses = Vec::with_capacity(changes.len());

        for change in changes {
            self.abort.check()?;
            source.record_progress(Target::Client, Command::Download, &change.key);
            let data = change.data.as_deref().unwrap_or_default();
            let status = match change.command {
                Command::Add => source.add_item(&change.key, data)?,
                Command::Replace => source.update_item(&change.key, data)?,
                Command::Delete => source.delete_item(&change.key)?,
                other => {
                    warn!(source = %name, key = %change.key, command = %other, "unsupported server command");
                    continue;
                }
            };
            statuses.push(ItemStatus::new(change.key, status));
        }

        debug!(source = %name, applied = statuses.len(), "server changes applied");
        adapter.send_statuses(&name, &statuses)
    }
}
