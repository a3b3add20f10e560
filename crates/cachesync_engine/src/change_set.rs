//! Change detection: partition current items against the last-synced cache.
//!
//! Each previous cache entry is consumed at most once. A current key that
//! matches no entry is new; a matched key whose signature changed is
//! updated; entries left unconsumed are deletion candidates, each
//! confirmed by the provider before it counts.

use crate::abort::AbortFlag;
use crate::error::{SyncError, SyncResult};
use crate::signature::Signature;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// New, updated and deleted keys of one source for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Every current key, in enumeration order.
    pub all_keys: Vec<String>,
    /// Keys absent from the cache.
    pub new: Vec<String>,
    /// Keys whose signature differs from the cached one.
    pub updated: Vec<String>,
    /// Cached keys that no longer enumerate.
    pub deleted: Vec<String>,
    /// Keys whose signature still matches.
    pub unchanged: Vec<String>,
    /// Cache entries the comparison started from.
    pub previous: Vec<(String, Signature)>,
}

impl ChangeSet {
    /// Number of new items.
    pub fn new_count(&self) -> usize {
        self.new.len()
    }

    /// Number of updated items.
    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    /// Number of deleted items.
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Returns true if nothing needs to be sent.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Outcome of a change scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeScan {
    /// The scan ran to the end.
    Complete(ChangeSet),
    /// The abort flag was raised; the partial result is discarded.
    Aborted,
}

impl ChangeScan {
    /// Converts to a result, mapping an abort to [`SyncError::Cancelled`].
    pub fn into_result(self) -> SyncResult<ChangeSet> {
        match self {
            ChangeScan::Complete(changes) => Ok(changes),
            ChangeScan::Aborted => Err(SyncError::Cancelled),
        }
    }
}

/// Scratch copy of the previous cache that entries are consumed from.
struct Scratch {
    position: HashMap<String, usize>,
    consumed: Vec<bool>,
}

impl Scratch {
    fn new(previous: &[(String, Signature)]) -> Self {
        let position = previous
            .iter()
            .enumerate()
            .map(|(i, (key, _))| (key.clone(), i))
            .collect();
        Self {
            position,
            consumed: vec![false; previous.len()],
        }
    }

    /// Consumes the entry for `key`, returning its index if it was live.
    fn take(&mut self, key: &str) -> Option<usize> {
        let index = *self.position.get(key)?;
        if self.consumed[index] {
            return None;
        }
        self.consumed[index] = true;
        Some(index)
    }

    fn remaining(&self) -> impl Iterator<Item = usize> + '_ {
        self.consumed
            .iter()
            .enumerate()
            .filter(|(_, consumed)| !**consumed)
            .map(|(i, _)| i)
    }
}

/// Partitions `current_keys` against `previous`.
///
/// `signature_of` computes the current signature of a matched key; a
/// provider failure should come back as [`Signature::empty`], which forces
/// the item into `updated`. `is_really_deleted` confirms each deletion
/// candidate. The abort flag is polled before every key in both loops.
///
/// The cache itself is never touched: `previous` is a snapshot.
pub fn compute_changes<I, S, D>(
    current_keys: I,
    previous: Vec<(String, Signature)>,
    mut signature_of: S,
    mut is_really_deleted: D,
    abort: &AbortFlag,
) -> ChangeScan
where
    I: IntoIterator<Item = String>,
    S: FnMut(&str) -> Signature,
    D: FnMut(&str) -> bool,
{
    let mut scratch = Scratch::new(&previous);
    let mut changes = ChangeSet::default();
    let mut seen = HashSet::new();

    for key in current_keys {
        if abort.is_aborted() {
            debug!(scanned = changes.all_keys.len(), "change scan aborted");
            return ChangeScan::Aborted;
        }
        if !seen.insert(key.clone()) {
            warn!(key = %key, "provider enumerated a key twice, ignoring repeat");
            continue;
        }

        match scratch.take(&key) {
            None => changes.new.push(key.clone()),
            Some(index) => {
                let current = signature_of(&key);
                if current != previous[index].1 {
                    changes.updated.push(key.clone());
                } else {
                    changes.unchanged.push(key.clone());
                }
            }
        }
        changes.all_keys.push(key);
    }

    let candidates: Vec<usize> = scratch.remaining().collect();
    for index in candidates {
        if abort.is_aborted() {
            debug!("change scan aborted during deletion check");
            return ChangeScan::Aborted;
        }
        let key = &previous[index].0;
        if is_really_deleted(key) {
            changes.deleted.push(key.clone());
        } else {
            debug!(key = %key, "deletion vetoed by provider");
        }
    }

    debug!(
        new = changes.new.len(),
        updated = changes.updated.len(),
        deleted = changes.deleted.len(),
        unchanged = changes.unchanged.len(),
        "change scan complete"
    );
    changes.previous = previous;
    ChangeScan::Complete(changes)
}

/// Answers "would a sync find anything to send" without classifying.
///
/// Returns true as soon as the counts differ, a key is missing from the
/// cache, or a signature mismatches. Repeated keys count once, as in
/// [`compute_changes`].
pub fn has_local_changes<I, S>(
    current_keys: I,
    previous: &[(String, Signature)],
    mut signature_of: S,
    abort: &AbortFlag,
) -> SyncResult<bool>
where
    I: IntoIterator<Item = String>,
    S: FnMut(&str) -> Signature,
{
    let cached: HashMap<&str, &Signature> = previous
        .iter()
        .map(|(key, signature)| (key.as_str(), signature))
        .collect();

    let mut seen = HashSet::new();
    for key in current_keys {
        abort.check()?;
        if !seen.insert(key.clone()) {
            continue;
        }
        match cached.get(key.as_str()) {
            None => return Ok(true),
            Some(stored) => {
                if signature_of(&key) != **stored {
                    return Ok(true);
                }
            }
        }
    }

    Ok(seen.len() != cached.len())
}
