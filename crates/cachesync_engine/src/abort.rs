//! Session-scoped cancellation flag.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared abort flag.
///
/// The owner of a sync session hands clones to every source; any clone
/// can raise the flag (user cancel, transport failure) and every loop
/// that scans keys or applies statuses polls it between steps.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Creates a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lowers the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true once the flag is raised.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(SyncError::Cancelled)` if the flag is raised.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_aborted() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = AbortFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());

        other.abort();
        assert!(flag.is_aborted());
        assert!(matches!(flag.check(), Err(SyncError::Cancelled)));

        flag.reset();
        assert!(!other.is_aborted());
    }
}
