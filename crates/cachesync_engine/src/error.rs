//! Error types for the sync engine.

use cachesync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for item provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Signature store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The source's signature store could not be opened.
    #[error("source {source_name} is not initialized: {reason}")]
    NotInitialized {
        /// Source name.
        source_name: String,
        /// Why the store is unusable.
        reason: String,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted operation or target state.
        to: String,
    },

    /// The item provider failed.
    #[error("item provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The signature store could not be committed at the end of a sync.
    #[error("failed to commit item cache of {source_name}: {cause}")]
    CommitFailed {
        /// Source name.
        source_name: String,
        /// Underlying storage failure.
        #[source]
        cause: StorageError,
    },

    /// The source finished its session with a recorded error.
    #[error("source {source_name} ended with error {code}: {message}")]
    SourceFailed {
        /// Source name.
        source_name: String,
        /// Last recorded error code.
        code: i32,
        /// Last recorded error message.
        message: String,
    },

    /// Protocol layer failure (transport, malformed exchange).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns true if this error means the sync was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// Errors reported by an item provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The item vanished between enumeration and fetch.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Local storage is full.
    #[error("device full")]
    DeviceFull,

    /// Any other provider failure.
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::NotInitialized {
            source_name: "contact".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "source contact is not initialized: permission denied"
        );

        let err = SyncError::from(ProviderError::NotFound("42".into()));
        assert_eq!(err.to_string(), "item provider error: item not found: 42");
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::Protocol("reset".into()).is_cancelled());
    }
}
