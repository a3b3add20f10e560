//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A cache name that is not a plain file name.
    #[error("invalid store name {0:?}")]
    InvalidName(String),

    /// The store file could not be opened or created.
    #[error("cannot open store at {path}: {source}")]
    Open {
        /// Path of the store file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The store file could not be written.
    #[error("cannot flush store to {path}: {source}")]
    Flush {
        /// Path of the store file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The store refused to flush (test stores only).
    #[error("flush rejected: {0}")]
    Rejected(String),
}
