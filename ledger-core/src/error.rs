//! Error types for the ledger
//!
//! Integrity failures (hash mismatch, broken link) are not errors: they are
//! reported as data through [`crate::verify::VerificationResult`].

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed draft or update, rejected before it reaches the chain builder
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record id unknown to the store
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record store failure (RocksDB, in-memory store, ...)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error reports an unknown record id
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Other(format!("Metrics error: {}", err))
    }
}
