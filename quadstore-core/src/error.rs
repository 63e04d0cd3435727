//! Error types for the quad store

use crate::ids::TermId;
use quadstore_kv::KvError;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Quad store error type
#[derive(Error, Debug)]
pub enum Error {
    /// A surrogate id with no dictionary mapping. Never retried.
    #[error("Dictionary corruption: no term mapped to id {id}")]
    DictionaryCorruption { id: TermId },

    /// Use of a closed iterator or transaction handle
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Underlying engine failure
    #[error("Storage error during {op}: {source}")]
    Storage {
        op: String,
        #[source]
        source: KvError,
    },

    /// Second writer, writer wait timeout, or a stale commit
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Bad permutation configuration
    #[error("Invalid index spec: {0}")]
    InvalidIndexSpec(String),

    /// Persisted term bytes that do not decode
    #[error("Invalid term encoding: {0}")]
    InvalidTerm(String),

    /// Configuration load or validation
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an engine error with the operation that failed
    pub fn storage(op: impl Into<String>, source: KvError) -> Self {
        match source {
            KvError::Conflict(msg) => Error::ConcurrencyConflict(msg),
            source => Error::Storage {
                op: op.into(),
                source,
            },
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(msg.into())
    }

    /// Create a concurrency conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::ConcurrencyConflict(msg.into())
    }

    /// Create an invalid index spec error
    pub fn invalid_index_spec(msg: impl Into<String>) -> Self {
        Error::InvalidIndexSpec(msg.into())
    }

    /// Create an invalid term error
    pub fn invalid_term(msg: impl Into<String>) -> Self {
        Error::InvalidTerm(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for errors that indicate a broken store rather than a caller mistake.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DictionaryCorruption { .. } | Error::InvalidTerm(_)
        )
    }
}

impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        Error::storage("engine", err)
    }
}

/// Attach an operation name to engine results.
pub trait StorageContext<T> {
    fn storage_op(self, op: &str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, KvError> {
    fn storage_op(self, op: &str) -> Result<T> {
        self.map_err(|e| Error::storage(op, e))
    }
}
