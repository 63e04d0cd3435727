//! Error types for the key-value engine.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Commit log or persisted entry failed validation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("no such sub-store: {0}")]
    NoSuchStore(String),

    /// A second writer, or a commit against a stale base version.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The data directory is held by another open engine.
    #[error("data directory locked: {0}")]
    Locked(String),

    /// The commit log is in an unknown state after a failed write.
    #[error("commit log unusable: {0}")]
    Poisoned(String),
}

pub type KvResult<T> = std::result::Result<T, KvError>;
