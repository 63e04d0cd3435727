//! # Quadstore KV
//!
//! The ordered key-value engine boundary used by the quad indexes.
//!
//! The index layer only needs four things from an engine:
//! - named sub-stores, each with its own [`KeyComparator`]
//! - snapshot read transactions and a single write transaction
//! - forward cursors supporting `seek` (first key >= target) and `next`
//! - atomic publication of a write transaction on commit
//!
//! [`MemoryKv`] provides these on top of immutable, `Arc`-shared versions:
//! a read snapshot pins one version, a write transaction works on a
//! copy-on-write set of sub-stores and publishes a new version on commit.
//! With a data directory it appends every commit to a checksummed log,
//! replays the log on open and compacts it into a checkpoint. The directory
//! is locked for as long as the engine is open.

pub mod engine;
pub mod error;
pub mod lock;
pub mod log;
pub mod memory;

pub use engine::{KeyComparator, KvCursor, KvEngine, KvEntry, KvRead, KvSnapshot, KvWriteTxn};
pub use error::{KvError, KvResult};
pub use lock::LOCK_FILE;
pub use log::{CommitLog, LogOp, LogRecord};
pub use memory::{MemoryKv, MemoryKvOptions, COMMIT_LOG_FILE, DEFAULT_CHECKPOINT_BYTES};
