//! Engine traits: sub-stores, snapshot reads, the single writer, cursors.
//!
//! All traits are object safe. Snapshots and cursors own (`Arc`) the data
//! they read, so a cursor can outlive the borrow that created it and be
//! stored inside a lazily-bound iterator.

use crate::error::KvResult;
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// KeyComparator
// ============================================================================

/// A named key ordering for one sub-store.
///
/// The name is what gets persisted; the function is supplied again by the
/// caller each time the store is opened.
#[derive(Clone, Copy)]
pub struct KeyComparator {
    name: &'static str,
    cmp: fn(&[u8], &[u8]) -> Ordering,
}

impl KeyComparator {
    /// Plain unsigned lexicographic order (`<[u8] as Ord>`).
    pub const BYTEWISE: KeyComparator = KeyComparator::new("bytewise", bytewise);

    pub const fn new(name: &'static str, cmp: fn(&[u8], &[u8]) -> Ordering) -> Self {
        Self { name, cmp }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn function(&self) -> fn(&[u8], &[u8]) -> Ordering {
        self.cmp
    }

    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }
}

impl fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyComparator").field(&self.name).finish()
    }
}

fn bytewise(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

// ============================================================================
// Entries and cursors
// ============================================================================

/// One key/value pair returned by a cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: Box<[u8]>,
    pub value: Box<[u8]>,
}

/// Forward cursor over one sub-store.
pub trait KvCursor: Send {
    /// Position at the first key `>= key` (in the store's comparator order)
    /// and return it.
    fn seek(&mut self, key: &[u8]) -> KvResult<Option<KvEntry>>;

    /// Advance past the current entry. An unpositioned cursor starts at the
    /// first key of the store.
    fn next(&mut self) -> KvResult<Option<KvEntry>>;
}

// ============================================================================
// Transactions
// ============================================================================

/// Read operations shared by snapshots and the write transaction.
pub trait KvRead: Send + Sync {
    /// Version this view is based on.
    fn version(&self) -> u64;

    fn get(&self, store: &str, key: &[u8]) -> KvResult<Option<Box<[u8]>>>;

    /// Open a cursor over the current state of `store`.
    ///
    /// For a write transaction the cursor sees the writes made before it was
    /// opened.
    fn cursor(&self, store: &str) -> KvResult<Box<dyn KvCursor>>;

    /// Number of entries in `store`.
    fn entry_count(&self, store: &str) -> KvResult<u64>;

    fn has_store(&self, store: &str) -> bool;

    fn store_names(&self) -> Vec<String>;
}

/// A pinned, immutable read view.
pub trait KvSnapshot: KvRead {
    fn as_read(&self) -> &dyn KvRead;
}

/// The engine's single write transaction.
///
/// Nothing is visible to other transactions until [`KvWriteTxn::commit`].
pub trait KvWriteTxn: KvRead {
    fn as_read(&self) -> &dyn KvRead;

    /// Create `store` if missing. If it exists under a different comparator
    /// name, its entries are re-sorted with `comparator`.
    fn create_store(&mut self, store: &str, comparator: KeyComparator) -> KvResult<()>;

    /// Delete `store` and all its entries. Missing stores are ignored.
    fn drop_store(&mut self, store: &str) -> KvResult<()>;

    /// Insert or overwrite. Returns the previous value.
    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> KvResult<Option<Box<[u8]>>>;

    /// Remove `key`. Returns the previous value (`None` when absent).
    fn delete(&mut self, store: &str, key: &[u8]) -> KvResult<Option<Box<[u8]>>>;

    /// Publish all changes as a new version and return its number.
    fn commit(self: Box<Self>) -> KvResult<u64>;

    /// Discard all changes.
    fn abort(self: Box<Self>);
}

/// An ordered key-value engine with single-writer MVCC.
pub trait KvEngine: Send + Sync {
    /// Latest committed version.
    fn version(&self) -> u64;

    /// Pin the latest committed version. Never waits for the writer.
    fn read(&self) -> KvResult<Box<dyn KvSnapshot>>;

    /// Start the write transaction. Fails with `KvError::Conflict` while
    /// another one is live.
    fn write(&self) -> KvResult<Box<dyn KvWriteTxn>>;
}
