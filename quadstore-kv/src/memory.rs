//! In-memory MVCC engine.
//!
//! State is a chain of immutable [`Version`]s. The current version sits
//! behind a `RwLock<Arc<Version>>`; readers clone the `Arc` (the lock is held
//! only for that clone, never across a writer's work). The writer copies the
//! sub-store map of its base version and clones individual sub-stores on
//! first write (`Arc::make_mut`), so untouched sub-stores stay shared.
//!
//! A superseded version is freed as soon as the last snapshot pinning it is
//! dropped. [`MemoryKv::retained_versions`] reports how many superseded
//! versions are still pinned.
//!
//! Commits serialize on a separate commit mutex. The staleness check and the
//! log append (including `fsync`) run under that mutex only; the `RwLock`
//! on the current version is write-locked just for the pointer swap, so
//! readers never wait on disk I/O.
//!
//! A durable engine locks its data directory, replays the commit log and
//! compacts it into one checkpoint frame when it holds more than one frame.
//! Commits that push the log past [`MemoryKvOptions::checkpoint_bytes`]
//! compact it again.

use crate::engine::{KeyComparator, KvCursor, KvEngine, KvEntry, KvRead, KvSnapshot, KvWriteTxn};
use crate::error::{KvError, KvResult};
use crate::lock::DirLock;
use crate::log::{CommitLog, LogOp, LogRecord};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

/// File name of the commit log inside the data directory.
pub const COMMIT_LOG_FILE: &str = "commit.log";

/// Log size past which a commit compacts the log.
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 64 * 1024 * 1024;

// ============================================================================
// Keys and sub-stores
// ============================================================================

/// A key ordered by its sub-store's comparator.
#[derive(Clone)]
struct OrderedKey {
    bytes: Box<[u8]>,
    cmp: fn(&[u8], &[u8]) -> Ordering,
}

impl OrderedKey {
    fn new(bytes: &[u8], comparator: &KeyComparator) -> Self {
        Self {
            bytes: bytes.into(),
            cmp: comparator.function(),
        }
    }
}

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&self.bytes, &other.bytes)
    }
}

#[derive(Clone)]
struct SubStore {
    comparator: KeyComparator,
    /// Comparator name as written to the log. Differs from
    /// `comparator.name()` only for a replayed store whose owner has not
    /// re-registered its comparator yet.
    recorded: Arc<str>,
    entries: BTreeMap<OrderedKey, Box<[u8]>>,
}

impl SubStore {
    fn new(comparator: KeyComparator) -> Self {
        Self {
            comparator,
            recorded: comparator.name().into(),
            entries: BTreeMap::new(),
        }
    }

    /// A store rebuilt from the log, ordered bytewise until re-registered.
    fn replayed(recorded: &str) -> Self {
        Self {
            comparator: KeyComparator::BYTEWISE,
            recorded: recorded.into(),
            entries: BTreeMap::new(),
        }
    }

    fn key(&self, bytes: &[u8]) -> OrderedKey {
        OrderedKey::new(bytes, &self.comparator)
    }

    fn get(&self, key: &[u8]) -> Option<Box<[u8]>> {
        self.entries.get(&self.key(key)).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Option<Box<[u8]>> {
        let k = self.key(key);
        self.entries.insert(k, value.into())
    }

    fn delete(&mut self, key: &[u8]) -> Option<Box<[u8]>> {
        let k = self.key(key);
        self.entries.remove(&k)
    }

    /// Re-sort all entries under a new comparator.
    fn reorder(&self, comparator: KeyComparator) -> Self {
        let mut out = SubStore::new(comparator);
        for (k, v) in &self.entries {
            let key = out.key(&k.bytes);
            out.entries.insert(key, v.clone());
        }
        out
    }
}

/// One immutable committed state.
struct Version {
    number: u64,
    stores: FxHashMap<String, Arc<SubStore>>,
}

fn lookup<'a>(
    stores: &'a FxHashMap<String, Arc<SubStore>>,
    name: &str,
) -> KvResult<&'a Arc<SubStore>> {
    stores
        .get(name)
        .ok_or_else(|| KvError::NoSuchStore(name.to_string()))
}

fn sorted_names(stores: &FxHashMap<String, Arc<SubStore>>) -> Vec<String> {
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    names
}

/// The complete state of `stores` as one checkpoint record.
fn checkpoint_record(number: u64, stores: &FxHashMap<String, Arc<SubStore>>) -> LogRecord {
    let mut named: Vec<(&String, &Arc<SubStore>)> = stores.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    let mut ops = Vec::new();
    for (name, store) in named {
        ops.push(LogOp::CreateStore {
            store: name.clone(),
            comparator: store.recorded.to_string(),
        });
        for (k, v) in &store.entries {
            ops.push(LogOp::Put {
                store: name.clone(),
                key: k.bytes.clone(),
                value: v.clone(),
            });
        }
    }
    LogRecord::checkpoint(number, ops)
}

// ============================================================================
// Options
// ============================================================================

/// Construction options for [`MemoryKv`].
#[derive(Debug, Clone)]
pub struct MemoryKvOptions {
    /// Directory for the commit log. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `fsync` the log after every commit.
    pub sync_commits: bool,
    /// Compact the log once it grows past this many bytes. `0` compacts
    /// only on open.
    pub checkpoint_bytes: u64,
}

impl Default for MemoryKvOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_commits: false,
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
        }
    }
}

impl MemoryKvOptions {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn durable(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }
}

// ============================================================================
// MemoryKv
// ============================================================================

struct Shared {
    current: RwLock<Arc<Version>>,
    writer_active: AtomicBool,
    /// Serializes publication; never held together with a `current` write lock
    /// across I/O.
    commit_lock: Mutex<()>,
    log: Option<Mutex<CommitLog>>,
    checkpoint_bytes: u64,
    retired: Mutex<Vec<Weak<Version>>>,
    _dir_lock: Option<DirLock>,
}

/// In-memory ordered key-value engine with snapshot reads.
#[derive(Clone)]
pub struct MemoryKv {
    shared: Arc<Shared>,
}

impl MemoryKv {
    /// A purely in-memory engine.
    pub fn new() -> Self {
        Self::from_parts(
            Version {
                number: 0,
                stores: FxHashMap::default(),
            },
            None,
            None,
            0,
        )
    }

    /// Open an engine, replaying the commit log when `data_dir` is set.
    ///
    /// Fails with [`KvError::Locked`] while another engine has the same
    /// directory open.
    pub fn open(options: MemoryKvOptions) -> KvResult<Self> {
        let Some(dir) = options.data_dir else {
            return Ok(Self::new());
        };
        std::fs::create_dir_all(&dir)?;
        let dir_lock = DirLock::acquire(&dir)?;
        let (mut log, records) =
            CommitLog::open(dir.join(COMMIT_LOG_FILE), options.sync_commits)?;

        let mut version = Version {
            number: 0,
            stores: FxHashMap::default(),
        };
        for record in &records {
            if record.checkpoint {
                version.stores.clear();
            } else if record.version != version.number + 1 {
                return Err(KvError::Corrupt(format!(
                    "commit log out of sequence: expected version {}, found {}",
                    version.number + 1,
                    record.version
                )));
            }
            apply_record(&mut version.stores, record);
            version.number = record.version;
        }

        tracing::debug!(
            dir = %dir.display(),
            version = version.number,
            stores = version.stores.len(),
            frames = records.len(),
            "memory kv replayed"
        );

        if records.len() > 1 {
            if let Err(err) = log.rewrite(&checkpoint_record(version.number, &version.stores)) {
                if log.is_poisoned() {
                    return Err(err);
                }
                tracing::warn!(error = %err, "checkpoint on open failed; keeping the full log");
            }
        }

        Ok(Self::from_parts(
            version,
            Some(log),
            Some(dir_lock),
            options.checkpoint_bytes,
        ))
    }

    fn from_parts(
        version: Version,
        log: Option<CommitLog>,
        dir_lock: Option<DirLock>,
        checkpoint_bytes: u64,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                current: RwLock::new(Arc::new(version)),
                writer_active: AtomicBool::new(false),
                commit_lock: Mutex::new(()),
                log: log.map(Mutex::new),
                checkpoint_bytes,
                retired: Mutex::new(Vec::new()),
                _dir_lock: dir_lock,
            }),
        }
    }

    /// Whether commits are written to a log.
    pub fn is_durable(&self) -> bool {
        self.shared.log.is_some()
    }

    /// Current size of the commit log in bytes, `None` when in memory.
    pub fn log_bytes(&self) -> Option<u64> {
        self.shared.log.as_ref().map(|log| log.lock().len())
    }

    /// Compact the commit log into a single checkpoint of the current
    /// version. A no-op for an in-memory engine.
    pub fn checkpoint(&self) -> KvResult<()> {
        let Some(log) = &self.shared.log else {
            return Ok(());
        };
        let _commit = self.shared.commit_lock.lock();
        let version = self.current();
        log.lock()
            .rewrite(&checkpoint_record(version.number, &version.stores))
    }

    /// Number of superseded versions still pinned by live snapshots.
    pub fn retained_versions(&self) -> usize {
        let mut retired = self.shared.retired.lock();
        retired.retain(|w| w.strong_count() > 0);
        retired.len()
    }

    fn current(&self) -> Arc<Version> {
        Arc::clone(&self.shared.current.read())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("version", &self.shared.current.read().number)
            .field("durable", &self.is_durable())
            .finish()
    }
}

/// Replay one committed record. Stores created during replay use the
/// bytewise order until the owner re-registers its comparator.
fn apply_record(stores: &mut FxHashMap<String, Arc<SubStore>>, record: &LogRecord) {
    for op in &record.ops {
        match op {
            LogOp::CreateStore { store, comparator } => match stores.get_mut(store) {
                Some(existing) => Arc::make_mut(existing).recorded = comparator.as_str().into(),
                None => {
                    stores.insert(store.clone(), Arc::new(SubStore::replayed(comparator)));
                }
            },
            LogOp::DropStore { store } => {
                stores.remove(store);
            }
            LogOp::Put { store, key, value } => {
                let s = stores
                    .entry(store.clone())
                    .or_insert_with(|| Arc::new(SubStore::new(KeyComparator::BYTEWISE)));
                Arc::make_mut(s).put(key, value);
            }
            LogOp::Delete { store, key } => {
                if let Some(s) = stores.get_mut(store) {
                    Arc::make_mut(s).delete(key);
                }
            }
        }
    }
}

impl KvEngine for MemoryKv {
    fn version(&self) -> u64 {
        self.shared.current.read().number
    }

    fn read(&self) -> KvResult<Box<dyn KvSnapshot>> {
        Ok(Box::new(MemorySnapshot {
            version: self.current(),
        }))
    }

    fn write(&self) -> KvResult<Box<dyn KvWriteTxn>> {
        if self
            .shared
            .writer_active
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            return Err(KvError::Conflict(
                "a write transaction is already active".to_string(),
            ));
        }
        let base = self.current();
        Ok(Box::new(MemoryWriteTxn {
            shared: Arc::clone(&self.shared),
            base: base.number,
            stores: base.stores.clone(),
            ops: Vec::new(),
            finished: false,
        }))
    }
}

// ============================================================================
// Snapshot
// ============================================================================

struct MemorySnapshot {
    version: Arc<Version>,
}

impl KvRead for MemorySnapshot {
    fn version(&self) -> u64 {
        self.version.number
    }

    fn get(&self, store: &str, key: &[u8]) -> KvResult<Option<Box<[u8]>>> {
        Ok(lookup(&self.version.stores, store)?.get(key))
    }

    fn cursor(&self, store: &str) -> KvResult<Box<dyn KvCursor>> {
        let s = lookup(&self.version.stores, store)?;
        Ok(Box::new(MemoryCursor::new(Arc::clone(s))))
    }

    fn entry_count(&self, store: &str) -> KvResult<u64> {
        Ok(lookup(&self.version.stores, store)?.entries.len() as u64)
    }

    fn has_store(&self, store: &str) -> bool {
        self.version.stores.contains_key(store)
    }

    fn store_names(&self) -> Vec<String> {
        sorted_names(&self.version.stores)
    }
}

impl KvSnapshot for MemorySnapshot {
    fn as_read(&self) -> &dyn KvRead {
        self
    }
}

// ============================================================================
// Write transaction
// ============================================================================

struct MemoryWriteTxn {
    shared: Arc<Shared>,
    base: u64,
    stores: FxHashMap<String, Arc<SubStore>>,
    ops: Vec<LogOp>,
    finished: bool,
}

impl MemoryWriteTxn {
    fn store_mut(&mut self, store: &str) -> KvResult<&mut SubStore> {
        self.stores
            .get_mut(store)
            .map(Arc::make_mut)
            .ok_or_else(|| KvError::NoSuchStore(store.to_string()))
    }

    fn publish(&mut self) -> KvResult<u64> {
        let shared = Arc::clone(&self.shared);
        let _commit = shared.commit_lock.lock();
        let current = shared.current.read().number;
        if current != self.base {
            return Err(KvError::Conflict(format!(
                "base version {} is stale (current {})",
                self.base, current
            )));
        }
        let number = self.base + 1;
        // every version gets a frame, empty or not, so replay stays sequential
        if let Some(log) = &shared.log {
            let mut log = log.lock();
            log.append(&LogRecord::commit(number, std::mem::take(&mut self.ops)))?;
            if shared.checkpoint_bytes > 0 && log.len() > shared.checkpoint_bytes {
                if let Err(err) = log.rewrite(&checkpoint_record(number, &self.stores)) {
                    tracing::warn!(version = number, error = %err, "checkpoint after commit failed");
                }
            }
        }
        let next = Arc::new(Version {
            number,
            stores: std::mem::take(&mut self.stores),
        });
        let previous = std::mem::replace(&mut *shared.current.write(), next);
        shared.retired.lock().push(Arc::downgrade(&previous));
        Ok(number)
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.writer_active.store(false, AtomicOrdering::Release);
        }
    }
}

impl KvRead for MemoryWriteTxn {
    fn version(&self) -> u64 {
        self.base
    }

    fn get(&self, store: &str, key: &[u8]) -> KvResult<Option<Box<[u8]>>> {
        Ok(lookup(&self.stores, store)?.get(key))
    }

    fn cursor(&self, store: &str) -> KvResult<Box<dyn KvCursor>> {
        let s = lookup(&self.stores, store)?;
        Ok(Box::new(MemoryCursor::new(Arc::clone(s))))
    }

    fn entry_count(&self, store: &str) -> KvResult<u64> {
        Ok(lookup(&self.stores, store)?.entries.len() as u64)
    }

    fn has_store(&self, store: &str) -> bool {
        self.stores.contains_key(store)
    }

    fn store_names(&self) -> Vec<String> {
        sorted_names(&self.stores)
    }
}

impl KvWriteTxn for MemoryWriteTxn {
    fn as_read(&self) -> &dyn KvRead {
        self
    }

    fn create_store(&mut self, store: &str, comparator: KeyComparator) -> KvResult<()> {
        match self.stores.get(store) {
            Some(existing) if existing.comparator.name() == comparator.name() => return Ok(()),
            Some(existing) => {
                tracing::debug!(
                    store,
                    from = existing.comparator.name(),
                    to = comparator.name(),
                    entries = existing.entries.len(),
                    "re-sorting sub-store under new comparator"
                );
                let already_recorded = &*existing.recorded == comparator.name();
                let reordered = existing.reorder(comparator);
                self.stores.insert(store.to_string(), Arc::new(reordered));
                // binding the logged comparator after replay changes nothing on disk
                if already_recorded {
                    return Ok(());
                }
            }
            None => {
                self.stores
                    .insert(store.to_string(), Arc::new(SubStore::new(comparator)));
            }
        }
        self.ops.push(LogOp::CreateStore {
            store: store.to_string(),
            comparator: comparator.name().to_string(),
        });
        Ok(())
    }

    fn drop_store(&mut self, store: &str) -> KvResult<()> {
        if self.stores.remove(store).is_some() {
            self.ops.push(LogOp::DropStore {
                store: store.to_string(),
            });
        }
        Ok(())
    }

    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> KvResult<Option<Box<[u8]>>> {
        let prev = self.store_mut(store)?.put(key, value);
        self.ops.push(LogOp::Put {
            store: store.to_string(),
            key: key.into(),
            value: value.into(),
        });
        Ok(prev)
    }

    fn delete(&mut self, store: &str, key: &[u8]) -> KvResult<Option<Box<[u8]>>> {
        let prev = self.store_mut(store)?.delete(key);
        if prev.is_some() {
            self.ops.push(LogOp::Delete {
                store: store.to_string(),
                key: key.into(),
            });
        }
        Ok(prev)
    }

    fn commit(mut self: Box<Self>) -> KvResult<u64> {
        let result = self.publish();
        self.release();
        result
    }

    fn abort(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for MemoryWriteTxn {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Cursor
// ============================================================================

struct MemoryCursor {
    store: Arc<SubStore>,
    position: Option<OrderedKey>,
}

impl MemoryCursor {
    fn new(store: Arc<SubStore>) -> Self {
        Self {
            store,
            position: None,
        }
    }

    fn land(&mut self, found: Option<(&OrderedKey, &Box<[u8]>)>) -> Option<KvEntry> {
        let (k, v) = found?;
        let entry = KvEntry {
            key: k.bytes.clone(),
            value: v.clone(),
        };
        self.position = Some(k.clone());
        Some(entry)
    }
}

impl KvCursor for MemoryCursor {
    fn seek(&mut self, key: &[u8]) -> KvResult<Option<KvEntry>> {
        let target = self.store.key(key);
        let store = Arc::clone(&self.store);
        let found = store
            .entries
            .range((Bound::Included(target), Bound::Unbounded))
            .next();
        Ok(self.land(found))
    }

    fn next(&mut self) -> KvResult<Option<KvEntry>> {
        let store = Arc::clone(&self.store);
        let found = match self.position.take() {
            None => store.entries.iter().next(),
            Some(pos) => store
                .entries
                .range((Bound::Excluded(pos), Bound::Unbounded))
                .next(),
        };
        Ok(self.land(found))
    }
}
