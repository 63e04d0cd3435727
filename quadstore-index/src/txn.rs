//! Transaction manager.
//!
//! Layers version bookkeeping over the engine's single-writer MVCC:
//!
//! - [`ReadTxn`] pins the committed version current at creation. Opening one
//!   never waits for the writer.
//! - [`WriteTxn`] is exclusive. A second `begin_write` fails or waits,
//!   according to the [`WriterPolicy`].
//! - Each version carries a count of open read handles. A superseded version
//!   whose count drops to zero is reclaimed.
//!
//! Handles close idempotently and close themselves on `Drop`; a write handle
//! dropped without commit rolls back.

use crate::config::WriterPolicy;
use crate::dict::Dictionary;
use crate::index_set::IndexSet;
use parking_lot::{Condvar, Mutex};
use quadstore_core::{Error, Result, StorageContext};
use quadstore_kv::{KvEngine, KvRead, KvSnapshot, KvWriteTxn};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Scope: one engine transaction shared by a handle and its iterators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Read,
    Write,
}

enum EngineTxn {
    Read(Box<dyn KvSnapshot>),
    Write(Box<dyn KvWriteTxn>),
}

impl EngineTxn {
    fn reader(&self) -> &dyn KvRead {
        match self {
            EngineTxn::Read(s) => s.as_read(),
            EngineTxn::Write(w) => w.as_read(),
        }
    }
}

/// State shared between a transaction handle and the iterators it created.
pub(crate) struct TxnScope {
    id: u64,
    kind: TxnKind,
    version: u64,
    closed: AtomicBool,
    engine: Mutex<Option<EngineTxn>>,
}

impl TxnScope {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        let kind = match self.kind {
            TxnKind::Read => "read",
            TxnKind::Write => "write",
        };
        Error::illegal_state(format!("{kind} transaction {} is closed", self.id))
    }

    /// Run `f` against the engine view. Fails once the scope is closed.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&dyn KvRead) -> Result<T>) -> Result<T> {
        let guard = self.engine.lock();
        match guard.as_ref() {
            Some(txn) => f(txn.reader()),
            None => Err(self.closed_error()),
        }
    }

    /// Run `f` against the engine write transaction.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut dyn KvWriteTxn) -> Result<T>) -> Result<T> {
        let mut guard = self.engine.lock();
        match guard.as_mut() {
            Some(EngineTxn::Write(w)) => f(&mut **w),
            Some(EngineTxn::Read(_)) => Err(Error::illegal_state(format!(
                "transaction {} is read-only",
                self.id
            ))),
            None => Err(self.closed_error()),
        }
    }

    /// Detach the engine transaction. Returns `None` if already closed.
    fn take(&self) -> Option<EngineTxn> {
        let taken = self.engine.lock().take();
        self.closed.store(true, Ordering::Release);
        taken
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Default)]
struct VersionTable {
    current: u64,
    /// Open read handles per pinned version.
    readers: FxHashMap<u64, usize>,
}

pub(crate) struct ManagerShared {
    engine: Arc<dyn KvEngine>,
    policy: WriterPolicy,
    index_set: IndexSet,
    dictionary: Arc<Dictionary>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
    versions: Mutex<VersionTable>,
    next_txn_id: AtomicU64,
    reclaimed: AtomicU64,
}

impl ManagerShared {
    #[inline]
    pub(crate) fn index_set(&self) -> &IndexSet {
        &self.index_set
    }

    #[inline]
    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    fn release_writer(&self) {
        let mut active = self.writer_active.lock();
        *active = false;
        self.writer_released.notify_one();
    }

    fn release_reader(&self, version: u64) {
        let mut table = self.versions.lock();
        let remaining = match table.readers.get_mut(&version) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            table.readers.remove(&version);
            if version < table.current {
                self.reclaim(version);
            }
        }
    }

    fn publish(&self, version: u64) {
        let mut table = self.versions.lock();
        let previous = std::mem::replace(&mut table.current, version);
        if previous < version && !table.readers.contains_key(&previous) {
            self.reclaim(previous);
        }
    }

    fn reclaim(&self, version: u64) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(version, "reclaimed superseded version");
    }
}

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnStats {
    pub current_version: u64,
    pub open_readers: usize,
    pub writer_active: bool,
    /// Superseded versions released so far.
    pub reclaimed_versions: u64,
}

/// Issues read and write handles over one engine.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<ManagerShared>,
}

impl TransactionManager {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        policy: WriterPolicy,
        index_set: IndexSet,
        dictionary: Arc<Dictionary>,
    ) -> Self {
        let current = engine.version();
        Self {
            shared: Arc::new(ManagerShared {
                engine,
                policy,
                index_set,
                dictionary,
                writer_active: Mutex::new(false),
                writer_released: Condvar::new(),
                versions: Mutex::new(VersionTable {
                    current,
                    readers: FxHashMap::default(),
                }),
                next_txn_id: AtomicU64::new(1),
                reclaimed: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    pub fn policy(&self) -> WriterPolicy {
        self.shared.policy
    }

    #[inline]
    pub fn index_set(&self) -> &IndexSet {
        &self.shared.index_set
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.shared.dictionary
    }

    pub fn current_version(&self) -> u64 {
        self.shared.versions.lock().current
    }

    fn scope(&self, kind: TxnKind, version: u64, txn: EngineTxn) -> Arc<TxnScope> {
        Arc::new(TxnScope {
            id: self.shared.next_txn_id.fetch_add(1, Ordering::Relaxed),
            kind,
            version,
            closed: AtomicBool::new(false),
            engine: Mutex::new(Some(txn)),
        })
    }

    /// Pin the current committed version.
    pub fn begin_read(&self) -> Result<ReadTxn> {
        let (snapshot, version) = {
            let mut table = self.shared.versions.lock();
            let snapshot = self.shared.engine.read().storage_op("begin read")?;
            let version = snapshot.version();
            *table.readers.entry(version).or_insert(0) += 1;
            (snapshot, version)
        };
        let scope = self.scope(TxnKind::Read, version, EngineTxn::Read(snapshot));
        tracing::trace!(txn = scope.id, version, "read transaction opened");
        Ok(ReadTxn {
            scope,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Acquire the writer slot, honoring the writer policy.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        {
            let mut active = self.shared.writer_active.lock();
            if *active {
                match self.shared.policy {
                    WriterPolicy::Fail => {
                        return Err(Error::conflict("a write transaction is already active"));
                    }
                    WriterPolicy::Block { timeout_ms } => {
                        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                        while *active {
                            if self
                                .shared
                                .writer_released
                                .wait_until(&mut active, deadline)
                                .timed_out()
                                && *active
                            {
                                return Err(Error::conflict(format!(
                                    "timed out after {timeout_ms}ms waiting for the active writer"
                                )));
                            }
                        }
                    }
                }
            }
            *active = true;
        }

        let txn = match self.shared.engine.write() {
            Ok(txn) => txn,
            Err(e) => {
                self.shared.release_writer();
                return Err(Error::storage("begin write", e));
            }
        };
        let version = txn.version();
        let scope = self.scope(TxnKind::Write, version, EngineTxn::Write(txn));
        tracing::debug!(txn = scope.id, base_version = version, "write transaction opened");
        Ok(WriteTxn {
            scope,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Open read handles per pinned version, oldest first.
    pub fn active_versions(&self) -> Vec<(u64, usize)> {
        let table = self.shared.versions.lock();
        let mut out: Vec<(u64, usize)> = table.readers.iter().map(|(v, n)| (*v, *n)).collect();
        out.sort_unstable();
        out
    }

    pub fn stats(&self) -> TxnStats {
        let (current_version, open_readers) = {
            let table = self.shared.versions.lock();
            (table.current, table.readers.values().sum::<usize>())
        };
        TxnStats {
            current_version,
            open_readers,
            writer_active: *self.shared.writer_active.lock(),
            reclaimed_versions: self.shared.reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("policy", &self.shared.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Handles
// ============================================================================

/// A snapshot-isolated read handle.
pub struct ReadTxn {
    scope: Arc<TxnScope>,
    shared: Arc<ManagerShared>,
}

impl ReadTxn {
    /// Commit version this handle observes.
    #[inline]
    pub fn version(&self) -> u64 {
        self.scope.version
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.scope.id
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }

    /// Release the snapshot. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(txn) = self.scope.take() {
            drop(txn);
            self.shared.release_reader(self.scope.version);
            tracing::trace!(txn = self.scope.id, version = self.scope.version, "read transaction closed");
        }
    }

    #[inline]
    pub(crate) fn scope(&self) -> &Arc<TxnScope> {
        &self.scope
    }

    #[inline]
    pub(crate) fn shared(&self) -> &ManagerShared {
        &self.shared
    }
}

impl Drop for ReadTxn {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ReadTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTxn")
            .field("id", &self.scope.id)
            .field("version", &self.scope.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The exclusive write handle.
pub struct WriteTxn {
    scope: Arc<TxnScope>,
    shared: Arc<ManagerShared>,
}

impl WriteTxn {
    /// Version this transaction is based on.
    #[inline]
    pub fn base_version(&self) -> u64 {
        self.scope.version
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.scope.id
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }

    /// Persist pending dictionary entries, then publish every change as a
    /// new version. Only read handles opened afterwards observe it.
    pub fn commit(&mut self) -> Result<u64> {
        let Some(txn) = self.scope.take() else {
            return Err(self.scope.closed_error());
        };
        let EngineTxn::Write(mut txn) = txn else {
            return Err(Error::illegal_state("not a write transaction"));
        };

        let dictionary = &self.shared.dictionary;
        let first_unpersisted = dictionary.first_unpersisted();
        let result = match dictionary.flush(&mut *txn) {
            Ok(_) => txn.commit().storage_op("commit"),
            Err(e) => {
                txn.abort();
                Err(e)
            }
        };

        match result {
            Ok(version) => {
                self.shared.publish(version);
                self.shared.release_writer();
                tracing::debug!(txn = self.scope.id, version, "write transaction committed");
                Ok(version)
            }
            Err(e) => {
                dictionary.requeue_from(first_unpersisted);
                self.shared.release_writer();
                tracing::warn!(txn = self.scope.id, error = %e, "commit failed");
                Err(e)
            }
        }
    }

    /// Discard every change. Fails if the handle is already closed.
    pub fn rollback(&mut self) -> Result<()> {
        if self.abort() {
            Ok(())
        } else {
            Err(self.scope.closed_error())
        }
    }

    /// Roll back if still open. Safe to call more than once.
    pub fn close(&mut self) {
        self.abort();
    }

    fn abort(&mut self) -> bool {
        match self.scope.take() {
            Some(EngineTxn::Write(txn)) => {
                txn.abort();
                self.shared.release_writer();
                tracing::debug!(txn = self.scope.id, "write transaction rolled back");
                true
            }
            Some(EngineTxn::Read(_)) => true,
            None => false,
        }
    }

    #[inline]
    pub(crate) fn scope(&self) -> &Arc<TxnScope> {
        &self.scope
    }

    #[inline]
    pub(crate) fn shared(&self) -> &ManagerShared {
        &self.shared
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WriteTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("id", &self.scope.id)
            .field("base_version", &self.scope.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadstore_core::IndexSpec;
    use quadstore_kv::MemoryKv;
    use std::thread;

    fn manager(policy: WriterPolicy) -> TransactionManager {
        TransactionManager::new(
            Arc::new(MemoryKv::new()),
            policy,
            IndexSet::new(IndexSpec::default()),
            Arc::new(Dictionary::new()),
        )
    }

    #[test]
    fn second_writer_fails_under_fail_policy() {
        let mgr = manager(WriterPolicy::Fail);
        let mut w = mgr.begin_write().unwrap();
        assert!(matches!(mgr.begin_write(), Err(Error::ConcurrencyConflict(_))));
        w.rollback().unwrap();
        assert!(mgr.begin_write().is_ok());
    }

    #[test]
    fn block_policy_times_out() {
        let mgr = manager(WriterPolicy::Block { timeout_ms: 20 });
        let _w = mgr.begin_write().unwrap();
        let start = Instant::now();
        assert!(matches!(mgr.begin_write(), Err(Error::ConcurrencyConflict(_))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn block_policy_waits_for_release() {
        let mgr = manager(WriterPolicy::Block { timeout_ms: 5_000 });
        let mut w = mgr.begin_write().unwrap();
        let other = mgr.clone();
        let waiter = thread::spawn(move || {
            let mut w2 = other.begin_write().unwrap();
            w2.commit().unwrap()
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(w.commit().unwrap(), 1);
        assert_eq!(waiter.join().unwrap(), 2);
    }

    #[test]
    fn closed_handles_are_illegal_state() {
        let mgr = manager(WriterPolicy::Fail);
        let mut w = mgr.begin_write().unwrap();
        w.commit().unwrap();
        assert!(w.is_closed());
        assert!(matches!(w.commit(), Err(Error::IllegalState(_))));
        assert!(matches!(w.rollback(), Err(Error::IllegalState(_))));
        w.close();

        let mut r = mgr.begin_read().unwrap();
        r.close();
        r.close();
        assert!(matches!(
            r.scope().read(|_| Ok(())),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn reader_counts_and_reclamation() {
        let mgr = manager(WriterPolicy::Fail);
        let mut r0a = mgr.begin_read().unwrap();
        let mut r0b = mgr.begin_read().unwrap();
        assert_eq!(mgr.active_versions(), vec![(0, 2)]);

        mgr.begin_write().unwrap().commit().unwrap();
        let r1 = mgr.begin_read().unwrap();
        assert_eq!(r1.version(), 1);
        assert_eq!(mgr.active_versions(), vec![(0, 2), (1, 1)]);
        assert_eq!(mgr.stats().reclaimed_versions, 0);

        r0a.close();
        assert_eq!(mgr.stats().reclaimed_versions, 0);
        r0b.close();
        assert_eq!(mgr.stats().reclaimed_versions, 1);
        assert_eq!(mgr.active_versions(), vec![(1, 1)]);

        drop(r1);
        let stats = mgr.stats();
        assert_eq!(stats.open_readers, 0);
        assert_eq!(stats.current_version, 1);
        assert!(!stats.writer_active);
    }

    #[test]
    fn dropped_writer_releases_slot() {
        let mgr = manager(WriterPolicy::Fail);
        {
            let _w = mgr.begin_write().unwrap();
            assert!(mgr.stats().writer_active);
        }
        assert!(!mgr.stats().writer_active);
        assert!(mgr.begin_write().is_ok());
    }

    #[test]
    fn write_scope_rejects_read_handle_writes() {
        let mgr = manager(WriterPolicy::Fail);
        let r = mgr.begin_read().unwrap();
        assert!(matches!(
            r.scope().write(|_| Ok(())),
            Err(Error::IllegalState(_))
        ));
    }
}
