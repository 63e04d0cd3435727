//! Value dictionary: bijective `Term` ↔ `TermId` mapping.
//!
//! Forward (id → term): `Vec` index. Reverse (term → id): `FxHashMap`.
//! Both sides share one `Arc<Term>`.
//!
//! Ids are allocated densely from [`TermId::FIRST`]. New mappings stay
//! pending in memory until the next commit writes them to the `values`
//! sub-store (key = id as 8 bytes BE, value = [`Term::encode`]). An
//! aborted transaction's allocations therefore survive to the next commit,
//! which keeps ids stable for the lifetime of the store.

use parking_lot::RwLock;
use quadstore_core::{Error, Result, StorageContext, Term, TermId};
use quadstore_kv::{KeyComparator, KvRead, KvWriteTxn};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Sub-store holding the persisted mappings.
pub const VALUES_STORE: &str = "values";

#[derive(Default)]
struct DictState {
    /// `by_id[i]` is the term for id `i + 1`.
    by_id: Vec<Arc<Term>>,
    by_term: FxHashMap<Arc<Term>, TermId>,
    /// Allocated but not yet written to the engine.
    pending: Vec<TermId>,
}

impl DictState {
    fn get(&self, id: TermId) -> Option<&Arc<Term>> {
        let idx = id.as_u64().checked_sub(1)?;
        self.by_id.get(usize::try_from(idx).ok()?)
    }

    fn next_id(&self) -> TermId {
        TermId::new(self.by_id.len() as u64 + 1)
    }
}

/// Owned dictionary instance; one per store.
#[derive(Default)]
pub struct Dictionary {
    state: RwLock<DictState>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the `values` sub-store. A view without the store yields
    /// an empty dictionary.
    pub fn load<R: KvRead + ?Sized>(view: &R) -> Result<Self> {
        let dict = Self::new();
        if !view.has_store(VALUES_STORE) {
            return Ok(dict);
        }
        let mut cursor = view.cursor(VALUES_STORE).storage_op("open values cursor")?;
        {
            let mut state = dict.state.write();
            while let Some(entry) = cursor.next().storage_op("scan values")? {
                let id = TermId::read_be(&entry.key).ok_or_else(|| {
                    Error::invalid_term(format!("value key of {} bytes", entry.key.len()))
                })?;
                if id != state.next_id() {
                    return Err(Error::DictionaryCorruption { id: state.next_id() });
                }
                let term = Arc::new(Term::decode(&entry.value)?);
                state.by_term.insert(Arc::clone(&term), id);
                state.by_id.push(term);
            }
            tracing::debug!(terms = state.by_id.len(), "dictionary loaded");
        }
        Ok(dict)
    }

    /// Id for `term`, allocating the next id on first sight.
    pub fn encode(&self, term: &Term) -> TermId {
        if let Some(id) = self.state.read().by_term.get(term) {
            return *id;
        }
        let mut state = self.state.write();
        if let Some(id) = state.by_term.get(term) {
            return *id;
        }
        let id = state.next_id();
        let term = Arc::new(term.clone());
        state.by_term.insert(Arc::clone(&term), id);
        state.by_id.push(term);
        state.pending.push(id);
        tracing::trace!(%id, "allocated term id");
        id
    }

    /// Id for `term` if it is known. Never allocates.
    pub fn lookup(&self, term: &Term) -> Option<TermId> {
        self.state.read().by_term.get(term).copied()
    }

    /// Term for `id`. An unmapped id is corruption.
    pub fn decode(&self, id: TermId) -> Result<Term> {
        self.state
            .read()
            .get(id)
            .map(|t| Term::clone(t))
            .ok_or(Error::DictionaryCorruption { id })
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of mappings not yet written to the engine.
    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Write all pending mappings into `txn`. They count as persisted once
    /// the transaction commits; on failure they stay pending.
    pub fn flush(&self, txn: &mut dyn KvWriteTxn) -> Result<usize> {
        let mut state = self.state.write();
        if state.pending.is_empty() {
            return Ok(0);
        }
        txn.create_store(VALUES_STORE, KeyComparator::BYTEWISE)
            .storage_op("create values store")?;
        for id in &state.pending {
            let term = state
                .get(*id)
                .ok_or(Error::DictionaryCorruption { id: *id })?;
            txn.put(VALUES_STORE, &id.to_be_bytes(), &term.encode())
                .storage_op("write value")?;
        }
        let written = state.pending.len();
        state.pending.clear();
        tracing::debug!(written, "dictionary entries flushed");
        Ok(written)
    }

    /// Put previously flushed ids back on the pending list, e.g. after the
    /// commit that carried them failed.
    pub(crate) fn requeue_from(&self, first: TermId) {
        let mut state = self.state.write();
        let end = state.next_id().as_u64();
        let start = first.as_u64().max(TermId::FIRST.as_u64());
        let mut ids: Vec<TermId> = (start..end).map(TermId::new).collect();
        ids.retain(|id| !state.pending.contains(id));
        state.pending.extend(ids);
        state.pending.sort();
    }

    /// First id that has not been persisted yet.
    pub(crate) fn first_unpersisted(&self) -> TermId {
        let state = self.state.read();
        state.pending.first().copied().unwrap_or_else(|| state.next_id())
    }

    /// Verify that every forward entry maps back to its own id.
    pub fn check_consistency(&self) -> Result<()> {
        let state = self.state.read();
        if state.by_id.len() != state.by_term.len() {
            return Err(Error::DictionaryCorruption {
                id: state.next_id(),
            });
        }
        for (idx, term) in state.by_id.iter().enumerate() {
            let id = TermId::new(idx as u64 + 1);
            if state.by_term.get(term.as_ref()) != Some(&id) {
                return Err(Error::DictionaryCorruption { id });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Dictionary")
            .field("terms", &state.by_id.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}
