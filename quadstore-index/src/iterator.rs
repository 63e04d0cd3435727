//! RecordIterator: late-bound scan of one index range.
//!
//! Construction only records the plan. The engine cursor is opened on the
//! first pull (or by [`RecordIterator::force_open`]), so iterators can be
//! built speculatively and dropped unused for free.
//!
//! Per pull:
//! - seek to `low` on the first pull, otherwise advance
//! - stop at the first key past `high`
//! - skip keys rejected by the matcher or the flag filter
//! - decode the key with the permutation layout and the value flag
//!
//! Lifecycle: `Pending → Open → Exhausted`, and `Closed` from any state.
//! `close` is idempotent and runs on `Drop`. It releases the cursor and
//! never touches the owning transaction.

use crate::planner::QueryPlan;
use crate::txn::TxnScope;
use quadstore_core::{decode_value, Error, Permutation, Quad, Result, StorageContext};
use quadstore_kv::{KvCursor, KvEntry, KvError};
use std::sync::Arc;

/// Which stored statements a scan yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FlagFilter {
    #[default]
    Any,
    ExplicitOnly,
    InferredOnly,
}

impl FlagFilter {
    /// `include_inferred = false` means explicit statements only.
    pub fn from_include_inferred(include_inferred: bool) -> Self {
        if include_inferred {
            FlagFilter::Any
        } else {
            FlagFilter::ExplicitOnly
        }
    }

    /// `Some(true)` explicit only, `Some(false)` inferred only, `None` both.
    pub fn from_explicit(explicit: Option<bool>) -> Self {
        match explicit {
            Some(true) => FlagFilter::ExplicitOnly,
            Some(false) => FlagFilter::InferredOnly,
            None => FlagFilter::Any,
        }
    }

    #[inline]
    pub fn accepts(self, explicit: bool) -> bool {
        match self {
            FlagFilter::Any => true,
            FlagFilter::ExplicitOnly => explicit,
            FlagFilter::InferredOnly => !explicit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterState {
    /// No cursor yet.
    Pending,
    Open,
    Exhausted,
    Closed,
}

pub struct RecordIterator {
    scope: Arc<TxnScope>,
    plan: QueryPlan,
    filter: FlagFilter,
    cursor: Option<Box<dyn KvCursor>>,
    /// Cursor has been seeked to `low`.
    positioned: bool,
    state: IterState,
    scanned: u64,
    returned: u64,
}

impl RecordIterator {
    pub(crate) fn new(scope: Arc<TxnScope>, plan: QueryPlan, filter: FlagFilter) -> Self {
        Self {
            scope,
            plan,
            filter,
            cursor: None,
            positioned: false,
            state: IterState::Pending,
            scanned: 0,
            returned: 0,
        }
    }

    /// An iterator that yields nothing, e.g. for a pattern naming an
    /// unknown term.
    pub(crate) fn empty(scope: Arc<TxnScope>, plan: QueryPlan) -> Self {
        let mut it = Self::new(scope, plan, FlagFilter::Any);
        it.state = IterState::Exhausted;
        it
    }

    /// Open the engine cursor now instead of on the first pull.
    pub fn force_open(&mut self) -> Result<()> {
        self.check_usable()?;
        if self.state == IterState::Pending {
            self.open()?;
        }
        Ok(())
    }

    /// Next matching quad, `Ok(None)` once the range is exhausted.
    pub fn try_next(&mut self) -> Result<Option<Quad>> {
        self.check_usable()?;
        match self.state {
            IterState::Exhausted => return Ok(None),
            IterState::Pending => self.open()?,
            IterState::Open | IterState::Closed => {}
        }

        let mut entry = self.advance()?;
        loop {
            let Some(KvEntry { key, value }) = entry else {
                self.exhaust();
                return Ok(None);
            };
            if self.plan.range.is_past(&key) {
                self.exhaust();
                return Ok(None);
            }
            self.scanned += 1;

            let explicit = decode_value(&value);
            let accepted = self.filter.accepts(explicit)
                && self.plan.matcher.as_ref().map_or(true, |m| m.matches(&key));
            if accepted {
                let quad = self.plan.permutation.decode_key(&key).ok_or_else(|| {
                    Error::storage(
                        "decode index key",
                        KvError::Corrupt(format!(
                            "key of {} bytes in index {}",
                            key.len(),
                            self.plan.permutation
                        )),
                    )
                })?;
                self.returned += 1;
                return Ok(Some(quad.with_explicit(explicit)));
            }
            entry = self.advance()?;
        }
    }

    /// Release the cursor. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if self.state == IterState::Closed {
            return;
        }
        self.cursor = None;
        self.state = IterState::Closed;
        tracing::trace!(
            txn = self.scope.id(),
            index = %self.plan.permutation,
            scanned = self.scanned,
            returned = self.returned,
            "record iterator closed"
        );
    }

    fn check_usable(&self) -> Result<()> {
        if self.state == IterState::Closed {
            return Err(Error::illegal_state("record iterator is closed"));
        }
        if self.scope.is_closed() {
            return Err(Error::illegal_state(format!(
                "transaction {} of this iterator is closed",
                self.scope.id()
            )));
        }
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let store = self.plan.permutation.store_name();
        let cursor = self
            .scope
            .read(|view| view.cursor(&store).storage_op("open index cursor"))?;
        self.cursor = Some(cursor);
        self.positioned = false;
        self.state = IterState::Open;
        tracing::trace!(
            txn = self.scope.id(),
            index = %self.plan.permutation,
            prefix_len = self.plan.prefix_len,
            "record iterator opened"
        );
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<KvEntry>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        if self.positioned {
            cursor.next().storage_op("advance index cursor")
        } else {
            self.positioned = true;
            cursor.seek(&self.plan.range.low).storage_op("seek index cursor")
        }
    }

    fn exhaust(&mut self) {
        self.cursor = None;
        self.state = IterState::Exhausted;
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> IterState {
        self.state
    }

    #[inline]
    pub fn is_cursor_open(&self) -> bool {
        self.cursor.is_some()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == IterState::Closed
    }

    #[inline]
    pub fn prefix_len(&self) -> usize {
        self.plan.prefix_len
    }

    #[inline]
    pub fn has_matcher(&self) -> bool {
        self.plan.matcher.is_some()
    }

    #[inline]
    pub fn permutation(&self) -> Permutation {
        self.plan.permutation
    }

    #[inline]
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    #[inline]
    pub fn filter(&self) -> FlagFilter {
        self.filter
    }
}

impl Iterator for RecordIterator {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

impl Drop for RecordIterator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RecordIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIterator")
            .field("txn", &self.scope.id())
            .field("index", &self.plan.permutation)
            .field("prefix_len", &self.plan.prefix_len)
            .field("state", &self.state)
            .finish()
    }
}
