//! Index set: the configured permutations and their sub-stores.
//!
//! Every permutation holds the same logical quad set under its own key
//! layout (`triples-<perm>` sub-store). Mutations touch every permutation
//! inside one engine write transaction, so they become visible together on
//! commit or not at all.

use crate::planner::{self, QueryPlan, ScanRange};
use quadstore_core::{
    decode_value, encode_value, Column, IndexSpec, Permutation, Quad, QuadPattern, Result,
    StorageContext, INDEX_STORE_PREFIX, QUAD_KEY_COMPARATOR,
};
use quadstore_kv::{KvRead, KvWriteTxn};

/// What a reindex changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexSummary {
    pub added: Vec<Permutation>,
    pub dropped: Vec<Permutation>,
    /// Quads copied into each added index.
    pub copied: u64,
}

impl ReindexSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IndexSet {
    spec: IndexSpec,
}

impl IndexSet {
    pub fn new(spec: IndexSpec) -> Self {
        Self { spec }
    }

    #[inline]
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Permutations in declaration order.
    #[inline]
    pub fn available_permutations(&self) -> &[Permutation] {
        self.spec.permutations()
    }

    /// The first declared permutation.
    pub fn primary(&self) -> Permutation {
        self.spec.permutations()[0]
    }

    /// First permutation that leads with the context column.
    pub fn context_first(&self) -> Option<Permutation> {
        self.available_permutations()
            .iter()
            .copied()
            .find(|p| p.first() == Column::Context)
    }

    pub fn plan(&self, pattern: &QuadPattern) -> Result<QueryPlan> {
        planner::plan(self.available_permutations(), pattern)
    }

    /// Create (or re-register the key order of) every index sub-store.
    pub fn ensure_stores(&self, txn: &mut dyn KvWriteTxn) -> Result<()> {
        for perm in self.available_permutations() {
            txn.create_store(&perm.store_name(), QUAD_KEY_COMPARATOR)
                .storage_op("create index store")?;
        }
        Ok(())
    }

    /// Stored flag of `quad`, `None` if absent.
    pub fn lookup<R: KvRead + ?Sized>(&self, view: &R, quad: &Quad) -> Result<Option<bool>> {
        let perm = self.primary();
        let value = view
            .get(&perm.store_name(), &perm.encode_key(quad))
            .storage_op("lookup quad")?;
        Ok(value.map(|v| decode_value(&v)))
    }

    /// Store `quad` in every index. Returns `true` if it was not present.
    ///
    /// An explicit quad upgrades a stored inferred one; an inferred quad
    /// never downgrades a stored explicit one.
    pub fn insert(&self, txn: &mut dyn KvWriteTxn, quad: &Quad) -> Result<bool> {
        let existing = self.lookup(&*txn, quad)?;
        let write = match existing {
            None => true,
            Some(stored_explicit) => quad.explicit && !stored_explicit,
        };
        if write {
            let value = encode_value(quad.explicit);
            for perm in self.available_permutations() {
                txn.put(&perm.store_name(), &perm.encode_key(quad), &value)
                    .storage_op("insert quad")?;
            }
        }
        Ok(existing.is_none())
    }

    /// Delete `quad` from every index. Absent quads are a no-op.
    pub fn remove(&self, txn: &mut dyn KvWriteTxn, quad: &Quad) -> Result<bool> {
        let mut removed = false;
        for perm in self.available_permutations() {
            removed |= txn
                .delete(&perm.store_name(), &perm.encode_key(quad))
                .storage_op("remove quad")?
                .is_some();
        }
        Ok(removed)
    }

    /// Total stored quads (explicit and inferred).
    pub fn quad_count<R: KvRead + ?Sized>(&self, view: &R) -> Result<u64> {
        view.entry_count(&self.primary().store_name())
            .storage_op("count quads")
    }

    /// Keys in the planned range that pass the matcher.
    pub fn cardinality<R: KvRead + ?Sized>(&self, view: &R, pattern: &QuadPattern) -> Result<u64> {
        let plan = self.plan(pattern)?;
        if plan.prefix_len == 0 && plan.matcher.is_none() {
            return self.quad_count(view);
        }
        let mut count = 0u64;
        scan(view, &plan.permutation, &plan.range, |key, _| {
            if plan.matcher.as_ref().map_or(true, |m| m.matches(key)) {
                count += 1;
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// Permutations that have a sub-store in `view`, sorted by name.
    pub fn existing_permutations<R: KvRead + ?Sized>(view: &R) -> Vec<Permutation> {
        view.store_names()
            .iter()
            .filter_map(|name| name.strip_prefix(INDEX_STORE_PREFIX))
            .filter_map(|spec| Permutation::parse(spec).ok())
            .collect()
    }

    /// Bring the stores in line with this set: populate newly configured
    /// permutations from `source` and drop the ones no longer configured.
    pub fn reindex(
        &self,
        txn: &mut dyn KvWriteTxn,
        existing: &[Permutation],
        source: Option<Permutation>,
    ) -> Result<ReindexSummary> {
        let mut summary = ReindexSummary::default();
        let added: Vec<Permutation> = self
            .available_permutations()
            .iter()
            .copied()
            .filter(|p| !existing.contains(p))
            .collect();

        if let Some(source) = source.filter(|s| existing.contains(s)) {
            if !added.is_empty() {
                let mut records: Vec<(Quad, Box<[u8]>)> = Vec::new();
                scan(txn.as_read(), &source, &ScanRange::FULL, |key, value| {
                    if let Some(quad) = source.decode_key(key) {
                        records.push((quad, value.into()));
                    }
                    Ok(())
                })?;
                for perm in &added {
                    tracing::debug!(index = %perm, from = %source, quads = records.len(), "initializing new index");
                    let store = perm.store_name();
                    txn.create_store(&store, QUAD_KEY_COMPARATOR)
                        .storage_op("create index store")?;
                    for (quad, value) in &records {
                        txn.put(&store, &perm.encode_key(quad), value)
                            .storage_op("populate index")?;
                    }
                }
                summary.copied = records.len() as u64;
            }
        }
        summary.added = added;

        for perm in existing {
            if !self.spec.contains(perm) {
                tracing::debug!(index = %perm, "dropping index");
                txn.drop_store(&perm.store_name())
                    .storage_op("drop index store")?;
                summary.dropped.push(*perm);
            }
        }

        self.ensure_stores(txn)?;
        Ok(summary)
    }
}

/// Walk `[range.low, range.high]` of one index.
pub(crate) fn scan<R, F>(view: &R, perm: &Permutation, range: &ScanRange, mut f: F) -> Result<()>
where
    R: KvRead + ?Sized,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let mut cursor = view
        .cursor(&perm.store_name())
        .storage_op("open index cursor")?;
    let mut entry = cursor.seek(&range.low).storage_op("seek index cursor")?;
    while let Some(e) = entry {
        if range.is_past(&e.key) {
            break;
        }
        f(&e.key, &e.value)?;
        entry = cursor.next().storage_op("advance index cursor")?;
    }
    Ok(())
}
