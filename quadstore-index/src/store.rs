//! QuadStore: the upstream-facing facade.
//!
//! Opening a store wires the engine, the dictionary, the index set and the
//! transaction manager together:
//!
//! 1. open the engine (replaying the commit log for durable stores)
//! 2. read `store.json` (scheme version and the index spec last used)
//! 3. reload the dictionary from the `values` sub-store
//! 4. create, re-register or reindex the permutation sub-stores
//! 5. record the current index spec in `store.json`
//!
//! Reads and writes go through [`ReadTxn`] and [`WriteTxn`] handles; the
//! statement-level operations are defined on both.

use crate::config::StoreConfig;
use crate::dict::Dictionary;
use crate::index_set::{scan, IndexSet, ReindexSummary};
use crate::iterator::{FlagFilter, RecordIterator};
use crate::planner::{self, QueryPlan, ScanRange};
use crate::txn::{ManagerShared, ReadTxn, TransactionManager, TxnScope, TxnStats, WriteTxn};
use quadstore_core::{
    Binding, Column, Error, IndexSpec, Quad, QuadPattern, Result, StorageContext, Term, TermId,
};
use quadstore_kv::{KvEngine, MemoryKv, MemoryKvOptions};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata file inside the data directory.
pub const METADATA_FILE: &str = "store.json";

/// Persisted layout version.
pub const SCHEME_VERSION: u32 = 1;

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreMetadata {
    pub scheme_version: u32,
    pub index_spec: String,
}

impl StoreMetadata {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// `None` when the directory holds no store yet.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let meta: StoreMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;
        if meta.scheme_version > SCHEME_VERSION {
            return Err(Error::config(format!(
                "store scheme version {} is newer than supported version {SCHEME_VERSION}",
                meta.scheme_version
            )));
        }
        Ok(Some(meta))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::config(format!("failed to encode store metadata: {e}")))?;
        std::fs::write(Self::path(dir), bytes)?;
        Ok(())
    }
}

// ============================================================================
// QuadStore
// ============================================================================

pub struct QuadStore {
    config: StoreConfig,
    engine: Arc<MemoryKv>,
    manager: TransactionManager,
    last_reindex: ReindexSummary,
}

impl QuadStore {
    /// Open (or create) a store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let spec = config.parsed_index_spec()?;

        let engine = Arc::new(
            MemoryKv::open(MemoryKvOptions {
                data_dir: config.data_dir.clone(),
                sync_commits: config.sync_commits,
                checkpoint_bytes: config.checkpoint_bytes,
            })
            .storage_op("open engine")?,
        );

        let metadata = match &config.data_dir {
            Some(dir) => StoreMetadata::read(dir)?,
            None => None,
        };
        let previous_spec = metadata
            .as_ref()
            .map(|m| IndexSpec::parse(&m.index_spec))
            .transpose()?;

        let (dictionary, existing) = {
            let snapshot = engine.read().storage_op("open snapshot")?;
            (
                Dictionary::load(&*snapshot)?,
                IndexSet::existing_permutations(&*snapshot),
            )
        };

        let index_set = IndexSet::new(spec.clone());
        let mut txn = engine.write().storage_op("begin layout transaction")?;
        let summary = if existing.is_empty() {
            index_set.ensure_stores(&mut *txn)?;
            ReindexSummary::default()
        } else {
            let source = previous_spec
                .as_ref()
                .map(|p| p.permutations()[0])
                .filter(|p| existing.contains(p))
                .or_else(|| existing.first().copied());
            index_set.reindex(&mut *txn, &existing, source)?
        };
        txn.commit().storage_op("commit index layout")?;

        if !summary.is_empty() {
            tracing::info!(
                added = ?summary.added,
                dropped = ?summary.dropped,
                copied = summary.copied,
                "reindexed store"
            );
        }

        if let Some(dir) = &config.data_dir {
            StoreMetadata {
                scheme_version: SCHEME_VERSION,
                index_spec: spec.to_string(),
            }
            .write(dir)?;
        }

        let manager = TransactionManager::new(
            Arc::clone(&engine) as Arc<dyn KvEngine>,
            config.writer_policy,
            index_set,
            Arc::new(dictionary),
        );

        tracing::debug!(
            data_dir = ?config.data_dir,
            index_spec = %spec,
            version = manager.current_version(),
            terms = manager.dictionary().len(),
            "quad store opened"
        );

        Ok(Self {
            config,
            engine,
            manager,
            last_reindex: summary,
        })
    }

    /// In-memory store with the default indexes.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[inline]
    pub fn index_set(&self) -> &IndexSet {
        self.manager.index_set()
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        self.manager.dictionary()
    }

    #[inline]
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.manager
    }

    #[inline]
    pub fn engine(&self) -> &MemoryKv {
        &self.engine
    }

    /// What the last open changed in the index layout.
    #[inline]
    pub fn last_reindex(&self) -> &ReindexSummary {
        &self.last_reindex
    }

    pub fn begin_read(&self) -> Result<ReadTxn> {
        self.manager.begin_read()
    }

    pub fn begin_write(&self) -> Result<WriteTxn> {
        self.manager.begin_write()
    }

    pub fn stats(&self) -> TxnStats {
        self.manager.stats()
    }
}

impl std::fmt::Debug for QuadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadStore")
            .field("index_spec", self.index_set().spec())
            .field("data_dir", &self.config.data_dir)
            .field("manager", &self.manager)
            .finish()
    }
}

// ============================================================================
// Statement operations
// ============================================================================

/// A quad with its ids resolved to terms. The default graph has no context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub context: Option<Term>,
    pub explicit: bool,
}

fn ensure_open(scope: &TxnScope) -> Result<()> {
    scope.read(|_| Ok(()))
}

fn statements(
    scope: &Arc<TxnScope>,
    shared: &ManagerShared,
    pattern: &QuadPattern,
    filter: FlagFilter,
) -> Result<RecordIterator> {
    ensure_open(scope)?;
    let plan = shared.index_set().plan(pattern)?;
    Ok(RecordIterator::new(Arc::clone(scope), plan, filter))
}

/// Term lookups that never allocate: an unknown term yields `None`.
fn bind_term(dictionary: &Dictionary, term: Option<&Term>) -> Option<Binding> {
    match term {
        None => Some(Binding::Unbound),
        Some(t) => dictionary.lookup(t).map(Binding::Bound),
    }
}

fn statements_for_terms(
    scope: &Arc<TxnScope>,
    shared: &ManagerShared,
    terms: [Option<&Term>; 4],
    include_inferred: bool,
) -> Result<RecordIterator> {
    let dictionary = shared.dictionary();
    let [s, p, o, c] = terms.map(|t| bind_term(dictionary, t));
    match (s, p, o, c) {
        (Some(s), Some(p), Some(o), Some(c)) => statements(
            scope,
            shared,
            &QuadPattern::new(s, p, o, c),
            FlagFilter::from_include_inferred(include_inferred),
        ),
        _ => {
            ensure_open(scope)?;
            let plan = shared.index_set().plan(&QuadPattern::any())?;
            Ok(RecordIterator::empty(Arc::clone(scope), plan))
        }
    }
}

fn statements_by_context(
    scope: &Arc<TxnScope>,
    shared: &ManagerShared,
    include_inferred: bool,
) -> Result<Option<RecordIterator>> {
    ensure_open(scope)?;
    let Some(perm) = shared.index_set().context_first() else {
        return Ok(None);
    };
    let plan = planner::plan_with(perm, &QuadPattern::any());
    Ok(Some(RecordIterator::new(
        Arc::clone(scope),
        plan,
        FlagFilter::from_include_inferred(include_inferred),
    )))
}

fn contexts(scope: &TxnScope, shared: &ManagerShared) -> Result<Vec<TermId>> {
    let index_set = shared.index_set();
    let perm = index_set.context_first().unwrap_or_else(|| index_set.primary());
    let offset = perm.column_offset(Column::Context);
    let mut seen = BTreeSet::new();
    scope.read(|view| {
        scan(view, &perm, &ScanRange::FULL, |key, _| {
            if let Some(id) = TermId::read_be(&key[offset..]) {
                if !id.is_default_graph() {
                    seen.insert(id);
                }
            }
            Ok(())
        })
    })?;
    Ok(seen.into_iter().collect())
}

fn resolve(shared: &ManagerShared, quad: &Quad) -> Result<ResolvedQuad> {
    let dictionary = shared.dictionary();
    Ok(ResolvedQuad {
        subject: dictionary.decode(quad.subject)?,
        predicate: dictionary.decode(quad.predicate)?,
        object: dictionary.decode(quad.object)?,
        context: decode_context(shared, quad.context)?,
        explicit: quad.explicit,
    })
}

fn decode_context(shared: &ManagerShared, id: TermId) -> Result<Option<Term>> {
    if id.is_default_graph() {
        Ok(None)
    } else {
        shared.dictionary().decode(id).map(Some)
    }
}

macro_rules! statement_reads {
    ($handle:ty) => {
        impl $handle {
            /// Lazy scan of every stored quad matching the bindings.
            /// `include_inferred = false` yields explicit quads only.
            pub fn get_statements(
                &self,
                subject: Binding,
                predicate: Binding,
                object: Binding,
                context: Binding,
                include_inferred: bool,
            ) -> Result<RecordIterator> {
                self.statements(
                    &QuadPattern::new(subject, predicate, object, context),
                    include_inferred,
                )
            }

            pub fn statements(
                &self,
                pattern: &QuadPattern,
                include_inferred: bool,
            ) -> Result<RecordIterator> {
                statements(
                    self.scope(),
                    self.shared(),
                    pattern,
                    FlagFilter::from_include_inferred(include_inferred),
                )
            }

            /// Like [`Self::get_statements`] over terms. `None` is a wildcard;
            /// a term the dictionary has never seen matches nothing.
            pub fn get_statements_for_terms(
                &self,
                subject: Option<&Term>,
                predicate: Option<&Term>,
                object: Option<&Term>,
                context: Option<&Term>,
                include_inferred: bool,
            ) -> Result<RecordIterator> {
                statements_for_terms(
                    self.scope(),
                    self.shared(),
                    [subject, predicate, object, context],
                    include_inferred,
                )
            }

            /// Every quad ordered by context, or `None` when no index leads
            /// with the context column.
            pub fn statements_by_context(
                &self,
                include_inferred: bool,
            ) -> Result<Option<RecordIterator>> {
                statements_by_context(self.scope(), self.shared(), include_inferred)
            }

            /// Distinct named contexts, ascending. The default graph is not
            /// listed.
            pub fn contexts(&self) -> Result<Vec<TermId>> {
                contexts(self.scope(), self.shared())
            }

            /// Stored quads, explicit and inferred.
            pub fn size(&self) -> Result<u64> {
                let index_set = self.shared().index_set();
                self.scope().read(|view| index_set.quad_count(view))
            }

            /// Number of quads matching `pattern`.
            pub fn cardinality(&self, pattern: &QuadPattern) -> Result<u64> {
                let index_set = self.shared().index_set();
                self.scope()
                    .read(|view| index_set.cardinality(view, pattern))
            }

            /// Stored flag of `quad` (`Some(true)` explicit), `None` if absent.
            pub fn lookup(&self, quad: &Quad) -> Result<Option<bool>> {
                let index_set = self.shared().index_set();
                self.scope().read(|view| index_set.lookup(view, quad))
            }

            pub fn contains(&self, quad: &Quad) -> Result<bool> {
                Ok(self.lookup(quad)?.is_some())
            }

            /// The plan a lookup of `pattern` would use.
            pub fn plan(&self, pattern: &QuadPattern) -> Result<QueryPlan> {
                self.shared().index_set().plan(pattern)
            }

            pub fn decode_term(&self, id: TermId) -> Result<Term> {
                self.shared().dictionary().decode(id)
            }

            /// `None` for the default graph.
            pub fn decode_context(&self, id: TermId) -> Result<Option<Term>> {
                decode_context(self.shared(), id)
            }

            pub fn resolve(&self, quad: &Quad) -> Result<ResolvedQuad> {
                resolve(self.shared(), quad)
            }
        }
    };
}

statement_reads!(ReadTxn);
statement_reads!(WriteTxn);

impl WriteTxn {
    /// Store `quad` in every index. Returns `true` if it was not present.
    pub fn add_statement(&mut self, quad: Quad) -> Result<bool> {
        let index_set = self.shared().index_set();
        self.scope().write(|txn| index_set.insert(txn, &quad))
    }

    /// Returns `true` if the quad was present.
    pub fn remove_statement(&mut self, quad: &Quad) -> Result<bool> {
        let index_set = self.shared().index_set();
        self.scope().write(|txn| index_set.remove(txn, quad))
    }

    /// Encode the terms through the dictionary and store the quad. A missing
    /// context means the default graph.
    pub fn add_terms(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        context: Option<&Term>,
        explicit: bool,
    ) -> Result<bool> {
        ensure_open(self.scope())?;
        let dictionary = self.shared().dictionary();
        let quad = Quad::new(
            dictionary.encode(subject),
            dictionary.encode(predicate),
            dictionary.encode(object),
            context.map_or(TermId::DEFAULT_GRAPH, |c| dictionary.encode(c)),
        )
        .with_explicit(explicit);
        self.add_statement(quad)
    }

    /// Remove every quad matching `pattern`. `explicit` selects explicit
    /// (`Some(true)`), inferred (`Some(false)`) or all (`None`) quads.
    /// Returns the number removed per context.
    pub fn remove_statements(
        &mut self,
        pattern: &QuadPattern,
        explicit: Option<bool>,
    ) -> Result<FxHashMap<TermId, u64>> {
        let matched: Vec<Quad> = {
            let iter = statements(
                self.scope(),
                self.shared(),
                pattern,
                FlagFilter::from_explicit(explicit),
            )?;
            iter.collect::<Result<_>>()?
        };

        let index_set = self.shared().index_set();
        let mut per_context: FxHashMap<TermId, u64> = FxHashMap::default();
        self.scope().write(|txn| {
            for quad in &matched {
                if index_set.remove(txn, quad)? {
                    *per_context.entry(quad.context).or_insert(0) += 1;
                }
            }
            Ok(())
        })?;
        tracing::debug!(
            txn = self.id(),
            %pattern,
            removed = matched.len(),
            contexts = per_context.len(),
            "removed statements"
        );
        Ok(per_context)
    }

    /// Remove every quad in the given contexts, or all quads when empty.
    pub fn clear(&mut self, contexts: &[TermId]) -> Result<u64> {
        let patterns: Vec<QuadPattern> = if contexts.is_empty() {
            vec![QuadPattern::any()]
        } else {
            contexts
                .iter()
                .map(|c| QuadPattern::new(Binding::Unbound, Binding::Unbound, Binding::Unbound, *c))
                .collect()
        };
        let mut removed = 0;
        for pattern in &patterns {
            removed += self.remove_statements(pattern, None)?.values().sum::<u64>();
        }
        Ok(removed)
    }
}
