//! Quad indexes, value dictionary and snapshot transactions.
//!
//! This crate turns the ordered key-value engine of `quadstore-kv` into an
//! RDF quad store:
//!
//! - [`Dictionary`] maps terms to dense [`TermId`]s, persisted in the
//!   `values` sub-store.
//! - [`IndexSet`] keeps one sub-store per configured [`Permutation`], all
//!   holding the same quads under different key orders.
//! - [`planner`] picks the permutation with the longest bound prefix and
//!   derives the scan range plus a [`Matcher`] for bound columns after a gap.
//! - [`RecordIterator`] scans lazily; the engine cursor opens on first pull.
//! - [`TransactionManager`] hands out snapshot [`ReadTxn`]s and a single
//!   [`WriteTxn`], and reclaims versions nobody reads any more.
//!
//! [`QuadStore`] wires it all together from a [`StoreConfig`].
//!
//! [`TermId`]: quadstore_core::TermId
//! [`Permutation`]: quadstore_core::Permutation

pub mod config;
pub mod dict;
pub mod index_set;
pub mod iterator;
pub mod matcher;
pub mod planner;
pub mod store;
pub mod txn;

// ── Configuration ────────────────────────────────────────────────────────────
pub use config::{load_config, StoreConfig, WriterPolicy};

// ── Storage layout ───────────────────────────────────────────────────────────
pub use dict::{Dictionary, VALUES_STORE};
pub use index_set::{IndexSet, ReindexSummary};

// ── Planning and scans ───────────────────────────────────────────────────────
pub use iterator::{FlagFilter, IterState, RecordIterator};
pub use matcher::Matcher;
pub use planner::{plan, plan_with, prefix_len, QueryPlan, ScanRange};

// ── Transactions and facade ──────────────────────────────────────────────────
pub use store::{QuadStore, ResolvedQuad, StoreMetadata, METADATA_FILE, SCHEME_VERSION};
pub use txn::{ReadTxn, TransactionManager, TxnKind, TxnStats, WriteTxn};

pub use quadstore_core::{
    Binding, Column, Error, IndexSpec, Permutation, Quad, QuadPattern, Result, Term, TermId,
};
