//! Shared helpers for quadstore-index integration tests.

#![allow(dead_code)]

use quadstore_index::{
    QuadStore, Quad, QuadPattern, ReadTxn, RecordIterator, Result, StoreConfig,
};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// In-memory store with the given index spec.
pub fn memory_store(index_spec: &str) -> QuadStore {
    init_tracing();
    QuadStore::open(StoreConfig::in_memory().with_index_spec(index_spec)).expect("open store")
}

/// Insert `quads` in one committed write transaction.
pub fn load(store: &QuadStore, quads: &[Quad]) -> u64 {
    let mut w = store.begin_write().expect("begin write");
    for q in quads {
        w.add_statement(*q).expect("add statement");
    }
    w.commit().expect("commit")
}

pub fn drain(iter: RecordIterator) -> Vec<Quad> {
    iter.collect::<Result<Vec<_>>>().expect("scan")
}

/// Matching quads, sorted.
pub fn scan_sorted(r: &ReadTxn, pattern: &QuadPattern, include_inferred: bool) -> Vec<Quad> {
    let mut out = drain(r.statements(pattern, include_inferred).expect("statements"));
    out.sort();
    out
}
