//! Snapshot isolation, writer exclusivity and handle lifecycles.

mod support;

use quadstore_index::{
    Binding, Error, QuadStore, Quad, QuadPattern, StoreConfig, Term, TermId, WriterPolicy,
};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use support::{drain, init_tracing, load, memory_store, scan_sorted};

#[test]
fn readers_keep_their_snapshot() {
    let store = memory_store("spoc,posc");
    load(&store, &[Quad::from_ids(1, 2, 3, 0)]);

    let before = store.begin_read().unwrap();
    let mut w = store.begin_write().unwrap();
    w.add_statement(Quad::from_ids(4, 5, 6, 0)).unwrap();

    // uncommitted writes are visible to the writer only
    assert_eq!(w.size().unwrap(), 2);
    assert_eq!(before.size().unwrap(), 1);

    let version = w.commit().unwrap();
    assert!(version > before.version());
    assert_eq!(before.size().unwrap(), 1);
    assert_eq!(
        scan_sorted(&before, &QuadPattern::any(), true),
        vec![Quad::from_ids(1, 2, 3, 0)]
    );

    let after = store.begin_read().unwrap();
    assert_eq!(after.version(), version);
    assert_eq!(after.size().unwrap(), 2);
}

#[test]
fn rollback_discards_changes() {
    let store = memory_store("spoc");
    load(&store, &[Quad::from_ids(1, 2, 3, 0)]);

    let mut w = store.begin_write().unwrap();
    w.remove_statement(&Quad::from_ids(1, 2, 3, 0)).unwrap();
    w.add_statement(Quad::from_ids(7, 8, 9, 0)).unwrap();
    w.rollback().unwrap();
    assert!(w.is_closed());
    assert!(matches!(w.rollback(), Err(Error::IllegalState(_))));
    assert!(matches!(w.commit(), Err(Error::IllegalState(_))));

    let r = store.begin_read().unwrap();
    assert!(r.contains(&Quad::from_ids(1, 2, 3, 0)).unwrap());
    assert!(!r.contains(&Quad::from_ids(7, 8, 9, 0)).unwrap());
}

#[test]
fn dropping_a_writer_rolls_back_and_frees_the_slot() {
    let store = memory_store("spoc");
    {
        let mut w = store.begin_write().unwrap();
        w.add_statement(Quad::from_ids(1, 1, 1, 0)).unwrap();
    }
    assert!(!store.stats().writer_active);
    let mut w = store.begin_write().unwrap();
    assert_eq!(w.size().unwrap(), 0);
    w.commit().unwrap();
}

#[test]
fn second_writer_fails_under_default_policy() {
    let store = memory_store("spoc");
    let _w = store.begin_write().unwrap();
    assert!(matches!(
        store.begin_write(),
        Err(Error::ConcurrencyConflict(_))
    ));
    // readers are never blocked by the writer
    assert!(store.begin_read().is_ok());
}

#[test]
fn blocking_writer_times_out() {
    init_tracing();
    let store = QuadStore::open(
        StoreConfig::in_memory().with_writer_policy(WriterPolicy::block(Duration::from_millis(30))),
    )
    .unwrap();
    let _w = store.begin_write().unwrap();
    assert!(matches!(
        store.begin_write(),
        Err(Error::ConcurrencyConflict(_))
    ));
}

#[test]
fn blocking_writer_proceeds_after_commit() {
    init_tracing();
    let store = QuadStore::open(
        StoreConfig::in_memory().with_writer_policy(WriterPolicy::block(Duration::from_secs(10))),
    )
    .unwrap();
    let manager = store.transaction_manager().clone();

    let mut first = store.begin_write().unwrap();
    first.add_statement(Quad::from_ids(1, 2, 3, 0)).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        started_tx.send(()).unwrap();
        let mut w = manager.begin_write().unwrap();
        let seen = w.size().unwrap();
        w.add_statement(Quad::from_ids(4, 5, 6, 0)).unwrap();
        (seen, w.commit().unwrap())
    });

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    let first_version = first.commit().unwrap();
    let (seen, second_version) = waiter.join().unwrap();

    assert_eq!(seen, 1);
    assert_eq!(second_version, first_version + 1);
    assert_eq!(store.begin_read().unwrap().size().unwrap(), 2);
}

#[test]
fn close_is_idempotent_and_drop_closes() {
    let store = memory_store("spoc");
    let mut r = store.begin_read().unwrap();
    assert_eq!(store.stats().open_readers, 1);
    r.close();
    r.close();
    assert!(r.is_closed());
    assert_eq!(store.stats().open_readers, 0);
    assert!(matches!(r.size(), Err(Error::IllegalState(_))));

    {
        let _r = store.begin_read().unwrap();
        assert_eq!(store.stats().open_readers, 1);
    }
    assert_eq!(store.stats().open_readers, 0);
}

#[test]
fn iterators_fail_after_their_transaction_closes() {
    let store = memory_store("spoc");
    load(&store, &[Quad::from_ids(1, 2, 3, 0), Quad::from_ids(1, 2, 4, 0)]);

    let mut r = store.begin_read().unwrap();
    let mut open = r.statements(&QuadPattern::any(), true).unwrap();
    assert!(open.try_next().unwrap().is_some());
    let mut pending = r.statements(&QuadPattern::any(), true).unwrap();
    r.close();

    assert!(matches!(open.try_next(), Err(Error::IllegalState(_))));
    assert!(matches!(pending.try_next(), Err(Error::IllegalState(_))));
    assert!(matches!(
        r.statements(&QuadPattern::any(), true),
        Err(Error::IllegalState(_))
    ));
    // closing an iterator of a closed transaction is still fine
    open.close();
    pending.close();
}

#[test]
fn superseded_versions_are_reclaimed_when_unread() {
    let store = memory_store("spoc");
    let base = store.stats().reclaimed_versions;

    let pinned = store.begin_read().unwrap();
    let pinned_version = pinned.version();
    load(&store, &[Quad::from_ids(1, 2, 3, 0)]);
    assert_eq!(store.stats().reclaimed_versions, base);
    assert_eq!(
        store.transaction_manager().active_versions(),
        vec![(pinned_version, 1)]
    );

    // the commit above had no readers on its own superseded version
    load(&store, &[Quad::from_ids(4, 5, 6, 0)]);
    assert_eq!(store.stats().reclaimed_versions, base + 1);
    assert_eq!(store.engine().retained_versions(), 1);

    drop(pinned);
    assert_eq!(store.stats().reclaimed_versions, base + 2);
    assert!(store.transaction_manager().active_versions().is_empty());
    assert_eq!(store.engine().retained_versions(), 0);
}

#[test]
fn remove_statements_reports_per_context_counts() {
    let store = memory_store("spoc,posc");
    load(
        &store,
        &[
            Quad::from_ids(1, 2, 3, 0),
            Quad::from_ids(1, 2, 4, 7),
            Quad::from_ids(1, 2, 5, 7),
            Quad::from_ids(1, 2, 6, 8).inferred(),
            Quad::from_ids(9, 2, 6, 8),
        ],
    );

    let mut w = store.begin_write().unwrap();
    let s1 = QuadPattern::from_options(Some(1), None, None, None);
    let inferred = w.remove_statements(&s1, Some(false)).unwrap();
    assert_eq!(inferred.len(), 1);
    assert_eq!(inferred[&TermId::new(8)], 1);

    let removed = w.remove_statements(&s1, None).unwrap();
    assert_eq!(removed.get(&TermId::DEFAULT_GRAPH), Some(&1));
    assert_eq!(removed.get(&TermId::new(7)), Some(&2));
    assert_eq!(removed.get(&TermId::new(8)), None);
    w.commit().unwrap();

    let r = store.begin_read().unwrap();
    assert_eq!(
        drain(r.statements(&QuadPattern::any(), true).unwrap()),
        vec![Quad::from_ids(9, 2, 6, 8)]
    );
}

#[test]
fn clear_named_contexts() {
    let store = memory_store("spoc,cspo");
    load(
        &store,
        &[
            Quad::from_ids(1, 2, 3, 0),
            Quad::from_ids(1, 2, 3, 7),
            Quad::from_ids(1, 2, 4, 8),
        ],
    );
    let mut w = store.begin_write().unwrap();
    assert_eq!(w.clear(&[TermId::new(7), TermId::new(8)]).unwrap(), 2);
    assert_eq!(w.contexts().unwrap(), Vec::<TermId>::new());
    assert_eq!(w.clear(&[]).unwrap(), 1);
    w.commit().unwrap();
    assert_eq!(store.begin_read().unwrap().size().unwrap(), 0);
}

#[test]
fn terms_resolve_through_the_dictionary() {
    let store = memory_store("spoc,posc");
    let alice = Term::iri("http://example.org/alice");
    let knows = Term::iri("http://xmlns.com/foaf/0.1/knows");
    let bob = Term::blank("b0");
    let graph = Term::iri("http://example.org/graph");

    let mut w = store.begin_write().unwrap();
    assert!(w.add_terms(&alice, &knows, &bob, Some(&graph), true).unwrap());
    assert!(w.add_terms(&bob, &knows, &alice, None, false).unwrap());
    assert_eq!(store.dictionary().pending_len(), 4);
    w.commit().unwrap();
    assert_eq!(store.dictionary().pending_len(), 0);

    let r = store.begin_read().unwrap();
    let knows_id = store.dictionary().lookup(&knows).unwrap();
    let by_pred = drain(
        r.get_statements(
            Binding::Unbound,
            Binding::Bound(knows_id),
            Binding::Unbound,
            Binding::Unbound,
            true,
        )
        .unwrap(),
    );
    assert_eq!(by_pred.len(), 2);

    let in_graph = drain(
        r.get_statements_for_terms(None, None, None, Some(&graph), true)
            .unwrap(),
    );
    assert_eq!(in_graph.len(), 1);
    let resolved = r.resolve(&in_graph[0]).unwrap();
    assert_eq!(resolved.subject, alice);
    assert_eq!(resolved.object, bob);
    assert_eq!(resolved.context, Some(graph.clone()));
    assert_eq!(r.decode_context(TermId::DEFAULT_GRAPH).unwrap(), None);

    let explicit_only = drain(
        r.get_statements_for_terms(Some(&bob), None, None, None, false)
            .unwrap(),
    );
    assert!(explicit_only.is_empty());

    assert!(matches!(
        r.decode_term(TermId::new(999)),
        Err(Error::DictionaryCorruption { .. })
    ));
}

#[test]
fn writes_on_read_handles_are_impossible_but_reads_on_writes_work() {
    let store = memory_store("spoc");
    let mut w = store.begin_write().unwrap();
    w.add_statement(Quad::from_ids(1, 2, 3, 0)).unwrap();
    let mut iter = w
        .statements(&QuadPattern::from_options(Some(1), None, None, None), true)
        .unwrap();
    assert_eq!(iter.try_next().unwrap(), Some(Quad::from_ids(1, 2, 3, 0)));
    drop(iter);
    w.commit().unwrap();
}
