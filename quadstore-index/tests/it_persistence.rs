//! Durable stores: reopen, dictionary reload and index layout changes.

mod support;

use quadstore_index::{
    load_config, Permutation, QuadStore, QuadPattern, StoreConfig, StoreMetadata, Term,
    WriterPolicy, METADATA_FILE, SCHEME_VERSION,
};
use quadstore_index::{Error, Quad};
use quadstore_kv::{KvError, COMMIT_LOG_FILE};
use support::{drain, init_tracing, load, scan_sorted};

fn open(dir: &std::path::Path, spec: &str) -> QuadStore {
    init_tracing();
    QuadStore::open(StoreConfig::at(dir).with_index_spec(spec)).expect("open store")
}

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example.org/{local}"))
}

fn seed(store: &QuadStore) {
    let mut w = store.begin_write().unwrap();
    w.add_terms(&ex("alice"), &ex("knows"), &ex("bob"), None, true)
        .unwrap();
    w.add_terms(&ex("bob"), &ex("knows"), &ex("carol"), Some(&ex("g1")), true)
        .unwrap();
    w.add_terms(&ex("carol"), &ex("age"), &Term::typed("42", "http://www.w3.org/2001/XMLSchema#integer"), Some(&ex("g1")), false)
        .unwrap();
    w.commit().unwrap();
}

#[test]
fn reopen_restores_quads_and_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let (alice_id, quads, terms) = {
        let store = open(dir.path(), "spoc,posc");
        seed(&store);
        let r = store.begin_read().unwrap();
        (
            store.dictionary().lookup(&ex("alice")).unwrap(),
            scan_sorted(&r, &QuadPattern::any(), true),
            store.dictionary().len(),
        )
    };
    assert!(dir.path().join(METADATA_FILE).exists());

    let store = open(dir.path(), "spoc,posc");
    assert!(store.last_reindex().is_empty());
    assert_eq!(store.dictionary().len(), terms);
    assert_eq!(store.dictionary().lookup(&ex("alice")), Some(alice_id));
    store.dictionary().check_consistency().unwrap();

    let r = store.begin_read().unwrap();
    assert_eq!(scan_sorted(&r, &QuadPattern::any(), true), quads);
    let literal = r
        .get_statements_for_terms(None, Some(&ex("age")), None, None, true)
        .unwrap();
    let found = drain(literal);
    assert_eq!(found.len(), 1);
    assert!(!found[0].explicit);
    assert_eq!(
        r.resolve(&found[0]).unwrap().object,
        Term::typed("42", "http://www.w3.org/2001/XMLSchema#integer")
    );
}

#[test]
fn new_terms_after_reopen_continue_the_id_sequence() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path(), "spoc");
        seed(&store);
    }
    let store = open(dir.path(), "spoc");
    let before = store.dictionary().len() as u64;
    let mut w = store.begin_write().unwrap();
    w.add_terms(&ex("dave"), &ex("knows"), &ex("alice"), None, true)
        .unwrap();
    w.commit().unwrap();
    assert_eq!(
        store.dictionary().lookup(&ex("dave")).map(|id| id.as_u64()),
        Some(before + 1)
    );
}

#[test]
fn uncommitted_writes_are_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path(), "spoc");
        seed(&store);
        let mut w = store.begin_write().unwrap();
        w.add_terms(&ex("eve"), &ex("knows"), &ex("alice"), None, true)
            .unwrap();
        w.rollback().unwrap();
    }
    let store = open(dir.path(), "spoc");
    assert_eq!(store.begin_read().unwrap().size().unwrap(), 3);
}

#[test]
fn adding_an_index_populates_it_from_existing_data() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path(), "spoc");
        seed(&store);
    }

    let store = open(dir.path(), "spoc,cspo");
    let summary = store.last_reindex();
    assert_eq!(summary.added, vec![Permutation::CSPO]);
    assert!(summary.dropped.is_empty());
    assert_eq!(summary.copied, 3);

    let r = store.begin_read().unwrap();
    let by_context = drain(r.statements_by_context(true).unwrap().unwrap());
    assert_eq!(by_context.len(), 3);
    assert!(by_context[0].context.is_default_graph());
    let g1 = store.dictionary().lookup(&ex("g1")).unwrap();
    assert_eq!(r.contexts().unwrap(), vec![g1]);

    let meta = StoreMetadata::read(dir.path()).unwrap().unwrap();
    assert_eq!(meta.scheme_version, SCHEME_VERSION);
    assert_eq!(meta.index_spec, "spoc,cspo");
}

#[test]
fn replacing_indexes_drops_the_old_ones() {
    let dir = tempfile::tempdir().unwrap();
    let expected = {
        let store = open(dir.path(), "spoc,cspo");
        seed(&store);
        let r = store.begin_read().unwrap();
        scan_sorted(&r, &QuadPattern::any(), true)
    };

    let store = open(dir.path(), "posc");
    let summary = store.last_reindex();
    assert_eq!(summary.added, vec![Permutation::POSC]);
    assert_eq!(summary.dropped, vec![Permutation::CSPO, Permutation::SPOC]);

    let r = store.begin_read().unwrap();
    assert_eq!(scan_sorted(&r, &QuadPattern::any(), true), expected);
    assert!(r.statements_by_context(true).unwrap().is_none());
    drop(r);
    drop(store);

    // the new layout is what survives the next reopen
    let store = open(dir.path(), "posc");
    assert!(store.last_reindex().is_empty());
    assert_eq!(store.begin_read().unwrap().size().unwrap(), 3);
}

#[test]
fn config_file_drives_open() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let config_path = dir.path().join("quadstore.toml");
    std::fs::write(
        &config_path,
        format!(
            "index_spec = \"spoc, ospc\"\nsync_commits = true\ndata_dir = {:?}\n\n[writer_policy]\nmode = \"block\"\ntimeout_ms = 250\n",
            data.display().to_string()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.writer_policy, WriterPolicy::Block { timeout_ms: 250 });
    let store = QuadStore::open(config).unwrap();
    assert_eq!(
        store.index_set().available_permutations(),
        &[Permutation::SPOC, Permutation::OSPC]
    );
    assert!(store.engine().is_durable());
    seed(&store);
    assert!(data.join(METADATA_FILE).exists());
}

#[test]
fn in_memory_stores_start_empty() {
    init_tracing();
    let store = QuadStore::in_memory().unwrap();
    seed(&store);
    drop(store);
    let store = QuadStore::in_memory().unwrap();
    assert!(store.dictionary().is_empty());
    assert_eq!(store.begin_read().unwrap().size().unwrap(), 0);
    assert!(!store.engine().is_durable());
}

#[test]
fn a_store_directory_opens_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let first = open(dir.path(), "spoc");
    seed(&first);

    let second = QuadStore::open(StoreConfig::at(dir.path()).with_index_spec("spoc"));
    assert!(matches!(
        second,
        Err(Error::Storage {
            source: KvError::Locked(_),
            ..
        })
    ));
    // the refused open must not have touched the data
    assert_eq!(first.begin_read().unwrap().size().unwrap(), 3);
    drop(first);

    let reopened = open(dir.path(), "spoc");
    assert_eq!(reopened.begin_read().unwrap().size().unwrap(), 3);
}

#[test]
fn commit_log_stays_bounded_across_churn_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join(COMMIT_LOG_FILE);
    let kept = Quad::from_ids(1, 2, 3, 0);
    {
        let store = open(dir.path(), "spoc,posc,cspo");
        load(&store, &[kept]);
        for i in 10..210u64 {
            let churn = Quad::from_ids(i, 2, 3, 0);
            load(&store, &[churn]);
            let mut w = store.begin_write().unwrap();
            assert!(w.remove_statement(&churn).unwrap());
            w.commit().unwrap();
        }
    }
    let churned = std::fs::metadata(&log_path).unwrap().len();

    let mut sizes = Vec::new();
    for _ in 0..4 {
        let store = open(dir.path(), "spoc,posc,cspo");
        let r = store.begin_read().unwrap();
        assert_eq!(scan_sorted(&r, &QuadPattern::any(), true), vec![kept]);
        drop(r);
        sizes.push(store.engine().log_bytes().unwrap());
    }
    assert!(sizes[0] * 10 < churned, "{sizes:?} vs {churned}");
    assert!(sizes.windows(2).skip(1).all(|w| w[0] == w[1]), "{sizes:?}");
}
