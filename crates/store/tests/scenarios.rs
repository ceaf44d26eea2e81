//! Integration tests walking the seed scenarios through the public `Store`
//! API end to end, the way a transport adapter would drive it.

use cachecore_store::{
    AndBlock, DeclareMode, DomainDescription, KeyDescriptor, KeyKind, KeyRole, KeyValue, Op,
    Operand, Predicate, Progress, Query, Record, Store, StoreConfig, StoreError, TypeDescription,
};
use tempfile::tempdir;

fn trades_schema() -> TypeDescription {
    TypeDescription::new("Trade", KeyDescriptor::new("trade_id", KeyKind::Int, KeyRole::Primary))
        .with_unique(KeyDescriptor::new("ticket", KeyKind::Str, KeyRole::Unique))
        .with_index(KeyDescriptor::new("symbol", KeyKind::Str, KeyRole::Index { ordered: false }))
        .with_index(KeyDescriptor::new("trade_date", KeyKind::Date, KeyRole::Index { ordered: true }))
        .with_list_index(KeyDescriptor::new("accounts", KeyKind::Int, KeyRole::ListIndex))
}

fn trade(id: i64, ticket: &str, symbol: &str, date: i64, accounts: Vec<i64>) -> Record {
    Record::new(vec![])
        .with_scalar("trade_id", KeyValue::Int(id))
        .with_scalar("ticket", KeyValue::Str(ticket.into()))
        .with_scalar("symbol", KeyValue::Str(symbol.into()))
        .with_scalar("trade_date", KeyValue::Date(date))
        .with_list("accounts", accounts.into_iter().map(KeyValue::Int).collect())
}

fn open_store() -> (Store, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = Store::open(StoreConfig {
        data_path: dir.path().to_path_buf(),
    })
    .unwrap();
    (store, dir)
}

/// S1: register a type, put a few records, get one by primary and by unique
/// key, remove one, confirm it's gone.
#[test]
fn scenario_s1_basic_crud() {
    let (store, _dir) = open_store();
    store.register_type(trades_schema()).unwrap();
    store.put("Trade", trade(1, "T-1", "ACME", 100, vec![101])).unwrap();
    store.put("Trade", trade(2, "T-2", "ACME", 101, vec![102])).unwrap();

    let by_pk = store.get_one("Trade", "trade_id", &KeyValue::Int(1)).unwrap().unwrap();
    assert_eq!(by_pk.scalar(&"ticket".into()), Some(&KeyValue::Str("T-1".into())));

    let by_unique = store.get_one("Trade", "ticket", &KeyValue::Str("T-2".into())).unwrap().unwrap();
    assert_eq!(by_unique.scalar(&"trade_id".into()), Some(&KeyValue::Int(2)));

    store.remove("Trade", &KeyValue::Int(1)).unwrap();
    assert!(store.get_one("Trade", "trade_id", &KeyValue::Int(1)).unwrap().is_none());
}

/// S2: `contains` against a list index, including a multi-value operand.
#[test]
fn scenario_s2_contains_on_list_index() {
    let (store, _dir) = open_store();
    store.register_type(trades_schema()).unwrap();
    store.put("Trade", trade(1, "T-1", "ACME", 100, vec![101, 102])).unwrap();
    store.put("Trade", trade(2, "T-2", "ACME", 100, vec![102])).unwrap();
    store.put("Trade", trade(3, "T-3", "WIDGE", 100, vec![103])).unwrap();

    let query = Query::new(vec![AndBlock::new(vec![Predicate::new(
        "accounts",
        Op::Contains,
        Operand::Set(vec![KeyValue::Int(101), KeyValue::Int(102)]),
    )])]);
    let mut ids: Vec<i64> = store
        .get_many("Trade", &query)
        .unwrap()
        .iter()
        .map(|r| match r.scalar(&"trade_id".into()).unwrap() {
            KeyValue::Int(v) => *v,
            _ => unreachable!(),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    // and-block combining contains with a post-filter on symbol
    let combined = Query::new(vec![AndBlock::new(vec![
        Predicate::contains("accounts", KeyValue::Int(102)),
        Predicate::eq("symbol", KeyValue::Str("WIDGE".into())),
    ])]);
    assert!(store.get_many("Trade", &combined).unwrap().is_empty());
}

/// S3: domain completeness declarations gate query authority.
#[test]
fn scenario_s3_domain_completeness_walkthrough() {
    let (store, _dir) = open_store();
    store.register_type(trades_schema()).unwrap();
    store.put("Trade", trade(1, "T-1", "ACME", 100, vec![])).unwrap();

    let acme_query = Query::new(vec![AndBlock::new(vec![Predicate::eq("symbol", KeyValue::Str("ACME".into()))])]);
    let (authoritative, _) = store.eval_query("Trade", &acme_query).unwrap();
    assert!(!authoritative);

    store.declare_domain("Trade", DomainDescription::fully_loaded(), DeclareMode::Set).unwrap();
    let (authoritative, _) = store.eval_query("Trade", &acme_query).unwrap();
    assert!(authoritative);

    store.declare_domain("Trade", DomainDescription::default(), DeclareMode::Remove).unwrap();
    let (authoritative, _) = store.eval_query("Trade", &acme_query).unwrap();
    assert!(!authoritative);

    let acme_block = AndBlock::new(vec![Predicate::eq("symbol", KeyValue::Str("ACME".into()))]);
    store
        .declare_domain("Trade", DomainDescription::covering(vec![acme_block]), DeclareMode::Add)
        .unwrap();
    let (authoritative, _) = store.eval_query("Trade", &acme_query).unwrap();
    assert!(authoritative);
}

/// S4: streamed availability over a batch of keys, some present and some not,
/// with progress reported against the whole batch.
#[test]
fn scenario_s4_streamed_availability_with_filter() {
    let (store, _dir) = open_store();
    store.register_type(trades_schema()).unwrap();
    store.put("Trade", trade(1, "T-1", "ACME", 100, vec![])).unwrap();
    store.put("Trade", trade(2, "T-2", "WIDGE", 100, vec![])).unwrap();
    store.put("Trade", trade(3, "T-3", "ACME", 100, vec![])).unwrap();

    let acme_only = Query::new(vec![AndBlock::new(vec![Predicate::eq("symbol", KeyValue::Str("ACME".into()))])]);
    let result = store
        .get_available_items(
            "Trade",
            &[KeyValue::Int(1), KeyValue::Int(2), KeyValue::Int(3), KeyValue::Int(4)],
            Some(&acme_only),
        )
        .unwrap();

    // id 2 is filtered out by the domain restriction, id 4 doesn't exist at all.
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.not_found, vec![KeyValue::Int(2), KeyValue::Int(4)]);
    assert_eq!(result.items[0].progress, Progress { current: 1, total: 2 });
    assert_eq!(result.items[1].progress, Progress { current: 2, total: 2 });
}

/// S5: dump the store, then restore it into an empty store via
/// `InitializeFromDump`, including sequence high-water marks.
#[test]
fn scenario_s5_dump_and_restore_with_sequences() {
    let (source, _source_dir) = open_store();
    source.register_type(trades_schema()).unwrap();
    source.put("Trade", trade(1, "T-1", "ACME", 100, vec![1, 2])).unwrap();
    source.put("Trade", trade(2, "T-2", "WIDGE", 101, vec![3])).unwrap();
    source.generate_unique_ids("trade_id_seq", 50).unwrap();
    let dump_dir = source.dump("2026-07-28").unwrap();

    let (restored, _restored_dir) = open_store();
    restored.initialize_from_dump(&dump_dir).unwrap();

    assert_eq!(restored.get_known_types().len(), 1);
    let found = restored.get_one("Trade", "trade_id", &KeyValue::Int(2)).unwrap().unwrap();
    assert_eq!(found.scalar(&"symbol".into()), Some(&KeyValue::Str("WIDGE".into())));
    assert_eq!(restored.generate_unique_ids("trade_id_seq", 1).unwrap(), 50..51);

    // importing again is fine (upsert by primary key), but initializing again
    // onto a non-empty store is rejected.
    assert!(matches!(
        restored.initialize_from_dump(&dump_dir),
        Err(StoreError::StoreNotEmpty)
    ));
    restored.import_dump(&dump_dir).unwrap();
    assert_eq!(restored.get_known_types().len(), 1);
}

/// S6: a synthetic failure partway through `ImportDump` must leave the store
/// exactly as it was before the import started.
#[cfg(feature = "fault-injection")]
#[test]
fn scenario_s6_import_failure_rolls_back_completely() {
    use cachecore_store::fault;

    let (source, _source_dir) = open_store();
    source.register_type(trades_schema()).unwrap();
    source.put("Trade", trade(1, "T-1", "ACME", 100, vec![])).unwrap();
    source.put("Trade", trade(2, "T-2", "WIDGE", 101, vec![])).unwrap();
    let dump_dir = source.dump("2026-07-28").unwrap();

    let (target, _target_dir) = open_store();
    target.register_type(trades_schema()).unwrap();
    target.put("Trade", trade(99, "T-99", "PRE", 100, vec![])).unwrap();

    // Fail after the 2nd internal step (past the schema registration, partway
    // through applying the first dumped record).
    fault::arm(2);
    let err = target.import_dump(&dump_dir).unwrap_err();
    assert!(matches!(err, StoreError::Internal(_)));

    // Pre-import state survives untouched: only the pre-existing record, no
    // partially-applied dump content.
    assert!(target.get_one("Trade", "trade_id", &KeyValue::Int(99)).unwrap().is_some());
    assert!(target.get_one("Trade", "trade_id", &KeyValue::Int(1)).unwrap().is_none());
    assert!(target.get_one("Trade", "trade_id", &KeyValue::Int(2)).unwrap().is_none());

    // A subsequent, unarmed import succeeds and leaves the store merged.
    target.import_dump(&dump_dir).unwrap();
    assert!(target.get_one("Trade", "trade_id", &KeyValue::Int(1)).unwrap().is_some());
    assert!(target.get_one("Trade", "trade_id", &KeyValue::Int(99)).unwrap().is_some());
}
