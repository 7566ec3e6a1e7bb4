use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde_json::{Value, json};
use skipdb_core::api::SkipDB;
use skipdb_core::config::{DatabaseOptions, SyncMode};
use skipdb_core::encoding::Collation;
use skipdb_core::error::{Error, ErrorKind, SchemaError, TxnError};
use tempfile::tempdir;

fn fast_options() -> DatabaseOptions {
    DatabaseOptions::default().sync_mode(SyncMode::None)
}

fn create_db(dir: &Path, options: DatabaseOptions) -> SkipDB {
    SkipDB::create_with_options(dir.join("test.db"), options).unwrap()
}

fn file_len(dir: &Path) -> u64 {
    std::fs::metadata(dir.join("test.db")).unwrap().len()
}

fn ids(docs: &[Value]) -> Vec<Value> {
    docs.iter().map(|d| d["_id"].clone()).collect()
}

#[test]
fn test_node_count_matches_emitted_keys() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("posts").unwrap();
    for doc in [
        json!({"_id": 1, "tags": ["rust", "db"]}),
        json!({"_id": 2, "tags": ["rust", "rust", "io"]}),
        json!({"_id": 3, "tags": []}),
        json!({"_id": 4}),
        json!({"_id": 5, "tags": "not-an-array"}),
    ] {
        db.insert("posts", doc).unwrap();
    }

    let stats = db
        .create_index("posts")
        .name("by_tag")
        .expression("$.tags[*]")
        .execute_with_stats()
        .unwrap();
    assert_eq!(stats.nodes, 4);
    assert_eq!(stats.documents, 5);

    assert_eq!(
        db.index_keys("posts", "by_tag").unwrap(),
        vec![json!("db"), json!("io"), json!("rust"), json!("rust")]
    );
    let rust = db.find_by_index("posts", "by_tag", &json!("rust")).unwrap();
    assert_eq!(ids(&rust), vec![json!(1), json!(2)]);
}

#[test]
fn test_missing_scalar_field_indexes_null() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("people").unwrap();
    db.insert("people", json!({"_id": 1, "age": 40})).unwrap();
    db.insert("people", json!({"_id": 2})).unwrap();

    let nodes = db
        .create_index("people")
        .name("by_age")
        .expression("$.age")
        .execute()
        .unwrap();
    assert_eq!(nodes, 2);
    assert_eq!(
        db.index_keys("people", "by_age").unwrap(),
        vec![Value::Null, json!(40)]
    );
}

#[test]
fn test_level_zero_is_ordered() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("things").unwrap();
    let values = [json!("b"), json!(10), json!(null), json!("a"), json!(2.5), json!(1)];
    for (i, v) in values.iter().enumerate() {
        db.insert("things", json!({"_id": i, "v": v})).unwrap();
    }

    db.create_index("things")
        .name("by_v")
        .expression("$.v")
        .execute()
        .unwrap();

    assert_eq!(
        db.index_keys("things", "by_v").unwrap(),
        vec![
            Value::Null,
            json!(1),
            json!(2.5),
            json!(10),
            json!("a"),
            json!("b"),
        ]
    );
    let report = db.check_index("things", "by_v").unwrap();
    assert!(report.is_ok(), "{:?}", report.problems);
    assert_eq!(report.nodes, 6);
}

#[test]
fn test_unique_violation_leaves_indexes_unchanged() {
    let dir = tempdir().unwrap();
    let options = fast_options().collation(Collation::ignore_case());
    let db = create_db(dir.path(), options);
    db.create_collection("users").unwrap();
    db.insert("users", json!({"_id": 1, "email": "ann@example.com", "city": "Oslo"}))
        .unwrap();
    db.insert("users", json!({"_id": 2, "email": "ANN@example.com", "city": "Rome"}))
        .unwrap();
    db.create_index("users")
        .name("by_city")
        .expression("$.city")
        .execute()
        .unwrap();
    let before = db.read_catalog().unwrap();

    let err = db
        .create_index("users")
        .name("by_email")
        .expression("$.email")
        .unique(true)
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);

    assert_eq!(db.read_catalog().unwrap(), before);
    let names: Vec<String> = db
        .list_indexes("users")
        .unwrap()
        .into_iter()
        .map(|idx| idx.name)
        .collect();
    assert_eq!(names, vec!["by_city".to_string()]);
    assert!(db.check_index("users", "by_city").unwrap().is_ok());
}

#[test]
fn test_unique_index_is_enforced_on_insert() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    db.insert("users", json!({"_id": 1, "email": "a@x"})).unwrap();
    db.create_index("users")
        .name("by_email")
        .expression("$.email")
        .unique(true)
        .execute()
        .unwrap();

    let err = db
        .insert("users", json!({"_id": 2, "email": "a@x"}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert!(db.get("users", &json!(2)).unwrap().is_none());
    db.insert("users", json!({"_id": 2, "email": "b@x"})).unwrap();
}

#[test]
fn test_validation_happens_before_any_mutation() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    db.insert("users", json!({"_id": 1, "name": "a"})).unwrap();
    let catalog = db.read_catalog().unwrap();
    let len = file_len(dir.path());

    let long_name = "n".repeat(33);
    let cases = [
        ("users", "1bad", "$.name"),
        ("users", "_id", "$.name"),
        ("users", long_name.as_str(), "$.name"),
        ("bad-collection", "ok", "$.name"),
        ("users", "ok", "$.name +"),
        ("users", "ok", "FOO($.name)"),
        ("users", "ok", "$"),
        ("users", "ok", "[$.name, NOW()]"),
        ("users", "ok", ""),
    ];
    for (collection, name, expression) in cases {
        let err = db
            .create_index(collection)
            .name(name)
            .expression(expression)
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{name} / {expression}: {err}");
    }

    assert_eq!(db.read_catalog().unwrap(), catalog);
    assert_eq!(file_len(dir.path()), len);
}

#[test]
fn test_name_too_long_is_reported() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    let err = db
        .create_index("users")
        .name(&"n".repeat(33))
        .expression("$.a")
        .execute()
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Schema(SchemaError::IndexNameTooLong { max: 32, .. })
    ));
}

#[test]
fn test_missing_collection_creates_no_transaction() {
    let dir = tempdir().unwrap();
    let options = fast_options().lock_timeout(Duration::from_millis(50));
    let db = create_db(dir.path(), options);
    db.create_collection("users").unwrap();

    // Any transaction would have to wait for this one and time out.
    let held = db.begin_transaction(&[]).unwrap();
    let err = db
        .create_index("nobody")
        .name("by_x")
        .expression("$.x")
        .execute()
        .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::CollectionNotFound(_))));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = db
        .create_index("users")
        .name("by_x")
        .expression("$.x")
        .execute()
        .unwrap_err();
    assert!(matches!(err, Error::Transaction(TxnError::LockTimeout(_))));
    drop(held);
}

#[test]
fn test_duplicate_index_name() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    db.create_index("users")
        .name("by_x")
        .expression("$.x")
        .execute()
        .unwrap();
    let err = db
        .create_index("users")
        .name("by_x")
        .expression("$.y")
        .execute()
        .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::IndexAlreadyExists(_))));
    assert_eq!(db.describe_index("users", "by_x").unwrap().expression, "$.x");
}

#[test]
fn test_slots_are_assigned_lowest_first_until_exhausted() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("wide").unwrap();
    for i in 0..32 {
        db.create_index("wide")
            .name(&format!("idx_{i}"))
            .expression(&format!("$.f{i}"))
            .execute()
            .unwrap();
    }
    let slots: Vec<u8> = db
        .list_indexes("wide")
        .unwrap()
        .iter()
        .map(|idx| idx.slot)
        .collect();
    assert_eq!(slots, (1..=32).collect::<Vec<u8>>());

    let err = db
        .create_index("wide")
        .name("one_more")
        .expression("$.g")
        .execute()
        .unwrap_err();
    assert!(matches!(err, Error::Schema(SchemaError::IndexSlotsExhausted(_))));
}

#[test]
fn test_build_survives_defragmentation() {
    let label = |i: i32| format!("{}{i:03}", "x".repeat(400));
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("docs").unwrap();
    for i in 0..200 {
        db.insert("docs", json!({"_id": i, "label": label(i)})).unwrap();
    }
    // Punch holes into the primary-key pages. Long keys only fit there after
    // the page is compacted.
    for i in (0..200).step_by(2) {
        assert!(db.delete("docs", &json!(i)).unwrap());
    }

    let stats = db
        .create_index("docs")
        .name("by_label")
        .expression("$.label")
        .execute_with_stats()
        .unwrap();
    assert!(stats.defragmentations > 0, "{stats:?}");
    assert_eq!(stats.documents, 100);
    assert_eq!(stats.nodes, 100);

    let report = db.check_index("docs", "by_label").unwrap();
    assert!(report.is_ok(), "{:?}", report.problems);
    assert_eq!(report.nodes, 100);
    assert!(db.check_index("docs", "_id").unwrap().is_ok());

    for i in (1..200).step_by(2) {
        let found = db.find_by_index("docs", "by_label", &json!(label(i))).unwrap();
        assert_eq!(ids(&found), vec![json!(i)]);
    }

    // Every document chain still reaches its new node.
    for i in (1..200).step_by(2) {
        assert!(db.delete("docs", &json!(i)).unwrap());
    }
    assert!(db.index_keys("docs", "by_label").unwrap().is_empty());
    assert!(db.index_keys("docs", "_id").unwrap().is_empty());
    assert!(db.check_index("docs", "by_label").unwrap().is_ok());
}

#[test]
fn test_safepoints_during_build() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    {
        let options = DatabaseOptions::default().safepoint_dirty_pages(1);
        let db = SkipDB::create_with_options(&path, options).unwrap();
        db.create_collection("items").unwrap();
        for i in 0..50 {
            db.insert("items", json!({"_id": i, "group": i % 5})).unwrap();
        }
        let stats = db
            .create_index("items")
            .name("by_group")
            .expression("$.group")
            .execute_with_stats()
            .unwrap();
        assert_eq!(stats.nodes, 50);
        assert!(stats.safepoints > 0);
        assert!(db.check_index("items", "by_group").unwrap().is_ok());
    }

    let db = SkipDB::open(&path).unwrap();
    let group = db.find_by_index("items", "by_group", &json!(3)).unwrap();
    assert_eq!(
        ids(&group),
        vec![json!(3), json!(8), json!(13), json!(18), json!(23), json!(28), json!(33), json!(38), json!(43), json!(48)]
    );
    assert_eq!(db.index_keys("items", "by_group").unwrap().len(), 50);
}

#[test]
fn test_index_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    {
        let db = SkipDB::create(&path).unwrap();
        db.create_collection("users").unwrap();
        db.insert("users", json!({"_id": "a", "name": {"first": "Zed"}})).unwrap();
        db.insert("users", json!({"_id": "b", "name": {"first": "Amy"}})).unwrap();
        db.create_index("users")
            .name("by_first")
            .expression("UPPER($.name.first)")
            .execute()
            .unwrap();
    }
    let db = SkipDB::open(&path).unwrap();
    assert_eq!(
        db.index_keys("users", "by_first").unwrap(),
        vec![json!("AMY"), json!("ZED")]
    );
    let desc = db.describe_index("users", "by_first").unwrap();
    assert_eq!(desc.slot, 1);
    assert_eq!(desc.expression, "UPPER($.name.first)");

    db.insert("users", json!({"_id": "c", "name": {"first": "Max"}})).unwrap();
    assert_eq!(
        db.index_keys("users", "by_first").unwrap(),
        vec![json!("AMY"), json!("MAX"), json!("ZED")]
    );
}

#[test]
fn test_document_chain_spans_all_indexes() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    for i in 0..20 {
        db.insert("users", json!({"_id": i, "a": i % 3, "tags": [format!("t{i}"), "all"]}))
            .unwrap();
    }
    db.create_index("users")
        .name("by_a")
        .expression("$.a")
        .execute()
        .unwrap();
    db.create_index("users")
        .name("by_tag")
        .expression("$.tags[*]")
        .execute()
        .unwrap();
    db.create_index("users")
        .name("by_pair")
        .expression("[$.a, $._id]")
        .unique(true)
        .execute()
        .unwrap();

    // Deleting walks the chain from the primary-key node; every index must
    // lose exactly this document's nodes.
    for i in 0..10 {
        assert!(db.delete("users", &json!(i)).unwrap());
    }
    assert_eq!(db.index_keys("users", "by_a").unwrap().len(), 10);
    assert_eq!(db.index_keys("users", "by_tag").unwrap().len(), 20);
    assert_eq!(db.index_keys("users", "by_pair").unwrap().len(), 10);
    for name in ["_id", "by_a", "by_tag", "by_pair"] {
        let report = db.check_index("users", name).unwrap();
        assert!(report.is_ok(), "{name}: {:?}", report.problems);
    }
    assert_eq!(
        db.find_by_index("users", "by_tag", &json!("all")).unwrap().len(),
        10
    );
}

#[test]
fn test_aborted_build_is_replayed_identically() {
    let setup = |dir: &Path| {
        let db = create_db(dir, fast_options());
        db.create_collection("users").unwrap();
        for i in 0..30 {
            db.insert("users", json!({"_id": i, "team": i % 4})).unwrap();
        }
        db
    };

    let dir_a = tempdir().unwrap();
    let db_a = setup(dir_a.path());
    let err = db_a
        .create_index("users")
        .name("by_team")
        .expression("$.team")
        .unique(true)
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    db_a.create_index("users")
        .name("by_team")
        .expression("$.team")
        .execute()
        .unwrap();

    let dir_b = tempdir().unwrap();
    let db_b = setup(dir_b.path());
    db_b.create_index("users")
        .name("by_team")
        .expression("$.team")
        .execute()
        .unwrap();

    let a = db_a.describe_index("users", "by_team").unwrap();
    let b = db_b.describe_index("users", "by_team").unwrap();
    assert_eq!(a.slot, 1);
    assert_eq!((a.slot, a.head, a.tail), (b.slot, b.head, b.tail));
    assert_eq!(
        db_a.index_keys("users", "by_team").unwrap(),
        db_b.index_keys("users", "by_team").unwrap()
    );
}

#[test]
fn test_cancelled_build_rolls_back() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("users").unwrap();
    for i in 0..10 {
        db.insert("users", json!({"_id": i, "x": i})).unwrap();
    }
    let catalog = db.read_catalog().unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let err = db
        .create_index("users")
        .name("by_x")
        .expression("$.x")
        .cancel_flag(Arc::clone(&flag))
        .execute()
        .unwrap_err();
    assert!(matches!(err, Error::Transaction(TxnError::Cancelled)));
    assert_eq!(err.kind(), ErrorKind::Concurrency);
    assert_eq!(db.read_catalog().unwrap(), catalog);

    let nodes = db
        .create_index("users")
        .name("by_x")
        .expression("$.x")
        .execute()
        .unwrap();
    assert_eq!(nodes, 10);
}

#[test]
fn test_build_on_empty_collection() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("empty").unwrap();
    let stats = db
        .create_index("empty")
        .name("by_x")
        .expression("LOWER($.x)")
        .execute_with_stats()
        .unwrap();
    assert_eq!(stats.nodes, 0);
    assert_eq!(stats.documents, 0);
    assert!(db.check_index("empty", "by_x").unwrap().is_ok());

    db.insert("empty", json!({"_id": 1, "x": "MiXeD"})).unwrap();
    assert_eq!(db.index_keys("empty", "by_x").unwrap(), vec![json!("mixed")]);
}

#[test]
fn test_large_integer_keys_stay_distinct() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("c").unwrap();
    let low = 9_007_199_254_740_992_i64;
    let high = 9_007_199_254_740_993_i64;
    db.insert("c", json!({"_id": low, "v": "a", "n": high})).unwrap();
    db.insert("c", json!({"_id": high, "v": "b", "n": low})).unwrap();

    assert_eq!(db.get("c", &json!(low)).unwrap().unwrap()["v"], "a");
    assert_eq!(db.get("c", &json!(high)).unwrap().unwrap()["v"], "b");

    let nodes = db
        .create_index("c")
        .name("by_n")
        .expression("$.n")
        .unique(true)
        .execute()
        .unwrap();
    assert_eq!(nodes, 2);
    assert_eq!(db.index_keys("c", "by_n").unwrap(), vec![json!(low), json!(high)]);
    let found = db.find_by_index("c", "by_n", &json!(high)).unwrap();
    assert_eq!(ids(&found), vec![json!(low)]);
}

#[test]
fn test_negative_zero_equals_zero() {
    let dir = tempdir().unwrap();
    let db = create_db(dir.path(), fast_options());
    db.create_collection("c").unwrap();
    db.insert("c", json!({"_id": 1, "x": 0.0})).unwrap();
    db.insert("c", json!({"_id": 2, "x": -0.0})).unwrap();

    let err = db
        .create_index("c")
        .name("by_x")
        .expression("$.x")
        .unique(true)
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);

    db.create_index("c")
        .name("by_x")
        .expression("$.x")
        .execute()
        .unwrap();
    let zeros = db.find_by_index("c", "by_x", &json!(0)).unwrap();
    assert_eq!(ids(&zeros), vec![json!(1), json!(2)]);
    assert!(db.check_index("c", "by_x").unwrap().is_ok());
}
