// Behavioral contract of the public Database API: ids, round trips, routing, durability.
use std::fs;

use tabula::api::{
    Attributes, Database, DatabaseSchema, ErrorKind, IndexStrategy, TableSchema, Value,
};

fn shop_schema() -> DatabaseSchema {
    let orders = TableSchema::builder("orders")
        .integer("department_id")
        .text("description", 40)
        .timestamp("created_at")
        .index("description", IndexStrategy::Ordered)
        .build()
        .expect("orders");
    let comments = TableSchema::builder("comments")
        .integer("order_id")
        .text("body", 200)
        .index("order_id", IndexStrategy::Hash)
        .build()
        .expect("comments");
    DatabaseSchema::new("shop", vec![orders, comments]).expect("schema")
}

fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[test]
fn identifiers_increase_from_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");
    for expected in 1..=5u64 {
        let row = db
            .create_row("comments", attrs(&[("body", Value::from("hi"))]))
            .expect("create row");
        assert_eq!(row.id(), expected);
        assert_eq!(row.get("id"), Some(&Value::Int(expected as i64)));
    }
    // The orders table keeps its own sequence.
    let row = db
        .create_row("orders", attrs(&[("department_id", Value::Int(1))]))
        .expect("create order");
    assert_eq!(row.id(), 1);
}

#[test]
fn created_rows_read_back_by_identifier() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");
    let created = db
        .create_row(
            "orders",
            attrs(&[
                ("department_id", Value::Int(1000)),
                ("description", Value::from("order #1")),
            ]),
        )
        .expect("create row");
    assert!(created.get("created_at").is_some());

    let found = db
        .find_by("orders", &attrs(&[("id", Value::Int(1))]))
        .expect("find")
        .expect("row");
    assert_eq!(found, created);
    assert_eq!(db.scan_count("orders"), 0);
}

#[test]
fn unknown_fields_are_rejected_without_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");

    let err = db
        .create_row("orders", attrs(&[("color", Value::from("red"))]))
        .expect_err("unknown field");
    assert_eq!(err.kind(), ErrorKind::Schema);
    let err = db
        .find_by("orders", &attrs(&[("color", Value::from("red"))]))
        .expect_err("unknown criterion");
    assert_eq!(err.kind(), ErrorKind::Schema);

    let rows_dir = db.path().join("orders").join("rows");
    assert_eq!(fs::read_dir(&rows_dir).expect("rows dir").count(), 0);

    let row = db
        .create_row("orders", attrs(&[("description", Value::from("ok"))]))
        .expect("create row");
    assert_eq!(row.id(), 1);
}

#[test]
fn indexed_find_does_not_scan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");
    for n in 1..=3 {
        db.create_row(
            "orders",
            attrs(&[("description", Value::from(format!("order #{n}")))]),
        )
        .expect("create row");
    }

    let found = db
        .find_by("orders", &attrs(&[("description", Value::from("order #2"))]))
        .expect("find")
        .expect("row");
    assert_eq!(found.id(), 2);

    let missing = db
        .find_by("orders", &attrs(&[("description", Value::from("order #9"))]))
        .expect("find");
    assert!(missing.is_none());
    assert_eq!(db.scan_count("orders"), 0);
}

#[test]
fn unindexed_find_scans_with_any_semantics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");
    db.create_row(
        "orders",
        attrs(&[("department_id", Value::Int(7)), ("description", Value::from("a"))]),
    )
    .expect("row 1");
    db.create_row("orders", attrs(&[("department_id", Value::Int(8))]))
        .expect("row 2");

    let found = db
        .find_by("orders", &attrs(&[("department_id", Value::Int(8))]))
        .expect("find")
        .expect("row");
    assert_eq!(found.id(), 2);
    assert_eq!(db.scan_count("orders"), 1);

    // department_id 8 and created_at of nobody: one matching criterion is enough.
    let stamp = time::OffsetDateTime::UNIX_EPOCH;
    let found = db
        .find_by(
            "orders",
            &attrs(&[("department_id", Value::Int(8)), ("created_at", Value::Timestamp(stamp))]),
        )
        .expect("find")
        .expect("row");
    assert_eq!(found.id(), 2);

    let none = db
        .find_by("orders", &attrs(&[("department_id", Value::Int(99))]))
        .expect("find");
    assert!(none.is_none());
}

#[test]
fn empty_criteria_is_a_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Database::create(dir.path(), shop_schema()).expect("create");
    let err = db.find_by("orders", &Attributes::new()).expect_err("empty");
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn unflushed_index_entries_are_lost_but_rows_survive() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut db = Database::create(dir.path(), shop_schema()).expect("create");
        db.create_row("comments", attrs(&[("order_id", Value::Int(4))]))
            .expect("create row");
    }

    let mut db = Database::open(dir.path(), "shop").expect("open");
    let criteria = attrs(&[("order_id", Value::Int(4))]);
    assert!(db.find_by("comments", &criteria).expect("find").is_none());
    let by_id = db
        .find_by("comments", &attrs(&[("id", Value::Int(1))]))
        .expect("find")
        .expect("row survives");
    assert_eq!(by_id.get("order_id"), Some(&Value::Int(4)));

    assert_eq!(db.reindex("comments").expect("reindex"), 1);
    let found = db.find_by("comments", &criteria).expect("find").expect("row");
    assert_eq!(found.id(), 1);
}

#[test]
fn flushed_index_entries_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut db = Database::create(dir.path(), shop_schema()).expect("create");
        db.create_row("comments", attrs(&[("order_id", Value::Int(4))]))
            .expect("row 1");
        db.create_row("comments", attrs(&[("order_id", Value::Int(4))]))
            .expect("row 2");
        db.flush().expect("flush");
    }

    let mut db = Database::open(dir.path(), "shop").expect("open");
    let found = db
        .find_by("comments", &attrs(&[("order_id", Value::Int(4))]))
        .expect("find")
        .expect("row");
    // Hash indices keep the most recent row per key.
    assert_eq!(found.id(), 2);
    assert_eq!(db.scan_count("comments"), 0);
}

#[test]
fn create_open_drop_lifecycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::create(dir.path(), shop_schema()).expect("create");
    assert_eq!(db.name(), "shop");
    let err = Database::create(dir.path(), shop_schema()).err().expect("exists");
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let reopened = Database::open(dir.path(), "shop").expect("open");
    assert_eq!(reopened.schema(), &shop_schema());

    assert!(Database::drop_database(dir.path(), "shop").expect("drop"));
    assert!(!Database::drop_database(dir.path(), "shop").expect("drop again"));
    let err = Database::open(dir.path(), "shop").err().expect("gone");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
