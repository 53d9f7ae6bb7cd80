use std::fs;
use std::time::Duration;

use super::*;
use crate::row::Scalar;

fn row(cells: &[(&str, Scalar)]) -> Row {
    cells.iter().map(|(k, v)| (*k, v.clone())).collect()
}

fn text(value: &str) -> Scalar {
    Scalar::from(value)
}

fn num(value: i64) -> Scalar {
    Scalar::from(value)
}

const KEYS: &[&str] = &["id", "date"];

#[test]
fn later_batch_overwrites_and_extends_existing_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let options = UpsertOptions::default();

    upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("2025-01-01")), ("cost", num(10))])],
        KEYS,
        &options,
    )
    .unwrap();
    let report = upsert(
        &path,
        &[row(&[
            ("id", text("A")),
            ("date", text("2025-01-01")),
            ("cost", num(12)),
            ("clicks", num(3)),
        ])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.total_rows, 1);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "date,clicks,cost,id\n2025-01-01,3,12,A\n"
    );
}

#[test]
fn same_batch_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let batch = vec![
        row(&[("id", text("B")), ("date", text("2025-01-02")), ("cost", Scalar::from(1.5))]),
        row(&[("id", text("A")), ("date", text("2025-01-01")), ("status", Scalar::Null)]),
    ];
    let options = UpsertOptions::default();

    upsert(&path, &batch, KEYS, &options).unwrap();
    let first = fs::read(&path).unwrap();
    upsert(&path, &batch, KEYS, &options).unwrap();
    let second = fs::read(&path).unwrap();

    assert_eq!(first, second);
}

#[test]
fn empty_incoming_values_keep_stored_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,cost,status\nA,2025-01-01,10,active\n").unwrap();

    upsert(
        &path,
        &[row(&[
            ("id", text("A")),
            ("date", text("2025-01-01")),
            ("cost", text("")),
            ("status", Scalar::Null),
            ("clicks", num(4)),
        ])],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap();

    let dataset = read_dataset(&path).unwrap();
    assert_eq!(dataset.rows.len(), 1);
    assert_eq!(dataset.rows[0].render("cost"), "10");
    assert_eq!(dataset.rows[0].render("status"), "active");
    assert_eq!(dataset.rows[0].render("clicks"), "4");
}

#[test]
fn new_keys_append_in_first_seen_order_and_existing_keep_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date\nB,d1\nA,d1\n").unwrap();

    let report = upsert(
        &path,
        &[
            row(&[("id", text("D")), ("date", text("d1"))]),
            row(&[("id", text("A")), ("date", text("d1")), ("cost", num(1))]),
            row(&[("id", text("C")), ("date", text("d1"))]),
        ],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap();

    assert_eq!((report.inserted, report.updated), (2, 1));
    let ids: Vec<String> = read_dataset(&path)
        .unwrap()
        .rows
        .iter()
        .map(|r| r.render("id"))
        .collect();
    assert_eq!(ids, vec!["B", "A", "D", "C"]);
}

#[test]
fn non_strict_header_never_drops_prior_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,legacy\nA,d1,\n").unwrap();

    let report = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1")), ("cost", num(2))])],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap();

    assert_eq!(report.header, vec!["date", "cost", "id", "legacy"]);
}

#[test]
fn strict_header_keeps_only_populated_columns_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,legacy\nA,d1,\n").unwrap();
    let options = UpsertOptions {
        strict_header: true,
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[
            ("id", text("A")),
            ("date", text("d1")),
            ("cost", num(2)),
            ("campaign_id", num(9)),
            ("empty", text("")),
        ])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["date", "campaign_id", "cost", "id"]);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "date,campaign_id,cost,id\nd1,9,2,A\n"
    );
}

#[test]
fn drop_fields_removes_column_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,raw_json\nA,d1,{}\n").unwrap();
    let options = UpsertOptions {
        drop_fields: vec!["raw_json".into()],
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("B")), ("date", text("d1")), ("raw_json", text("[]"))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert!(!report.header.contains(&"raw_json".to_string()));
    assert!(!fs::read_to_string(&path).unwrap().contains("raw_json"));
}

#[test]
fn sort_by_orders_rows_by_rendered_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let options = UpsertOptions {
        sort_by: vec!["date".into(), "id".into()],
        ..UpsertOptions::default()
    };

    upsert(
        &path,
        &[
            row(&[("id", text("B")), ("date", text("2025-01-02"))]),
            row(&[("id", text("C")), ("date", text("2025-01-01"))]),
            row(&[("id", text("A")), ("date", text("2025-01-02"))]),
        ],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "date,id\n2025-01-01,C\n2025-01-02,A\n2025-01-02,B\n"
    );
}

#[test]
fn reset_discards_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,old\nZ,d0,x\n").unwrap();
    let options = UpsertOptions {
        reset: true,
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1"))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.total_rows, 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), "date,id\nd1,A\n");
}

#[test]
fn fallback_header_seeds_a_new_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let options = UpsertOptions {
        fallback_header: vec!["id".into(), "date".into(), "notes".into()],
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1"))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["date", "id", "notes"]);
    assert_eq!(fs::read_to_string(&path).unwrap(), "date,id,notes\nd1,A,\n");
}

#[test]
fn schema_without_new_columns_fixes_the_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let options = UpsertOptions {
        schema: vec!["id".into(), "date".into(), "cost".into()],
        allow_new_columns: false,
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[
            ("id", text("A")),
            ("date", text("d1")),
            ("cost", num(5)),
            ("clicks", num(2)),
        ])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["id", "date", "cost"]);
    assert_eq!(fs::read_to_string(&path).unwrap(), "id,date,cost\nA,d1,5\n");
}

#[test]
fn schema_leads_header_when_new_columns_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let options = UpsertOptions {
        schema: vec!["id".into(), "date".into()],
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1")), ("status", text("ok")), ("cost", num(1))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["id", "date", "status", "cost"]);
}

#[test]
fn existing_header_is_closed_when_new_columns_disallowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,cost\nA,d1,1\n").unwrap();
    let options = UpsertOptions {
        allow_new_columns: false,
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("B")), ("date", text("d1")), ("clicks", num(7))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["date", "cost", "id"]);
    assert!(!fs::read_to_string(&path).unwrap().contains("clicks"));
}

#[test]
fn insertion_order_appends_new_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,zeta,date\nA,1,d1\n").unwrap();
    let options = UpsertOptions {
        header_order: HeaderOrder::Insertion,
        ..UpsertOptions::default()
    };

    let report = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1")), ("alpha", num(1))])],
        KEYS,
        &options,
    )
    .unwrap();

    assert_eq!(report.header, vec!["id", "zeta", "date", "alpha"]);
}

#[test]
fn duplicate_keys_in_existing_file_are_collapsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date,cost,clicks\nA,d1,10,\nB,d1,1,1\nA,d1,,4\n").unwrap();

    let report = upsert(&path, &[], KEYS, &UpsertOptions::default()).unwrap();

    assert_eq!(report.total_rows, 2);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "date,clicks,cost,id\nd1,4,10,A\nd1,1,1,B\n"
    );
}

#[test]
fn corrupt_file_is_reported_and_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let corrupt = "id,date\nA,d1,unexpected\n";
    fs::write(&path, corrupt).unwrap();

    let err = upsert(
        &path,
        &[row(&[("id", text("B")), ("date", text("d1"))])],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(err, StoreError::DatasetRead { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), corrupt);
    assert!(!DatasetLock::lock_path_for(&path).exists());
}

#[test]
fn missing_parent_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed").join("2025").join("daily.csv");

    upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1"))])],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap();

    assert!(path.exists());
}

#[test]
fn empty_key_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = upsert(
        dir.path().join("daily.csv"),
        &[row(&[("id", text("A"))])],
        &[] as &[&str],
        &UpsertOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRows(_)));
}

#[test]
fn held_lock_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    let lock = LockOptions {
        timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        ..LockOptions::default()
    };
    let _held = DatasetLock::acquire(&path, &lock).unwrap();

    let err = upsert(
        &path,
        &[row(&[("id", text("A")), ("date", text("d1"))])],
        KEYS,
        &UpsertOptions {
            lock,
            ..UpsertOptions::default()
        },
    )
    .unwrap_err();

    assert!(matches!(err, StoreError::LockTimeout { .. }));
    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn upsert_keeps_dataset_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    fs::write(&path, "id,date\nA,d1\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    upsert(
        &path,
        &[row(&[("id", text("B")), ("date", text("d1"))])],
        KEYS,
        &UpsertOptions::default(),
    )
    .unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}
