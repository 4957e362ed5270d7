use sqlbridge::{
    ContinuationPolicy, ErrorKind, OpenOptions, Operation, OperationResult, Registry, SqlValue,
    SqliteEngine,
};

async fn open_app_db(dir: &tempfile::TempDir) -> Registry {
    let registry = Registry::new(SqliteEngine::new());
    registry
        .open("app.db", dir.path().join("app.db"), OpenOptions::default())
        .await
        .unwrap();
    registry
}

/// Creating a table and inserting a row both succeed, the insert reporting one row.
#[tokio::test]
async fn create_then_insert_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x)"),
                Operation::new("INSERT INTO t VALUES (1)"),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    match &results[1] {
        OperationResult::RowsAffected {
            count,
            last_insert_id,
        } => {
            assert_eq!(*count, 1);
            assert_eq!(*last_insert_id, Some(1));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// A failure under StopOnError leaves every later slot NotExecuted.
#[tokio::test]
async fn stop_on_error_marks_remaining_not_executed() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;
    registry
        .run_batch(
            "app.db",
            vec![Operation::new("CREATE TABLE t(x)")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("SELECT * FROM missing_table"),
                Operation::new("INSERT INTO t VALUES (2)"),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_success());
    assert_eq!(results[1].error_kind(), Some(ErrorKind::Database));
    assert_eq!(results[2], OperationResult::NotExecuted);

    // The first insert is not rolled back and the third never ran.
    let count = registry
        .run_batch(
            "app.db",
            vec![Operation::new("SELECT COUNT(*) AS n FROM t")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();
    match &count[0] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows[0][0], SqlValue::Integer(1)),
        other => panic!("unexpected result: {:?}", other),
    }
}

/// ContinueOnError returns one index-aligned slot per operation.
#[tokio::test]
async fn continue_on_error_runs_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x INTEGER PRIMARY KEY)"),
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("SELEC 1"),
                Operation::new("INSERT INTO t VALUES (2)"),
                Operation::new("SELECT x FROM t ORDER BY x"),
            ],
            ContinuationPolicy::ContinueOnError,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    assert!(results[0].is_success());
    assert!(results[1].is_success());
    assert_eq!(results[2].error_kind(), Some(ErrorKind::Constraint));
    assert_eq!(results[3].error_kind(), Some(ErrorKind::Syntax));
    assert!(results[4].is_success());
    match &results[5] {
        OperationResult::RowSet { columns, rows } => {
            assert_eq!(columns, &vec!["x".to_string()]);
            assert_eq!(
                rows,
                &vec![vec![SqlValue::Integer(1)], vec![SqlValue::Integer(2)]]
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// Bound parameters of every type round-trip through a SELECT.
#[tokio::test]
async fn binds_parameters_and_materializes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new(
                    "CREATE TABLE items(id INTEGER PRIMARY KEY, name TEXT, price REAL, raw BLOB, note TEXT)",
                ),
                Operation::with_params(
                    "INSERT INTO items(name, price, raw, note) VALUES (?, ?, ?, ?)",
                    [
                        SqlValue::from("apple"),
                        SqlValue::from(1.5),
                        SqlValue::from(vec![1u8, 2, 3]),
                        SqlValue::Null,
                    ],
                ),
                Operation::new("SELECT id, name, price, raw, note FROM items").read_only(),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    match &results[2] {
        OperationResult::RowSet { columns, rows } => {
            assert_eq!(columns, &["id", "name", "price", "raw", "note"]);
            assert_eq!(rows.len(), 1);
            assert_eq!(
                rows[0],
                vec![
                    SqlValue::Integer(1),
                    SqlValue::from("apple"),
                    SqlValue::Real(1.5),
                    SqlValue::Blob(vec![1, 2, 3]),
                    SqlValue::Null,
                ]
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let objects = results[2].rows_as_objects();
    assert_eq!(objects[0]["name"], serde_json::json!("apple"));
}

/// Updates report the affected count without an insert id.
#[tokio::test]
async fn update_reports_count_without_insert_id() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x)"),
                Operation::new("INSERT INTO t VALUES (1), (2), (3)"),
                Operation::with_params("UPDATE t SET x = x + ?", [10]),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    assert_eq!(
        results[2],
        OperationResult::RowsAffected {
            count: 3,
            last_insert_id: None
        }
    );
}

/// Wrong parameter counts fail the slot instead of the batch.
#[tokio::test]
async fn parameter_count_mismatch_is_a_slot_failure() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::with_params("SELECT ? + ?", [1]),
                Operation::new("SELECT 1"),
            ],
            ContinuationPolicy::ContinueOnError,
        )
        .await
        .unwrap();

    assert_eq!(results[0].error_kind(), Some(ErrorKind::Database));
    assert!(results[1].is_success());
}

/// A read-only operation carrying a write statement never reaches the engine.
#[tokio::test]
async fn read_only_operation_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x)"),
                Operation::new("  ;insert INTO t VALUES (1)").read_only(),
                Operation::new("SELECT COUNT(*) FROM t").read_only(),
            ],
            ContinuationPolicy::ContinueOnError,
        )
        .await
        .unwrap();

    match &results[1] {
        OperationResult::Failure { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::Database);
            assert!(message.contains("read-only"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    match &results[2] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows[0][0], SqlValue::Integer(0)),
        other => panic!("unexpected result: {:?}", other),
    }
}

/// A failing statement inside a transaction rolls the whole batch back.
#[tokio::test]
async fn transaction_rolls_back_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;
    registry
        .run_batch(
            "app.db",
            vec![Operation::new("CREATE TABLE t(x UNIQUE)")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let outcome = registry
        .run_transaction(
            "app.db",
            vec![
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("INSERT INTO t VALUES (2)"),
            ],
            false,
        )
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert!(outcome.control_failure.is_none());
    assert!(outcome.results[0].is_success());
    assert_eq!(outcome.results[1].error_kind(), Some(ErrorKind::Constraint));
    assert_eq!(outcome.results[2], OperationResult::NotExecuted);

    let count = registry
        .run_batch(
            "app.db",
            vec![Operation::new("SELECT COUNT(*) FROM t")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();
    match &count[0] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows[0][0], SqlValue::Integer(0)),
        other => panic!("unexpected result: {:?}", other),
    }
}

/// A clean transaction commits and its writes are visible afterwards.
#[tokio::test]
async fn transaction_commits_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let outcome = registry
        .run_transaction(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x)"),
                Operation::with_params("INSERT INTO t VALUES (?)", ["a"]),
                Operation::with_params("INSERT INTO t VALUES (?)", ["b"]),
            ],
            false,
        )
        .await
        .unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.results.len(), 3);

    let read = registry
        .run_transaction(
            "app.db",
            vec![
                Operation::new("SELECT x FROM t ORDER BY x"),
                Operation::new("DELETE FROM t"),
            ],
            true,
        )
        .await
        .unwrap();
    assert!(!read.committed);
    match &read.results[0] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows.len(), 2),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(read.results[1].is_failure());
}

/// BEGIN inside an open transaction fails and no operation runs.
#[tokio::test]
async fn transaction_begin_failure_skips_operations() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;
    registry
        .run_batch(
            "app.db",
            vec![Operation::new("BEGIN")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let outcome = registry
        .run_transaction("app.db", vec![Operation::new("SELECT 1")], false)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert_eq!(outcome.results, vec![OperationResult::NotExecuted]);
    assert!(outcome
        .control_failure
        .as_ref()
        .is_some_and(OperationResult::is_failure));
}

/// An empty batch returns an empty result list.
#[tokio::test]
async fn empty_batch_returns_no_results() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch("app.db", Vec::new(), ContinuationPolicy::StopOnError)
        .await
        .unwrap();
    assert!(results.is_empty());
}

/// Each insert reports its own rowid, even when it matches the previous one.
#[tokio::test]
async fn insert_ids_are_reported_per_table() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("CREATE TABLE t(x)"),
                Operation::new("CREATE TABLE u(x)"),
                Operation::new("INSERT INTO t VALUES (1)"),
                Operation::new("INSERT INTO u VALUES (1)"),
                Operation::new("DELETE FROM u"),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let rows_affected = |count, last_insert_id| OperationResult::RowsAffected {
        count,
        last_insert_id,
    };
    assert_eq!(results[2], rows_affected(1, Some(1)));
    assert_eq!(results[3], rows_affected(1, Some(1)));
    assert_eq!(results[4], rows_affected(1, None));
}

/// Empty and comment-only SQL is a no-op, not a failure.
#[tokio::test]
async fn blank_sql_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;

    let results = registry
        .run_batch(
            "app.db",
            vec![
                Operation::new(""),
                Operation::new("  -- only a comment"),
                Operation::new("/* block */ ;\n"),
                Operation::new("SELECT 1 -- trailing comment"),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let no_op = OperationResult::RowsAffected {
        count: 0,
        last_insert_id: None,
    };
    assert_eq!(results[0], no_op);
    assert_eq!(results[1], no_op);
    assert_eq!(results[2], no_op);
    match &results[3] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows[0][0], SqlValue::Integer(1)),
        other => panic!("unexpected result: {:?}", other),
    }
}

/// A COMMIT that fails on a deferred constraint rolls back and is reported.
#[tokio::test]
async fn transaction_commit_failure_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let registry = open_app_db(&dir).await;
    registry
        .run_batch(
            "app.db",
            vec![
                Operation::new("PRAGMA foreign_keys = ON"),
                Operation::new("CREATE TABLE p(id INTEGER PRIMARY KEY)"),
                Operation::new(
                    "CREATE TABLE c(pid INTEGER REFERENCES p(id) DEFERRABLE INITIALLY DEFERRED)",
                ),
            ],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();

    let outcome = registry
        .run_transaction("app.db", vec![Operation::new("INSERT INTO c VALUES (99)")], false)
        .await
        .unwrap();

    assert!(!outcome.committed);
    assert!(outcome.results[0].is_success());
    match &outcome.control_failure {
        Some(OperationResult::Failure { kind, message, .. }) => {
            assert_eq!(*kind, ErrorKind::Constraint);
            assert!(message.contains("FOREIGN KEY"));
        }
        other => panic!("unexpected control failure: {:?}", other),
    }

    let count = registry
        .run_batch(
            "app.db",
            vec![Operation::new("SELECT COUNT(*) FROM c")],
            ContinuationPolicy::StopOnError,
        )
        .await
        .unwrap();
    match &count[0] {
        OperationResult::RowSet { rows, .. } => assert_eq!(rows[0][0], SqlValue::Integer(0)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn write_statement_guard_matches_write_verbs() {
    use sqlbridge::batch::is_write_statement;

    for sql in [
        "INSERT INTO t VALUES (1)",
        " ;; update t SET x = 1",
        "\n\tDrop TABLE t",
        "replace into t values (1)",
        "ALTER TABLE t ADD y",
        "reindex",
    ] {
        assert!(is_write_statement(sql), "{}", sql);
    }
    for sql in [
        "SELECT * FROM t",
        "  pragma user_version",
        "WITH x AS (SELECT 1) SELECT * FROM x",
    ] {
        assert!(!is_write_statement(sql), "{}", sql);
    }
}
