//! Unit tests for the connection-level wrapper.

use super::*;

fn open_with_table() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);")
        .expect("create table");
    conn
}

#[test]
fn test_open_in_memory() {
    let conn = open_with_table();
    conn.execute(
        "INSERT INTO t (id, val) VALUES (?1, ?2)",
        params![1_i64, "hello"],
    )
    .expect("insert");
    let result: String = conn
        .query_row("SELECT val FROM t WHERE id = ?1", params![1_i64], |stmt| {
            stmt.column(0)
        })
        .expect("query");
    assert_eq!(result, "hello");
}

#[test]
fn test_query_row_no_row() {
    let conn = open_with_table();
    let err = conn
        .query_row("SELECT id FROM t WHERE id = 999", &[], |stmt| {
            stmt.column::<i64>(0)
        })
        .expect_err("no row");
    assert_eq!(err, DbError::NoRow);
}

#[test]
fn test_query_row_optional_none() {
    let conn = open_with_table();
    let result = conn
        .query_row_optional("SELECT id FROM t WHERE id = 999", &[], |stmt| {
            stmt.column::<i64>(0)
        })
        .expect("query");
    assert!(result.is_none());
}

#[test]
fn test_query_map_collects_rows() {
    let conn = open_with_table();
    conn.execute_batch("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, NULL);")
        .expect("insert");
    let rows: Vec<(i64, Option<String>)> = conn
        .query_map("SELECT id, val FROM t ORDER BY id", &[])
        .expect("query");
    assert_eq!(
        rows,
        vec![
            (1, Some("a".to_string())),
            (2, Some("b".to_string())),
            (3, None)
        ]
    );
}

#[test]
fn test_execute_reports_changes() {
    let conn = open_with_table();
    conn.execute_batch("INSERT INTO t VALUES (1, 'a'), (2, 'b');")
        .expect("insert");
    let changed = conn
        .execute("UPDATE t SET val = ?1", params!["z"])
        .expect("update");
    assert_eq!(changed, 2);
    assert_eq!(conn.total_changes().expect("total"), 4);
}

#[test]
fn test_execute_typed() {
    let conn = open_with_table();
    conn.execute_typed("INSERT INTO t (id, val) VALUES (?1, ?2)", &[&7_u32, &"seven"])
        .expect("insert");
    assert_eq!(conn.last_insert_rowid().expect("rowid"), 7);
}

#[test]
fn test_execute_batch_reports_compile_error() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let err = conn.execute_batch("SELEC 1").expect_err("syntax error");
    assert_eq!(err.code().map(ResultCode::primary), Some(ffi::SQLITE_ERROR));
    assert!(err.to_string().contains("syntax error"), "{err}");
}

#[test]
fn test_constraint_violation_is_classified() {
    let conn = open_with_table();
    conn.execute("INSERT INTO t (id) VALUES (1)", &[])
        .expect("insert");
    let err = conn
        .execute("INSERT INTO t (id) VALUES (1)", &[])
        .expect_err("duplicate key");
    assert!(matches!(err, DbError::Constraint { .. }), "{err:?}");
}

// ── Transactions ────────────────────────────────────────────────────────

#[test]
fn test_transaction_commit() {
    let conn = open_with_table();
    {
        let tx = conn.transaction().expect("begin tx");
        assert!(!conn.is_autocommit().expect("autocommit"));
        tx.execute("INSERT INTO t (id) VALUES (?1)", params![42_i64])
            .expect("insert");
        tx.commit().expect("commit");
    }
    assert!(conn.is_autocommit().expect("autocommit"));
    let result: i64 = conn
        .query_row("SELECT id FROM t WHERE id = 42", &[], |stmt| stmt.column(0))
        .expect("query");
    assert_eq!(result, 42);
}

#[test]
fn test_transaction_rollback_on_drop() {
    let conn = open_with_table();
    {
        let tx = conn.transaction_immediate().expect("begin tx");
        tx.execute("INSERT INTO t (id) VALUES (?1)", params![99_i64])
            .expect("insert");
        // Dropped without commit.
    }
    let result = conn
        .query_row_optional("SELECT id FROM t WHERE id = 99", &[], |stmt| {
            stmt.column::<i64>(0)
        })
        .expect("query");
    assert!(result.is_none());
}

#[test]
fn test_transaction_explicit_rollback() {
    let conn = open_with_table();
    let tx = conn.transaction_exclusive().expect("begin tx");
    tx.execute_batch("INSERT INTO t (id) VALUES (5)").expect("insert");
    tx.rollback().expect("rollback");
    let count: i64 = conn
        .query_row("SELECT count(*) FROM t", &[], |stmt| stmt.column(0))
        .expect("count");
    assert_eq!(count, 0);
}

// ── Handles ─────────────────────────────────────────────────────────────

#[test]
fn test_empty_connection_is_invalid() {
    let conn = Connection::default();
    assert!(!conn.is_open());
    assert_eq!(
        conn.execute_batch("SELECT 1").expect_err("empty"),
        DbError::InvalidHandle("connection")
    );
    assert!(matches!(
        conn.prepare("SELECT 1"),
        Err(DbError::InvalidHandle("connection"))
    ));
}

#[test]
fn test_close_is_idempotent() {
    let mut conn = Connection::open_in_memory().expect("open in-memory db");
    conn.close().expect("first close");
    conn.close().expect("second close");
    assert!(!conn.is_open());
    assert!(matches!(
        conn.changes(),
        Err(DbError::InvalidHandle("connection"))
    ));
}

#[test]
fn test_take_leaves_empty_connection() {
    let mut conn = Connection::open_in_memory().expect("open in-memory db");
    let moved = std::mem::take(&mut conn);
    assert!(moved.is_open());
    assert!(!conn.is_open());
    moved.execute_batch("SELECT 1").expect("moved connection works");
}

#[test]
fn test_interrupt_after_close_is_noop() {
    let mut conn = Connection::open_in_memory().expect("open in-memory db");
    let handle = conn.interrupt_handle().expect("handle");
    conn.close().expect("close");
    handle.interrupt();
}

#[test]
fn test_filename_and_readonly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db");
    let conn = Connection::open(&path, OpenFlags::default()).expect("open file db");
    let name = conn.filename("main").expect("filename").expect("file backed");
    assert!(name.ends_with("test.db"), "{name}");
    assert!(!conn.is_readonly("main").expect("readonly"));
    assert!(conn.is_readonly("nope").is_err());

    let memory = Connection::open_in_memory().expect("open in-memory db");
    assert_eq!(memory.filename("main").expect("filename"), None);
}

#[test]
fn test_read_only_open_rejects_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ro.db");
    {
        let conn = Connection::open(&path, OpenFlags::default()).expect("create");
        conn.execute_batch("CREATE TABLE t (x);").expect("create table");
    }
    let conn = Connection::open_with(&path, &OpenOptions::new().read_only()).expect("open ro");
    assert!(conn.is_readonly("main").expect("readonly"));
    let err = conn
        .execute_batch("INSERT INTO t VALUES (1)")
        .expect_err("read-only");
    assert_eq!(err.code().map(ResultCode::primary), Some(ffi::SQLITE_READONLY));
}

#[test]
fn test_open_options_apply_foreign_keys() {
    let conn = Connection::open_with(":memory:", &OpenOptions::new().foreign_keys(true))
        .expect("open");
    let enabled: bool = conn
        .query_row("PRAGMA foreign_keys", &[], |stmt| stmt.column(0))
        .expect("pragma");
    assert!(enabled);
    assert!(!conn.set_foreign_keys(false).expect("disable"));
}

#[test]
fn test_limits() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let previous = conn.set_limit(Limit::Attached, 2).expect("set limit");
    assert!(previous >= 2);
    assert_eq!(conn.limit(Limit::Attached).expect("limit"), 2);
}

#[test]
fn test_busy_handler_replaced_by_timeout() {
    let mut conn = Connection::open_in_memory().expect("open in-memory db");
    conn.busy_handler(|count| count < 3).expect("handler");
    conn.busy_timeout(std::time::Duration::from_millis(10))
        .expect("timeout");
    conn.clear_busy_handler().expect("clear");
}

#[test]
fn test_maintenance_calls() {
    let conn = open_with_table();
    conn.cache_flush().expect("flush");
    conn.release_memory().expect("release");
    conn.optimize().expect("optimize");
    conn.set_triggers(true).expect("triggers");
    conn.set_extended_result_codes(true).expect("extended codes");
}

// ── Library information ─────────────────────────────────────────────────

#[test]
fn test_library_information() {
    assert!(version().starts_with('3'));
    assert!(version_number() >= 3_000_000);
    assert!(!source_id().is_empty());
    assert!(is_complete("SELECT 1;").expect("complete"));
    assert!(!is_complete("SELECT 1").expect("incomplete"));
    assert_ne!(threading_mode(), ThreadingMode::SingleThread);
}
