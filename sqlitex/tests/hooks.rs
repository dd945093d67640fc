//! Connection hooks, column metadata and process-wide status.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlitex::{randomness, status, DbError, StatusCounter, UpdateAction};

// ── Commit and rollback hooks ───────────────────────────────────────────

#[test]
fn test_commit_hook_sees_each_commit() {
    let mut conn = common::memory_db();
    let commits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&commits);
    conn.commit_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    })
    .expect("install hook");

    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .expect("autocommit writes");
    let tx = conn.transaction().expect("begin");
    tx.execute_batch("INSERT INTO t VALUES (2); INSERT INTO t VALUES (3);")
        .expect("insert");
    tx.commit().expect("commit");
    assert_eq!(commits.load(Ordering::SeqCst), 3);

    conn.clear_commit_hook().expect("clear hook");
    conn.execute_batch("INSERT INTO t VALUES (4);").expect("insert");
    assert_eq!(commits.load(Ordering::SeqCst), 3);
}

#[test]
fn test_commit_hook_can_veto() {
    let mut conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (x);").expect("create table");
    conn.commit_hook(|| true).expect("install commit hook");

    let err = conn
        .execute_batch("INSERT INTO t VALUES (1);")
        .expect_err("vetoed commit");
    assert!(matches!(err, DbError::Constraint { .. }), "{err:?}");

    conn.clear_commit_hook().expect("clear hook");
    let count: i64 = conn
        .query_row("SELECT count(*) FROM t", &[], |stmt| stmt.column(0))
        .expect("count");
    assert_eq!(count, 0);
}

#[test]
fn test_panicking_commit_hook_rolls_back() {
    let mut conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (x);").expect("create table");
    conn.commit_hook(|| panic!("commit hook exploded"))
        .expect("install hook");
    assert!(conn.execute_batch("INSERT INTO t VALUES (1);").is_err());

    conn.clear_commit_hook().expect("clear hook");
    let count: i64 = conn
        .query_row("SELECT count(*) FROM t", &[], |stmt| stmt.column(0))
        .expect("count");
    assert_eq!(count, 0);
}

#[test]
fn test_rollback_hook_on_explicit_rollback() {
    let mut conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (x);").expect("create table");
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    conn.rollback_hook(move || flag.store(true, Ordering::SeqCst))
        .expect("install hook");

    let tx = conn.transaction().expect("begin");
    tx.execute_batch("INSERT INTO t VALUES (1);").expect("insert");
    tx.rollback().expect("rollback");
    assert!(fired.load(Ordering::SeqCst));
}

// ── Update hook ─────────────────────────────────────────────────────────

#[test]
fn test_update_hook_reports_row_changes() {
    let mut conn = common::memory_db();
    conn.execute_batch("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT);")
        .expect("create table");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    conn.update_hook(move |action, schema, table, rowid| {
        log.lock()
            .expect("lock")
            .push((action, schema.to_string(), table.to_string(), rowid));
    })
    .expect("install hook");

    conn.execute_batch(
        "INSERT INTO people (id, name) VALUES (7, 'ada');
         UPDATE people SET name = 'grace' WHERE id = 7;
         DELETE FROM people WHERE id = 7;",
    )
    .expect("writes");

    let seen = seen.lock().expect("lock").clone();
    let main = "main".to_string();
    let people = "people".to_string();
    assert_eq!(
        seen,
        vec![
            (UpdateAction::Insert, main.clone(), people.clone(), 7),
            (UpdateAction::Update, main.clone(), people.clone(), 7),
            (UpdateAction::Delete, main, people, 7),
        ]
    );
}

#[test]
fn test_hooks_on_empty_connection_fail() {
    let mut empty = sqlitex::Connection::default();
    assert_eq!(
        empty.update_hook(|_, _, _, _| {}).expect_err("empty"),
        DbError::InvalidHandle("connection")
    );
    assert_eq!(
        empty.progress_handler(1, || false).expect_err("empty"),
        DbError::InvalidHandle("connection")
    );
    assert!(empty.clear_commit_hook().is_err());
}

#[test]
fn test_close_drops_installed_hooks() {
    struct Guard(Arc<AtomicUsize>);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let mut conn = common::memory_db();
    let guard = Guard(Arc::clone(&drops));
    conn.commit_hook(move || {
        let _ = &guard;
        false
    })
    .expect("install hook");
    let guard = Guard(Arc::clone(&drops));
    conn.rollback_hook(move || {
        let _ = &guard;
    })
    .expect("install hook");

    let replacement = Guard(Arc::clone(&drops));
    conn.rollback_hook(move || {
        let _ = &replacement;
    })
    .expect("replace hook");
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    conn.close().expect("close");
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

// ── Progress handler ────────────────────────────────────────────────────

#[test]
fn test_progress_handler_aborts_statement() {
    let mut conn = common::memory_db();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    conn.progress_handler(100, move || counter.fetch_add(1, Ordering::SeqCst) >= 10)
        .expect("install handler");

    let err = conn
        .query_row(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
             SELECT count(*) FROM c",
            &[],
            |stmt| stmt.column::<i64>(0),
        )
        .expect_err("aborted");
    assert!(err.is_interrupted(), "{err:?}");
    assert!(calls.load(Ordering::SeqCst) > 10);

    conn.clear_progress_handler().expect("clear handler");
    let n: i64 = conn
        .query_row(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000) \
             SELECT count(*) FROM c",
            &[],
            |stmt| stmt.column(0),
        )
        .expect("runs to completion");
    assert_eq!(n, 1000);
}

// ── Connection state ────────────────────────────────────────────────────

#[test]
fn test_set_last_insert_rowid() {
    let conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .expect("insert");
    assert_eq!(conn.last_insert_rowid().expect("rowid"), 1);
    conn.set_last_insert_rowid(1234).expect("override");
    assert_eq!(conn.last_insert_rowid().expect("rowid"), 1234);
    let seen: i64 = conn
        .query_row("SELECT last_insert_rowid()", &[], |stmt| stmt.column(0))
        .expect("sql view");
    assert_eq!(seen, 1234);
}

#[test]
fn test_column_metadata() {
    let conn = common::memory_db();
    conn.execute_batch(
        "CREATE TABLE notes (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             title TEXT NOT NULL COLLATE NOCASE,
             body
         );",
    )
    .expect("create table");

    let id = conn.column_metadata(None, "notes", "id").expect("id");
    assert_eq!(id.declared_type.as_deref(), Some("INTEGER"));
    assert!(id.primary_key);
    assert!(id.auto_increment);

    let title = conn
        .column_metadata(Some("main"), "notes", "title")
        .expect("title");
    assert_eq!(title.collation.as_deref(), Some("NOCASE"));
    assert!(title.not_null);
    assert!(!title.primary_key);

    let body = conn.column_metadata(None, "notes", "body").expect("body");
    assert_eq!(body.declared_type, None);
    assert_eq!(body.collation.as_deref(), Some("BINARY"));
    assert!(!body.not_null);

    assert!(conn.column_metadata(None, "notes", "missing").is_err());
    assert!(conn.column_metadata(None, "missing", "id").is_err());
}

// ── Process-wide status ─────────────────────────────────────────────────

#[test]
fn test_memory_status_tracks_allocations() {
    let conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (randomblob(4096));")
        .expect("allocate");
    let memory = status(StatusCounter::MemoryUsed, false).expect("memory used");
    assert!(memory.current > 0);
    assert!(memory.highwater >= memory.current);

    let count = status(StatusCounter::MallocCount, true).expect("malloc count");
    assert!(count.current > 0);
    let after_reset = status(StatusCounter::MallocCount, false).expect("malloc count");
    assert!(after_reset.highwater >= after_reset.current);
}

#[test]
fn test_randomness_is_not_constant() {
    let mut buf = [0_u8; 32];
    randomness(&mut buf);
    assert!(buf.iter().any(|b| *b != 0));
}
