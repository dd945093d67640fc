//! Statement state machine, binding and row streaming.

mod common;

use std::time::{Duration, UNIX_EPOCH};

use sqlitex::{
    ColumnCursor, DbError, DbResult, EncodedText, Encoding, FromRow, Null, PrepareFlags, Rows,
    StatementStatus, StepResult, StreamState, Utf16String, Value, ValueType, ZeroBlob,
};
use test_case::test_case;

const SQLITE_ERROR: i32 = 1;
const SQLITE_MISUSE: i32 = 21;
const SQLITE_RANGE: i32 = 25;

#[test]
fn test_select_bound_integer() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1+1").expect("prepare");
    stmt.bind(1, &41_i64).expect("bind");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);
    assert_eq!(stmt.column::<i64>(0).expect("column"), 42);
    assert_eq!(stmt.step().expect("step"), StepResult::Done);
    assert_eq!(stmt.state(), StreamState::Exhausted);
}

#[test]
fn test_exhausted_statement_stays_done() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT 1").expect("prepare");
    stmt.run().expect("run");
    for _ in 0..3 {
        assert_eq!(stmt.step().expect("step"), StepResult::Done);
    }
    stmt.reset().expect("reset");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);
}

#[test]
fn test_reset_and_clear_binds_nulls() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1, ?2").expect("prepare");
    stmt.bind_all(&[&5_i64, &"five"]).expect("bind");
    stmt.run().expect("run");
    stmt.reset().expect("reset");
    stmt.clear().expect("clear");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);
    assert_eq!(stmt.column_type(0).expect("type"), ValueType::Null);
    assert_eq!(stmt.column_type(1).expect("type"), ValueType::Null);
}

#[test]
fn test_bind_while_running_is_deferred() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1").expect("prepare");
    stmt.bind(1, &1_i64).expect("bind");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);

    stmt.bind(1, &2_i64).expect("deferred bind");
    assert_eq!(stmt.column::<i64>(0).expect("column"), 1);
    assert_eq!(stmt.step().expect("step"), StepResult::Done);

    stmt.reset().expect("reset");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);
    assert_eq!(stmt.column::<i64>(0).expect("column"), 2);
}

#[test]
fn test_deferred_clear_applies_after_bind_order() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1").expect("prepare");
    stmt.bind(1, &"first").expect("bind");
    stmt.run().expect("run");
    stmt.bind(1, &"second").expect("deferred bind");
    stmt.clear().expect("deferred clear");
    stmt.reset().expect("reset");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<Value>(0).expect("column"), Value::Null);
}

#[test]
fn test_bind_out_of_range_fails_statement() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1").expect("prepare");
    let err = stmt.bind(2, &1_i64).expect_err("out of range");
    assert!(matches!(err, DbError::Bind { .. }), "{err:?}");
    assert_eq!(err.code().map(|c| c.primary()), Some(SQLITE_RANGE));
    assert_eq!(stmt.state(), StreamState::Failed);

    let err = stmt.step().expect_err("failed statement");
    assert_eq!(err.code().map(|c| c.primary()), Some(SQLITE_MISUSE));
    assert!(stmt.bind(1, &1_i64).is_err());
    assert!(stmt.clear().is_err());

    stmt.reset().expect("reset");
    assert_eq!(stmt.state(), StreamState::Idle);
    stmt.bind(1, &7_i64).expect("bind after reset");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<i64>(0).expect("column"), 7);
}

#[test]
fn test_step_error_fails_statement() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT abs(?1)").expect("prepare");
    stmt.bind(1, &i64::MIN).expect("bind");
    let err = stmt.step().expect_err("integer overflow");
    assert!(matches!(err, DbError::Step { .. }), "{err:?}");
    assert_eq!(stmt.state(), StreamState::Failed);
    stmt.reset().expect("reset");
    stmt.bind(1, &-3_i64).expect("bind");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<i64>(0).expect("column"), 3);
}

#[test]
fn test_use_after_close() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT 1").expect("prepare");
    stmt.close();
    stmt.close();
    assert_eq!(stmt.state(), StreamState::Closed);
    assert_eq!(stmt.step().expect_err("closed"), DbError::UseAfterClose("statement"));
    assert_eq!(
        stmt.bind(1, &1_i64).expect_err("closed"),
        DbError::UseAfterClose("statement")
    );
    assert!(matches!(stmt.column_count(), Err(DbError::UseAfterClose(_))));
}

// ── Compilation ─────────────────────────────────────────────────────────

#[test_case("" ; "empty")]
#[test_case("   -- only a comment" ; "comment only")]
#[test_case("SELECT 1; SELECT 2" ; "trailing statement")]
#[test_case("SELEC 1" ; "syntax error")]
fn test_prepare_rejects(sql: &str) {
    let conn = common::memory_db();
    let err = conn.prepare(sql).expect_err("compile error");
    assert!(matches!(err, DbError::Compile { .. }), "{err:?}");
}

#[test]
fn test_prepare_allows_trailing_comment() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT 1; -- done").expect("prepare");
    assert_eq!(stmt.step().expect("step"), StepResult::Row);
}

#[test]
fn test_prepare_rejects_unknown_flags() {
    let conn = common::memory_db();
    let err = conn
        .prepare_with_flags("SELECT 1", PrepareFlags::from_bits(0x80))
        .expect_err("unknown flags");
    assert_eq!(err.code().map(|c| c.primary()), Some(SQLITE_MISUSE));
    conn.prepare_with_flags("SELECT 1", PrepareFlags::PERSISTENT | PrepareFlags::NO_VTAB)
        .expect("known flags");
}

#[test]
fn test_compile_error_message() {
    let conn = common::memory_db();
    let err = conn.prepare("SELECT * FROM missing").expect_err("no table");
    assert_eq!(err.code().map(|c| c.primary()), Some(SQLITE_ERROR));
    assert!(err.to_string().contains("no such table"), "{err}");
}

// ── Values ──────────────────────────────────────────────────────────────

#[test_case(Value::Null ; "null")]
#[test_case(Value::Integer(i64::MIN) ; "min integer")]
#[test_case(Value::Integer(i64::MAX) ; "max integer")]
#[test_case(Value::Real(-0.5) ; "real")]
#[test_case(Value::Text(String::new()) ; "empty text")]
#[test_case(Value::Text("h\u{e9}llo \u{1f600}".to_string()) ; "unicode text")]
#[test_case(Value::Blob(vec![0, 159, 146, 150]) ; "blob")]
fn test_value_round_trip(value: Value) {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1").expect("prepare");
    stmt.bind(1, &value).expect("bind");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<Value>(0).expect("column"), value);
    assert_eq!(stmt.column_type(0).expect("type"), value.value_type());
}

#[test]
fn test_host_type_round_trips() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1, ?2, ?3, ?4, ?5, ?6").expect("prepare");
    let when = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    stmt.bind_all(&[&true, &u32::MAX, &1.25_f32, &[1_u8, 2, 3], &when, &Some(9_i16)])
        .expect("bind");
    stmt.step().expect("step");
    assert!(stmt.column::<bool>(0).expect("bool"));
    assert_eq!(stmt.column::<u32>(1).expect("u32"), u32::MAX);
    assert!((stmt.column::<f32>(2).expect("f32") - 1.25).abs() < f32::EPSILON);
    assert_eq!(stmt.column::<Vec<u8>>(3).expect("blob"), vec![1, 2, 3]);
    assert_eq!(stmt.column::<std::time::SystemTime>(4).expect("time"), when);
    assert_eq!(stmt.column::<Option<i16>>(5).expect("option"), Some(9));
}

#[test]
fn test_nulls_and_options() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1, ?2").expect("prepare");
    stmt.bind(1, &Null).expect("bind null");
    stmt.bind(2, &None::<String>).expect("bind none");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<Option<i64>>(0).expect("column"), None);
    assert_eq!(stmt.column::<String>(1).expect("column"), "");
    assert!(stmt.value_ref(1).expect("value").is_null());
}

#[test]
fn test_utf16_text() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1, ?2").expect("prepare");
    stmt.bind(1, &Utf16String::from("gr\u{fc}\u{df}e")).expect("bind utf16");
    stmt.bind(2, &EncodedText::encode("caf\u{e9}", Encoding::Utf16Be))
        .expect("bind encoded");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<String>(0).expect("column"), "gr\u{fc}\u{df}e");
    assert_eq!(stmt.column::<String>(1).expect("column"), "caf\u{e9}");
    let wide = stmt.column::<Utf16String>(1).expect("column");
    assert_eq!(wide.to_string_checked().expect("decode"), "caf\u{e9}");
    let le = stmt
        .value_ref(0)
        .expect("value")
        .text_encoded(Encoding::Utf16Le)
        .expect("utf16le");
    assert_eq!(le.decode().expect("decode"), "gr\u{fc}\u{df}e");
}

#[test]
fn test_odd_length_utf16_is_rejected() {
    let err = EncodedText::new(Encoding::Utf16Le, vec![0x61]).expect_err("odd length");
    assert!(matches!(err, DbError::Conversion(_)), "{err:?}");
}

#[test]
fn test_zero_blob() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT ?1, length(?1)").expect("prepare");
    stmt.bind(1, &ZeroBlob(4)).expect("bind");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<Vec<u8>>(0).expect("blob"), vec![0; 4]);
    assert_eq!(stmt.column::<i64>(1).expect("length"), 4);
}

#[test]
fn test_borrowed_text_survives_utf16_reads() {
    let conn = common::memory_db();
    let long = "x".repeat(200);
    let mut stmt = conn.prepare("SELECT ?1").expect("prepare");
    stmt.bind(1, &long.as_str()).expect("bind");
    stmt.step().expect("step");
    let value = stmt.value_ref(0).expect("value");
    let borrowed = value.as_str().expect("text");
    let wide = value.text16();
    let be = value.text_encoded(Encoding::Utf16Be).expect("utf16be");
    assert_eq!(borrowed, long);
    assert_eq!(value.as_blob(), long.as_bytes());
    assert_eq!(String::from_utf16(&wide).expect("decode"), long);
    assert_eq!(be.decode().expect("decode"), long);
}

#[test]
fn test_utf16_database_text_is_stable() {
    let conn = common::memory_db();
    conn.execute_batch(
        "PRAGMA encoding = 'UTF-16le';
         CREATE TABLE t (c TEXT);
         INSERT INTO t VALUES ('gr\u{fc}\u{df}e gr\u{fc}\u{df}e gr\u{fc}\u{df}e');",
    )
    .expect("setup");
    let mut stmt = conn.prepare("SELECT c FROM t").expect("prepare");
    stmt.step().expect("step");
    let value = stmt.value_ref(0).expect("value");
    let bytes = value.as_blob();
    let text = value.as_str().expect("text");
    let wide = value.text16();
    assert_eq!(text, "gr\u{fc}\u{df}e gr\u{fc}\u{df}e gr\u{fc}\u{df}e");
    assert_eq!(bytes, text.as_bytes());
    assert_eq!(value.bytes(), text.len());
    assert_eq!(wide, text.encode_utf16().collect::<Vec<_>>());
}

#[test]
fn test_integer_decode_rejects_out_of_range() {
    let conn = common::memory_db();
    let mut stmt = conn
        .prepare("SELECT 300, 5000000000, -1, 4294967295")
        .expect("prepare");
    stmt.step().expect("step");
    assert!(matches!(stmt.column::<u8>(0), Err(DbError::Conversion(_))));
    assert_eq!(stmt.column::<i16>(0).expect("i16"), 300);
    assert!(matches!(stmt.column::<i32>(1), Err(DbError::Conversion(_))));
    assert!(matches!(stmt.column::<u32>(1), Err(DbError::Conversion(_))));
    assert_eq!(stmt.column::<i64>(1).expect("i64"), 5_000_000_000);
    assert!(matches!(stmt.column::<u16>(2), Err(DbError::Conversion(_))));
    assert_eq!(stmt.column::<i8>(2).expect("i8"), -1);
    assert_eq!(stmt.column::<u32>(3).expect("u32"), u32::MAX);
    assert!(stmt.column::<bool>(1).expect("bool"));
}

#[test]
fn test_named_parameters() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT :a - :b").expect("prepare");
    assert_eq!(stmt.parameter_count().expect("count"), 2);
    assert_eq!(stmt.parameter_index(":b").expect("index"), Some(2));
    assert_eq!(stmt.parameter_name(1).expect("name").as_deref(), Some(":a"));
    stmt.bind_named(":a", &10_i64).expect("bind a");
    stmt.bind_named(":b", &3_i64).expect("bind b");
    stmt.step().expect("step");
    assert_eq!(stmt.column::<i64>(0).expect("column"), 7);
}

#[test]
fn test_bind_unknown_name_fails() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT :a").expect("prepare");
    let err = stmt.bind_named(":zzz", &1_i64).expect_err("unknown name");
    assert!(matches!(err, DbError::Bind { .. }), "{err:?}");
    assert_eq!(stmt.state(), StreamState::Failed);
}

// ── Columns ─────────────────────────────────────────────────────────────

#[test]
fn test_column_access_errors() {
    let conn = common::memory_db();
    let mut stmt = conn.prepare("SELECT 1").expect("prepare");
    assert_eq!(stmt.column::<i64>(0).expect_err("no row"), DbError::NoRow);
    stmt.step().expect("step");
    assert_eq!(
        stmt.column::<i64>(3).expect_err("out of range"),
        DbError::ColumnIndex { index: 3, count: 1 }
    );
}

#[test]
fn test_statement_metadata() {
    let conn = common::memory_db();
    conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
        .expect("create table");
    let mut stmt = conn
        .prepare("SELECT id AS ident, name FROM t WHERE id > ?1")
        .expect("prepare");
    assert_eq!(stmt.column_count().expect("count"), 2);
    assert_eq!(stmt.column_names().expect("names"), vec!["ident", "name"]);
    assert_eq!(stmt.column_decltype(1).expect("decltype").as_deref(), Some("TEXT"));
    assert!(stmt.readonly().expect("readonly"));
    stmt.bind(1, &5_i64).expect("bind");
    assert_eq!(
        stmt.expanded_sql().expect("expanded").as_deref(),
        Some("SELECT id AS ident, name FROM t WHERE id > 5")
    );
    assert_eq!(stmt.sql().expect("sql"), "SELECT id AS ident, name FROM t WHERE id > ?1");
    stmt.run().expect("run");
    assert!(!stmt.is_busy().expect("busy"));
    assert!(stmt.status(StatementStatus::VmStep, false).expect("status") > 0);
}

// ── Rows ────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct Person {
    id: i64,
    name: String,
}

impl FromRow for Person {
    fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self> {
        Ok(Self {
            id: cursor.next()?,
            name: cursor.next()?,
        })
    }
}

fn people_db() -> sqlitex::Connection {
    let conn = common::memory_db();
    conn.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO people VALUES (1, 'ana'), (2, 'bo'), (3, 'cy');",
    )
    .expect("create fixture");
    conn
}

#[test]
fn test_rows_decode_structs() {
    let conn = people_db();
    let mut stmt = conn.prepare("SELECT id, name FROM people ORDER BY id").expect("prepare");
    let people = stmt.rows::<Person>().collect::<DbResult<Vec<_>>>().expect("rows");
    assert_eq!(
        people,
        vec![
            Person { id: 1, name: "ana".into() },
            Person { id: 2, name: "bo".into() },
            Person { id: 3, name: "cy".into() },
        ]
    );
}

#[test]
fn test_rows_end_sentinel() {
    let conn = people_db();
    let mut stmt = conn.prepare("SELECT id FROM people").expect("prepare");
    let mut rows = stmt.rows::<i64>();
    assert_ne!(rows, Rows::end());
    assert_eq!(rows.by_ref().count(), 3);
    assert!(rows.is_end());
    assert_eq!(rows, Rows::end());
    assert!(rows.next().is_none());
}

#[test]
fn test_rows_on_exhausted_statement_is_empty() {
    let conn = people_db();
    let mut stmt = conn.prepare("SELECT id FROM people").expect("prepare");
    stmt.run().expect("run");
    assert_eq!(stmt.rows::<i64>(), Rows::end());
    assert!(stmt.rows::<i64>().is_end());
    assert_eq!(stmt.rows::<i64>().count(), 0);
    stmt.reset().expect("reset");
    assert_ne!(stmt.rows::<i64>(), Rows::end());
    assert_eq!(stmt.rows::<i64>().count(), 3);
    stmt.close();
    assert_eq!(stmt.rows::<i64>(), Rows::end());
}

#[test]
fn test_rows_stop_after_error() {
    let conn = people_db();
    let mut stmt = conn.prepare("SELECT id, name FROM people").expect("prepare");
    let mut rows = stmt.rows::<(i64, String, i64)>();
    let first = rows.next().expect("one item");
    assert!(matches!(first, Err(DbError::ColumnIndex { index: 2, count: 2 })));
    assert!(rows.next().is_none());
}

#[test]
fn test_rows_tuples_and_value_vectors() {
    let conn = people_db();
    let mut stmt = conn
        .prepare("SELECT id, name, NULL FROM people WHERE id = 2")
        .expect("prepare");
    let row = stmt.rows::<Vec<Value>>().next().expect("row").expect("decode");
    assert_eq!(row, vec![Value::Integer(2), Value::Text("bo".into()), Value::Null]);

    stmt.reset().expect("reset");
    let tuple = stmt
        .rows::<(i64, String, Option<String>)>()
        .next()
        .expect("row")
        .expect("decode");
    assert_eq!(tuple, (2, "bo".to_string(), None));
}

#[test]
fn test_statements_share_connection() {
    let conn = people_db();
    let mut insert = conn.prepare("INSERT INTO people (name) VALUES (?1)").expect("prepare");
    let mut count = conn.prepare("SELECT count(*) FROM people").expect("prepare");
    for name in ["dee", "eve"] {
        insert.reset().expect("reset");
        insert.bind(1, name).expect("bind");
        insert.run().expect("insert");
    }
    count.step().expect("step");
    assert_eq!(count.column::<i64>(0).expect("count"), 5);
}
