//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use sqlitex::Connection;

/// Installs a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// An in-memory connection with tracing enabled.
pub fn memory_db() -> Connection {
    init_tracing();
    Connection::open_in_memory().expect("open in-memory db")
}

/// An in-memory connection holding `t(c TEXT)` with rows `a`, `b`, `c`.
pub fn letters_db() -> Connection {
    let conn = memory_db();
    conn.execute_batch("CREATE TABLE t (c TEXT); INSERT INTO t VALUES ('b'), ('a'), ('c');")
        .expect("create fixture");
    conn
}
