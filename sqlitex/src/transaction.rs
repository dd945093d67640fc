//! RAII transaction guard.

use crate::connection::Connection;
use crate::error::DbResult;
use crate::statement::Statement;
use crate::value::Value;

/// Locking behaviour of `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionBehavior {
    /// `BEGIN DEFERRED` (the default).
    #[default]
    Deferred,
    /// `BEGIN IMMEDIATE`: takes the write lock up front.
    Immediate,
    /// `BEGIN EXCLUSIVE`.
    Exclusive,
}

impl TransactionBehavior {
    const fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// An open transaction. Rolls back on drop unless committed.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    finished: bool,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn begin(conn: &'conn Connection, behavior: TransactionBehavior) -> DbResult<Self> {
        conn.execute_batch(behavior.begin_sql())?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> DbResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Rolls the transaction back now instead of on drop.
    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")
    }

    /// The connection this transaction runs on.
    #[must_use]
    pub const fn connection(&self) -> &'conn Connection {
        self.conn
    }

    // ── Delegated Connection methods ────────────────────────────────────

    /// See [`Connection::execute_batch`].
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql)
    }

    /// See [`Connection::execute`].
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.conn.execute(sql, params)
    }

    /// See [`Connection::query_row`].
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        self.conn.query_row(sql, params, mapper)
    }

    /// See [`Connection::query_row_optional`].
    pub fn query_row_optional<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<Option<T>> {
        self.conn.query_row_optional(sql, params, mapper)
    }

    /// See [`Connection::prepare`].
    pub fn prepare(&self, sql: &str) -> DbResult<Statement<'conn>> {
        self.conn.prepare(sql)
    }

    /// See [`Connection::last_insert_rowid`].
    pub fn last_insert_rowid(&self) -> DbResult<i64> {
        self.conn.last_insert_rowid()
    }

    /// See [`Connection::changes`].
    pub fn changes(&self) -> DbResult<u64> {
        self.conn.changes()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "failed to roll back transaction");
            }
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
