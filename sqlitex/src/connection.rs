//! Safe wrapper around a `SQLite` database connection.

use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backup::Backup;
use crate::blob::Blob;
use crate::collation::{self, Collation};
use crate::config::{Limit, OpenFlags, OpenOptions};
use crate::context::Args;
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;
use crate::function::{
    self, AggregateFunction, FnAggregate, FnScalar, FunctionFlags, ScalarFunction, WindowFunction,
};
use crate::hooks::Hooks;
use crate::row::FromRow;
use crate::statement::{PrepareFlags, Statement, StepResult};
use crate::transaction::{Transaction, TransactionBehavior};
use crate::value::{Encoding, ToSql, Value};
use crate::vtab::{self, ModuleKind, VirtualTable};

type BusyHandler = Box<dyn FnMut(u32) -> bool + Send>;

/// Declared properties of a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Declared type, `None` when the column has none.
    pub declared_type: Option<String>,
    /// Name of the default collation sequence.
    pub collation: Option<String>,
    /// `true` for a `NOT NULL` column.
    pub not_null: bool,
    /// `true` when the column is part of the primary key.
    pub primary_key: bool,
    /// `true` for an `AUTOINCREMENT` column.
    pub auto_increment: bool,
}

/// A `SQLite` database connection.
///
/// Closed when dropped. `Send` but not `Sync`: a connection may move between
/// threads but is used from one thread at a time. A default-constructed
/// connection is empty and every operation on it fails with
/// [`DbError::InvalidHandle`].
pub struct Connection {
    /// Raw `sqlite3*` handle. Null when empty or closed.
    db: *mut ffi::sqlite3,
    interrupt: Arc<Mutex<InterruptSlot>>,
    busy_handler: Option<Box<BusyHandler>>,
    pub(crate) hooks: Hooks,
}

// Safety: the handle is owned by this wrapper and every method takes `&self`
// or `&mut self`, so it is never used from two threads at once. Registered
// handlers are required to be `Send`.
unsafe impl Send for Connection {}

impl Default for Connection {
    fn default() -> Self {
        Self {
            db: std::ptr::null_mut(),
            interrupt: Arc::new(Mutex::new(InterruptSlot(std::ptr::null_mut()))),
            busy_handler: None,
            hooks: Hooks::default(),
        }
    }
}

impl Connection {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> DbResult<Self> {
        Self::open_with(path, &OpenOptions::new().flags(flags))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(":memory:", OpenFlags::default())
    }

    /// Opens a database configured by `options`.
    pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> DbResult<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| DbError::Conversion(format!("path is not valid UTF-8: {}", path.display())))?;
        let c_path = ffi::to_cstring(path_str)?;
        let c_vfs = options.vfs.as_deref().map(ffi::to_cstring).transpose()?;

        let mut db = std::ptr::null_mut();
        // Safety: both strings are nul-terminated; `db` receives the handle.
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                options.flags.bits(),
                c_vfs.as_ref().map_or(std::ptr::null(), |v| v.as_ptr()),
            )
        };
        if rc != ffi::SQLITE_OK {
            let err = if db.is_null() {
                DbError::from_code(Stage::Engine, rc, "unable to open database")
            } else {
                DbError::from_db(Stage::Engine, db, rc)
            };
            // Safety: SQLite may hand back a handle even on failure.
            unsafe { ffi::sqlite3_close_v2(db) };
            return Err(err);
        }
        // Safety: `db` is a freshly opened handle.
        unsafe { ffi::sqlite3_extended_result_codes(db, 1) };

        let mut conn = Self {
            db,
            interrupt: Arc::new(Mutex::new(InterruptSlot(db))),
            busy_handler: None,
            hooks: Hooks::default(),
        };
        if let Some(timeout) = options.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        if let Some(enabled) = options.foreign_keys {
            conn.set_foreign_keys(enabled)?;
        }
        tracing::debug!(path = path_str, "opened database connection");
        Ok(conn)
    }

    /// Raw handle, or [`DbError::InvalidHandle`] when empty.
    pub(crate) fn handle(&self) -> DbResult<*mut ffi::sqlite3> {
        if self.db.is_null() {
            Err(DbError::InvalidHandle("connection"))
        } else {
            Ok(self.db)
        }
    }

    /// `true` unless the connection is empty or closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.db.is_null()
    }

    /// Closes the connection. Closing twice is a no-op.
    ///
    /// Registered handlers are dropped by SQLite as part of closing.
    pub fn close(&mut self) -> DbResult<()> {
        if self.db.is_null() {
            return Ok(());
        }
        self.interrupt
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .0 = std::ptr::null_mut();
        let db = std::mem::replace(&mut self.db, std::ptr::null_mut());
        // Safety: closed exactly once; the handle is forgotten above.
        let rc = unsafe { ffi::sqlite3_close_v2(db) };
        self.busy_handler = None;
        self.hooks = Hooks::default();
        tracing::debug!("closed database connection");
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(DbError::from_code(Stage::Engine, rc, "failed to close connection"))
        }
    }

    // ── Executing SQL ───────────────────────────────────────────────────

    /// Executes one or more SQL statements separated by semicolons.
    ///
    /// No result rows are returned. Suitable for DDL, PRAGMAs, and
    /// multi-statement scripts.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let db = self.handle()?;
        let c_sql = ffi::to_cstring(sql)?;
        let mut errmsg: *mut c_char = std::ptr::null_mut();
        // Safety: `c_sql` is nul-terminated; SQLite allocates `errmsg`,
        // which is freed below.
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, std::ptr::null_mut(), &mut errmsg) };
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        // Safety: `errmsg` is null or was allocated by SQLite.
        let message = unsafe {
            let message = ffi::cstr_lossy(errmsg);
            ffi::sqlite3_free(errmsg.cast());
            message
        };
        let code = ffi::extended_errcode(db);
        let code = if code & ffi::PRIMARY_MASK == rc & ffi::PRIMARY_MASK { code } else { rc };
        Err(DbError::from_code(
            Stage::Step,
            code,
            message.unwrap_or_else(|| ffi::errmsg(db)),
        ))
    }

    /// Prepares a single SQL statement.
    pub fn prepare(&self, sql: &str) -> DbResult<Statement<'_>> {
        self.prepare_with_flags(sql, PrepareFlags::NONE)
    }

    /// Prepares a single SQL statement with `sqlite3_prepare_v3` flags.
    pub fn prepare_with_flags(&self, sql: &str, flags: PrepareFlags) -> DbResult<Statement<'_>> {
        Statement::prepare(self.handle()?, sql, flags)
    }

    /// Prepares and executes a single SQL statement with the given parameters.
    ///
    /// Returns the number of rows changed.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_values(params)?;
        stmt.run()?;
        self.changes()
    }

    /// Like [`execute`](Self::execute) with typed parameters.
    pub fn execute_typed(&self, sql: &str, params: &[&dyn ToSql]) -> DbResult<u64> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_all(params)?;
        stmt.run()?;
        self.changes()
    }

    /// Prepares and executes a statement, mapping exactly one result row.
    ///
    /// Returns [`DbError::NoRow`] if no row is returned.
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        self.query_row_optional(sql, params, mapper)?
            .ok_or(DbError::NoRow)
    }

    /// Like [`query_row`](Self::query_row) but returns `Ok(None)` when no row
    /// is returned.
    pub fn query_row_optional<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> DbResult<T>,
    ) -> DbResult<Option<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_values(params)?;
        match stmt.step()? {
            StepResult::Row => mapper(&stmt).map(Some),
            StepResult::Done => Ok(None),
        }
    }

    /// Prepares and executes a query, decoding every row as `T`.
    pub fn query_map<T: FromRow>(&self, sql: &str, params: &[Value]) -> DbResult<Vec<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_values(params)?;
        let rows = stmt.rows::<T>().collect();
        rows
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Begins a deferred transaction.
    pub fn transaction(&self) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, TransactionBehavior::Deferred)
    }

    /// Begins an immediate transaction (acquires a RESERVED lock right away).
    pub fn transaction_immediate(&self) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, TransactionBehavior::Immediate)
    }

    /// Begins an exclusive transaction.
    pub fn transaction_exclusive(&self) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, TransactionBehavior::Exclusive)
    }

    // ── State ───────────────────────────────────────────────────────────

    /// Returns the rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> DbResult<i64> {
        let db = self.handle()?;
        // Safety: `db` is live.
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Overrides the value [`Connection::last_insert_rowid`] reports.
    pub fn set_last_insert_rowid(&self, rowid: i64) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        unsafe { ffi::sqlite3_set_last_insert_rowid(db, rowid) };
        Ok(())
    }

    /// Returns the number of rows changed by the most recent statement.
    pub fn changes(&self) -> DbResult<u64> {
        let db = self.handle()?;
        // Safety: `db` is live.
        let n = unsafe { ffi::sqlite3_changes64(db) };
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Rows changed since the connection was opened.
    pub fn total_changes(&self) -> DbResult<u64> {
        let db = self.handle()?;
        // Safety: `db` is live.
        let n = unsafe { ffi::sqlite3_total_changes64(db) };
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// `true` outside an explicit transaction.
    pub fn is_autocommit(&self) -> DbResult<bool> {
        let db = self.handle()?;
        // Safety: `db` is live.
        Ok(unsafe { ffi::sqlite3_get_autocommit(db) } != 0)
    }

    /// `true` if the attached database `schema` is read-only.
    pub fn is_readonly(&self, schema: &str) -> DbResult<bool> {
        let db = self.handle()?;
        let c_schema = ffi::to_cstring(schema)?;
        // Safety: `db` is live and `c_schema` nul-terminated.
        match unsafe { ffi::sqlite3_db_readonly(db, c_schema.as_ptr()) } {
            -1 => Err(DbError::from_code(
                Stage::Engine,
                ffi::SQLITE_ERROR,
                format!("no attached database named {schema}"),
            )),
            n => Ok(n != 0),
        }
    }

    /// File backing the attached database `schema`; `None` for temporary
    /// and in-memory databases.
    pub fn filename(&self, schema: &str) -> DbResult<Option<String>> {
        let db = self.handle()?;
        let c_schema = ffi::to_cstring(schema)?;
        // Safety: the returned name is owned by the connection.
        let name = unsafe { ffi::cstr_lossy(ffi::sqlite3_db_filename(db, c_schema.as_ptr())) };
        Ok(name.filter(|n| !n.is_empty()))
    }

    /// Declared properties of `table.column`. With no `schema`, every
    /// attached database is searched.
    pub fn column_metadata(
        &self,
        schema: Option<&str>,
        table: &str,
        column: &str,
    ) -> DbResult<ColumnMetadata> {
        let db = self.handle()?;
        let c_schema = schema.map(ffi::to_cstring).transpose()?;
        let c_table = ffi::to_cstring(table)?;
        let c_column = ffi::to_cstring(column)?;
        let mut declared_type: *const c_char = std::ptr::null();
        let mut collation: *const c_char = std::ptr::null();
        let (mut not_null, mut primary_key, mut auto_increment) = (0, 0, 0);
        // Safety: the strings are nul-terminated and every out-pointer is valid.
        let rc = unsafe {
            ffi::sqlite3_table_column_metadata(
                db,
                c_schema.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
                c_table.as_ptr(),
                c_column.as_ptr(),
                &mut declared_type,
                &mut collation,
                &mut not_null,
                &mut primary_key,
                &mut auto_increment,
            )
        };
        check(Stage::Engine, db, rc)?;
        // Safety: both strings are owned by the connection until the next call.
        let (declared_type, collation) =
            unsafe { (ffi::cstr_lossy(declared_type), ffi::cstr_lossy(collation)) };
        Ok(ColumnMetadata {
            declared_type,
            collation,
            not_null: not_null != 0,
            primary_key: primary_key != 0,
            auto_increment: auto_increment != 0,
        })
    }

    // ── Busy handling and interrupts ────────────────────────────────────

    /// Retries for up to `timeout` when a table is locked. Replaces any busy
    /// handler.
    pub fn busy_timeout(&mut self, timeout: Duration) -> DbResult<()> {
        let db = self.handle()?;
        let ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        // Safety: `db` is live.
        check(Stage::Engine, db, unsafe { ffi::sqlite3_busy_timeout(db, ms) })?;
        self.busy_handler = None;
        Ok(())
    }

    /// Installs `handler`, called with the retry count while a lock is held.
    /// Returning `false` gives up with a busy error. Replaces any timeout.
    pub fn busy_handler<F>(&mut self, handler: F) -> DbResult<()>
    where
        F: FnMut(u32) -> bool + Send + 'static,
    {
        let db = self.handle()?;
        let mut boxed: Box<BusyHandler> = Box::new(Box::new(handler));
        let arg: *mut BusyHandler = &mut *boxed;
        // Safety: the box is kept in `self` until replaced or closed.
        let rc = unsafe { ffi::sqlite3_busy_handler(db, Some(call_busy), arg.cast()) };
        check(Stage::Engine, db, rc)?;
        self.busy_handler = Some(boxed);
        Ok(())
    }

    /// Removes the busy handler and any timeout.
    pub fn clear_busy_handler(&mut self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        let rc = unsafe { ffi::sqlite3_busy_handler(db, None, std::ptr::null_mut()) };
        check(Stage::Engine, db, rc)?;
        self.busy_handler = None;
        Ok(())
    }

    /// A handle that can cancel running statements from another thread.
    pub fn interrupt_handle(&self) -> DbResult<InterruptHandle> {
        self.handle()?;
        Ok(InterruptHandle {
            slot: Arc::clone(&self.interrupt),
        })
    }

    // ── Limits and configuration ────────────────────────────────────────

    /// Current value of `limit`.
    pub fn limit(&self, limit: Limit) -> DbResult<i32> {
        let db = self.handle()?;
        // Safety: `db` is live; -1 queries without changing.
        Ok(unsafe { ffi::sqlite3_limit(db, limit.as_raw(), -1) })
    }

    /// Sets `limit`, returning the previous value.
    pub fn set_limit(&self, limit: Limit, value: i32) -> DbResult<i32> {
        let db = self.handle()?;
        // Safety: `db` is live.
        Ok(unsafe { ffi::sqlite3_limit(db, limit.as_raw(), value.max(0)) })
    }

    /// Enables or disables foreign key enforcement.
    pub fn set_foreign_keys(&self, enabled: bool) -> DbResult<bool> {
        self.db_config(ffi::SQLITE_DBCONFIG_ENABLE_FKEY, enabled)
    }

    /// Enables or disables triggers.
    pub fn set_triggers(&self, enabled: bool) -> DbResult<bool> {
        self.db_config(ffi::SQLITE_DBCONFIG_ENABLE_TRIGGER, enabled)
    }

    fn db_config(&self, op: c_int, enabled: bool) -> DbResult<bool> {
        let db = self.handle()?;
        let mut current: c_int = 0;
        // Safety: these options take an int and an int out-pointer.
        let rc = unsafe { ffi::sqlite3_db_config(db, op, c_int::from(enabled), &mut current as *mut c_int) };
        check(Stage::Engine, db, rc)?;
        Ok(current != 0)
    }

    /// Turns extended result codes on or off. They are on for every
    /// connection this crate opens.
    pub fn set_extended_result_codes(&self, enabled: bool) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        check(Stage::Engine, db, unsafe {
            ffi::sqlite3_extended_result_codes(db, c_int::from(enabled))
        })
    }

    /// Writes dirty pages of open write transactions to disk.
    pub fn cache_flush(&self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        check(Stage::Engine, db, unsafe { ffi::sqlite3_db_cacheflush(db) })
    }

    /// Frees as much cache memory as possible.
    pub fn release_memory(&self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        check(Stage::Engine, db, unsafe { ffi::sqlite3_db_release_memory(db) })
    }

    /// Runs `PRAGMA optimize`.
    pub fn optimize(&self) -> DbResult<()> {
        self.execute_batch("PRAGMA optimize")
    }

    // ── Extensions ──────────────────────────────────────────────────────

    /// Registers a scalar function. `n_args` of -1 accepts any arity.
    ///
    /// Replaces (and drops) a function with the same name and arity.
    pub fn register_scalar_function<S: ScalarFunction>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        handler: S,
    ) -> DbResult<()> {
        function::register_scalar(self.handle()?, name, n_args, flags, handler)
    }

    /// Registers a closure as a scalar function.
    pub fn create_scalar_function<F, R>(&self, name: &str, n_args: i32, flags: FunctionFlags, f: F) -> DbResult<()>
    where
        F: Fn(&Args<'_>) -> DbResult<R> + Send + 'static,
        R: ToSql + 'static,
    {
        self.register_scalar_function(name, n_args, flags, FnScalar::new(f))
    }

    /// Registers an aggregate function.
    pub fn register_aggregate_function<A: AggregateFunction>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        handler: A,
    ) -> DbResult<()> {
        function::register_aggregate(self.handle()?, name, n_args, flags, handler)
    }

    /// Registers an aggregate built from closures.
    pub fn create_aggregate_function<S, I, T, Fin, R>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        init: I,
        step: T,
        finalize: Fin,
    ) -> DbResult<()>
    where
        S: 'static,
        I: Fn() -> S + Send + 'static,
        T: Fn(&mut S, &Args<'_>) -> DbResult<()> + Send + 'static,
        Fin: Fn(Option<S>) -> DbResult<R> + Send + 'static,
        R: ToSql + 'static,
    {
        self.register_aggregate_function(name, n_args, flags, FnAggregate::new(init, step, finalize))
    }

    /// Registers an aggregate window function.
    pub fn register_window_function<W: WindowFunction>(
        &self,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        handler: W,
    ) -> DbResult<()> {
        function::register_window(self.handle()?, name, n_args, flags, handler)
    }

    /// Removes the function `name` registered with `n_args` arguments and
    /// argument encoding `encoding`.
    pub fn remove_function(&self, name: &str, n_args: i32, encoding: Encoding) -> DbResult<()> {
        function::remove(self.handle()?, name, n_args, encoding)
    }

    /// Registers a collating sequence. Closures `Fn(&str, &str) -> Ordering`
    /// are accepted directly.
    pub fn register_collation<C: Collation>(&self, name: &str, collation: C) -> DbResult<()> {
        collation::register(self.handle()?, name, collation)
    }

    /// Removes the collating sequence `name`.
    pub fn remove_collation(&self, name: &str) -> DbResult<()> {
        collation::remove(self.handle()?, name)
    }

    /// Registers a virtual table module.
    pub fn register_virtual_table<T: VirtualTable>(&self, name: &str, kind: ModuleKind, aux: T::Aux) -> DbResult<()> {
        vtab::register::<T>(self.handle()?, name, kind, aux)
    }

    // ── Resources ───────────────────────────────────────────────────────

    /// Starts an online backup of this connection's `main` database into
    /// `destination`'s `main` database.
    pub fn backup<'a>(&'a self, destination: &'a Connection) -> DbResult<Backup<'a, 'a>> {
        Backup::new(self, "main", destination, "main")
    }

    /// Opens an incremental blob handle on `table.column` of row `rowid`.
    pub fn blob_open(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        rowid: i64,
        read_only: bool,
    ) -> DbResult<Blob<'_>> {
        Blob::open(self, schema, table, column, rowid, read_only)
    }

    /// Records the current state of the WAL-mode database `schema`.
    #[cfg(feature = "snapshot")]
    pub fn snapshot(&self, schema: &str) -> DbResult<crate::snapshot::Snapshot> {
        crate::snapshot::Snapshot::get(self, schema)
    }

    /// Starts the read transaction of `schema` at `snapshot`.
    #[cfg(feature = "snapshot")]
    pub fn snapshot_open(&self, schema: &str, snapshot: &crate::snapshot::Snapshot) -> DbResult<()> {
        snapshot.open(self, schema)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close database connection");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

unsafe extern "C" fn call_busy(arg: *mut c_void, count: c_int) -> c_int {
    let handler = &mut *arg.cast::<BusyHandler>();
    let retry = catch_unwind(AssertUnwindSafe(|| handler(u32::try_from(count).unwrap_or(0))));
    c_int::from(retry.unwrap_or(false))
}

struct InterruptSlot(*mut ffi::sqlite3);

// Safety: the pointer is only dereferenced by `sqlite3_interrupt`, which is
// safe to call from any thread while the connection is open, and the slot is
// cleared under the lock before the connection closes.
unsafe impl Send for InterruptSlot {}

/// Cancels statements running on a connection, from any thread.
///
/// Becomes a no-op once the connection is closed.
#[derive(Clone)]
pub struct InterruptHandle {
    slot: Arc<Mutex<InterruptSlot>>,
}

impl InterruptHandle {
    /// Makes the statement running on the connection fail with
    /// `SQLITE_INTERRUPT` at its next check.
    pub fn interrupt(&self) {
        let slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !slot.0.is_null() {
            // Safety: the connection is open while the slot is non-null.
            unsafe { ffi::sqlite3_interrupt(slot.0) };
        }
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle").finish_non_exhaustive()
    }
}
