//! Prepared statements and the row-stream state machine.
//!
//! A [`Statement`] moves between the states of [`StreamState`]:
//!
//! ```text
//!          step: row        step: done
//!   Idle ───────────▶ Row ────────────▶ Exhausted
//!    ▲ ▲               │                    │
//!    │ └── reset ──────┘◀──── reset ────────┘
//!    │          step/bind error
//!    └── reset ── Failed ◀───────── (Idle | Row)
//! ```
//!
//! `close()` moves any state to `Closed`, after which every call fails with
//! [`DbError::UseAfterClose`].

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_uchar, c_uint};

use crate::connection::Connection;
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;
use crate::row::{FromRow, Rows};
use crate::value::{
    AnyValue, Encoded, Encoding, FromSql, Pointer, ToSql, Value, ValueRef, ValueType,
};

/// Result of a single `sqlite3_step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A result row is available (`SQLITE_ROW`).
    Row,
    /// The statement has finished executing (`SQLITE_DONE`).
    Done,
}

/// Where a statement is in its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Prepared or reset; the next step starts a new execution.
    Idle,
    /// Positioned on a row; columns are readable.
    Row,
    /// All rows consumed. Stepping again returns [`StepResult::Done`].
    Exhausted,
    /// A step or bind failed. Only `reset()` or `close()` are accepted.
    Failed,
    /// Finalized.
    Closed,
}

/// Flags for [`Connection::prepare_with_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareFlags(u32);

impl PrepareFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The statement will be retained and reused many times.
    pub const PERSISTENT: Self = Self(0x01);
    /// Fail to prepare statements that use virtual tables.
    pub const NO_VTAB: Self = Self(0x04);

    const KNOWN: u32 = Self::PERSISTENT.0 | 0x02 | Self::NO_VTAB.0;

    /// Wraps raw `SQLITE_PREPARE_*` bits. Unknown bits are rejected at
    /// prepare time.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for PrepareFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Counters readable through [`Statement::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatementStatus {
    /// Full table scan steps.
    FullscanStep = 1,
    /// Sort operations.
    Sort = 2,
    /// Rows inserted into automatic indexes.
    AutoIndex = 3,
    /// Virtual machine steps.
    VmStep = 4,
    /// Times the statement was re-prepared.
    Reprepare = 5,
    /// Completed runs.
    Run = 6,
    /// Bloom filter misses.
    FilterMiss = 7,
    /// Bloom filter hits.
    FilterHit = 8,
    /// Heap bytes used by the statement.
    MemUsed = 99,
}

/// Owned copy of a binding recorded while the statement was running.
enum Deferred {
    Bind(c_int, OwnedValue),
    Clear,
}

enum OwnedValue {
    Null,
    Int(i32),
    Int64(i64),
    Double(f64),
    Text(String),
    Text16(Vec<u16>),
    EncodedText(Vec<u8>, Encoding),
    Blob(Vec<u8>),
    ZeroBlob(u64),
    Pointer(Pointer),
    Value(AnyValue),
}

impl OwnedValue {
    fn from_encoded(value: &Encoded<'_>) -> DbResult<Self> {
        Ok(match *value {
            Encoded::Null => Self::Null,
            Encoded::Int(v) => Self::Int(v),
            Encoded::Int64(v) => Self::Int64(v),
            Encoded::Double(v) => Self::Double(v),
            Encoded::Text(s) => Self::Text(s.to_owned()),
            Encoded::Text16(u) => Self::Text16(u.to_vec()),
            Encoded::EncodedText { bytes, encoding } => Self::EncodedText(bytes.to_vec(), encoding),
            Encoded::Blob(b) => Self::Blob(b.to_vec()),
            Encoded::ZeroBlob(n) => Self::ZeroBlob(n),
            Encoded::Pointer(p) => Self::Pointer(p),
            Encoded::Value(v) => Self::Value(v.try_clone()?),
        })
    }

    fn as_encoded(&self) -> Encoded<'_> {
        match self {
            Self::Null => Encoded::Null,
            Self::Int(v) => Encoded::Int(*v),
            Self::Int64(v) => Encoded::Int64(*v),
            Self::Double(v) => Encoded::Double(*v),
            Self::Text(s) => Encoded::Text(s),
            Self::Text16(u) => Encoded::Text16(u),
            Self::EncodedText(bytes, encoding) => Encoded::EncodedText {
                bytes,
                encoding: *encoding,
            },
            Self::Blob(b) => Encoded::Blob(b),
            Self::ZeroBlob(n) => Encoded::ZeroBlob(*n),
            Self::Pointer(p) => Encoded::Pointer(*p),
            Self::Value(v) => Encoded::Value(v),
        }
    }
}

/// A prepared `SQLite` statement.
///
/// Created via [`Connection::prepare`]. Tied to the lifetime of the
/// connection that created it. Finalized when dropped.
pub struct Statement<'conn> {
    /// Raw `sqlite3_stmt*` handle. Null once closed.
    stmt: *mut ffi::sqlite3_stmt,
    /// Owning `sqlite3*` handle, kept for error messages.
    db: *mut ffi::sqlite3,
    state: StreamState,
    deferred: Vec<Deferred>,
    _conn: PhantomData<&'conn Connection>,
}

impl<'conn> Statement<'conn> {
    /// Compiles exactly one statement from `sql`.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str, flags: PrepareFlags) -> DbResult<Self> {
        if flags.0 & !PrepareFlags::KNOWN != 0 {
            return Err(DbError::from_code(
                Stage::Compile,
                ffi::SQLITE_MISUSE,
                format!("unsupported prepare flags {:#x}", flags.0),
            ));
        }
        let c_sql = ffi::to_cstring(sql)?;
        let (stmt, tail) = compile(db, c_sql.as_ptr(), flags)?;
        if stmt.is_null() {
            return Err(DbError::from_code(
                Stage::Compile,
                ffi::SQLITE_MISUSE,
                "SQL contains no statement",
            ));
        }
        // Anything after the first statement must be whitespace or comments.
        // Safety: `tail` points into `c_sql`, which is still alive.
        if !tail.is_null() && unsafe { *tail } != 0 {
            match compile(db, tail, flags) {
                Ok((next, _)) if next.is_null() => {}
                Ok((next, _)) => {
                    // Safety: both handles came from a successful prepare.
                    unsafe {
                        ffi::sqlite3_finalize(next);
                        ffi::sqlite3_finalize(stmt);
                    }
                    return Err(DbError::from_code(
                        Stage::Compile,
                        ffi::SQLITE_MISUSE,
                        "multiple statements provided; prepare them one at a time",
                    ));
                }
                Err(e) => {
                    // Safety: `stmt` came from a successful prepare.
                    unsafe { ffi::sqlite3_finalize(stmt) };
                    return Err(e);
                }
            }
        }
        tracing::trace!(sql, "prepared statement");
        Ok(Self {
            stmt,
            db,
            state: StreamState::Idle,
            deferred: Vec::new(),
            _conn: PhantomData,
        })
    }

    fn live(&self) -> DbResult<*mut ffi::sqlite3_stmt> {
        if self.stmt.is_null() {
            Err(DbError::UseAfterClose("statement"))
        } else {
            Ok(self.stmt)
        }
    }

    /// Current stream state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    // ── Binding ─────────────────────────────────────────────────────────

    /// Binds `value` to parameter `index` (1-based).
    ///
    /// While the statement is running or exhausted, the binding is kept and
    /// applied by the next [`reset`](Self::reset).
    pub fn bind<T: ToSql + ?Sized>(&mut self, index: usize, value: &T) -> DbResult<()> {
        let stmt = self.live()?;
        self.reject_failed(Stage::Bind)?;
        let result = self.try_bind(stmt, index, value);
        if result.is_err() {
            self.state = StreamState::Failed;
        }
        result
    }

    fn try_bind<T: ToSql + ?Sized>(
        &mut self,
        stmt: *mut ffi::sqlite3_stmt,
        index: usize,
        value: &T,
    ) -> DbResult<()> {
        let count = self.raw_parameter_count(stmt);
        let slot = match c_int::try_from(index) {
            Ok(i) if i >= 1 && i <= count => i,
            _ => {
                return Err(DbError::from_code(
                    Stage::Bind,
                    ffi::SQLITE_RANGE,
                    format!("parameter index {index} out of range 1..={count}"),
                ))
            }
        };
        let encoded = value.to_sql()?;
        if self.state == StreamState::Idle {
            // Safety: `stmt` is live and `slot` is in range.
            let rc = unsafe { bind_encoded(stmt, slot, &encoded) };
            check(Stage::Bind, self.db, rc)
        } else {
            let owned = OwnedValue::from_encoded(&encoded)?;
            self.deferred.push(Deferred::Bind(slot, owned));
            Ok(())
        }
    }

    /// Binds `value` to the parameter called `name` (including its prefix,
    /// e.g. `":id"`).
    pub fn bind_named<T: ToSql + ?Sized>(&mut self, name: &str, value: &T) -> DbResult<()> {
        let stmt = self.live()?;
        self.reject_failed(Stage::Bind)?;
        if let Some(index) = lookup_parameter(stmt, name)? {
            self.bind(index, value)
        } else {
            self.state = StreamState::Failed;
            Err(DbError::from_code(
                Stage::Bind,
                ffi::SQLITE_RANGE,
                format!("no parameter named {name}"),
            ))
        }
    }

    /// Binds each value to the parameter at its position (1-based).
    pub fn bind_all(&mut self, values: &[&dyn ToSql]) -> DbResult<()> {
        for (i, value) in values.iter().enumerate() {
            self.bind(i + 1, *value)?;
        }
        Ok(())
    }

    /// Binds a slice of [`Value`]s to the statement parameters (1-indexed).
    pub fn bind_values(&mut self, values: &[Value]) -> DbResult<()> {
        for (i, value) in values.iter().enumerate() {
            self.bind(i + 1, value)?;
        }
        Ok(())
    }

    /// Sets every parameter back to NULL.
    ///
    /// Deferred to the next [`reset`](Self::reset) unless idle.
    pub fn clear(&mut self) -> DbResult<()> {
        let stmt = self.live()?;
        self.reject_failed(Stage::Bind)?;
        if self.state == StreamState::Idle {
            // Safety: `stmt` is live.
            let rc = unsafe { ffi::sqlite3_clear_bindings(stmt) };
            check(Stage::Bind, self.db, rc)
        } else {
            self.deferred.push(Deferred::Clear);
            Ok(())
        }
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Executes a single step.
    pub fn step(&mut self) -> DbResult<StepResult> {
        let stmt = self.live()?;
        match self.state {
            StreamState::Exhausted => return Ok(StepResult::Done),
            StreamState::Failed => self.reject_failed(Stage::Step)?,
            _ => {}
        }
        // Safety: `stmt` is live.
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        match rc {
            ffi::SQLITE_ROW => {
                self.state = StreamState::Row;
                Ok(StepResult::Row)
            }
            ffi::SQLITE_DONE => {
                self.state = StreamState::Exhausted;
                Ok(StepResult::Done)
            }
            _ => {
                self.state = StreamState::Failed;
                Err(DbError::from_db(Stage::Step, self.db, rc))
            }
        }
    }

    /// Steps until done, ignoring any rows.
    pub fn run(&mut self) -> DbResult<()> {
        while self.step()? == StepResult::Row {}
        Ok(())
    }

    /// Rewinds to [`StreamState::Idle`], keeping the current bindings and
    /// applying any deferred ones.
    pub fn reset(&mut self) -> DbResult<()> {
        let stmt = self.live()?;
        // The return value repeats the error of a failed step, if any; that
        // error was already reported by `step`.
        // Safety: `stmt` is live.
        unsafe { ffi::sqlite3_reset(stmt) };
        self.state = StreamState::Idle;

        for deferred in std::mem::take(&mut self.deferred) {
            // Safety: `stmt` is live and idle; deferred slots were range-checked.
            let rc = unsafe {
                match &deferred {
                    Deferred::Bind(slot, value) => bind_encoded(stmt, *slot, &value.as_encoded()),
                    Deferred::Clear => ffi::sqlite3_clear_bindings(stmt),
                }
            };
            if let Err(e) = check(Stage::Bind, self.db, rc) {
                self.state = StreamState::Failed;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Finalizes the statement. Later calls fail with
    /// [`DbError::UseAfterClose`]; closing twice is a no-op.
    pub fn close(&mut self) {
        if !self.stmt.is_null() {
            // Safety: finalized exactly once, then the handle is forgotten.
            // The return code repeats the last step error and is ignored.
            unsafe { ffi::sqlite3_finalize(self.stmt) };
            self.stmt = std::ptr::null_mut();
        }
        self.deferred.clear();
        self.state = StreamState::Closed;
    }

    fn reject_failed(&self, stage: Stage) -> DbResult<()> {
        if self.state == StreamState::Failed {
            Err(DbError::from_code(
                stage,
                ffi::SQLITE_MISUSE,
                "statement failed; reset or close it first",
            ))
        } else {
            Ok(())
        }
    }

    // ── Columns ─────────────────────────────────────────────────────────

    /// Borrows column `index` (0-based) of the current row.
    ///
    /// The borrow ends before the statement can step or reset again.
    pub fn value_ref(&self, index: usize) -> DbResult<ValueRef<'_>> {
        let stmt = self.live()?;
        if self.state != StreamState::Row {
            return Err(DbError::NoRow);
        }
        let count = self.raw_column_count(stmt);
        match c_int::try_from(index) {
            Ok(i) if i < count => Ok(ValueRef::from_column(stmt, i)),
            _ => Err(DbError::ColumnIndex {
                index,
                count: usize::try_from(count).unwrap_or(0),
            }),
        }
    }

    /// Decodes column `index` (0-based) of the current row as `T`.
    pub fn column<T: FromSql>(&self, index: usize) -> DbResult<T> {
        T::from_sql(self.value_ref(index)?)
    }

    /// Storage class of column `index` in the current row.
    pub fn column_type(&self, index: usize) -> DbResult<ValueType> {
        self.value_ref(index).map(|v| v.value_type())
    }

    /// Number of result columns.
    pub fn column_count(&self) -> DbResult<usize> {
        let stmt = self.live()?;
        Ok(usize::try_from(self.raw_column_count(stmt)).unwrap_or(0))
    }

    /// Name of result column `index`.
    pub fn column_name(&self, index: usize) -> DbResult<String> {
        let (stmt, i) = self.column_slot(index)?;
        // Safety: `stmt` is live and `i` is in range.
        unsafe { ffi::cstr_lossy(ffi::sqlite3_column_name(stmt, i)) }.ok_or_else(|| {
            DbError::from_code(Stage::Engine, ffi::SQLITE_NOMEM, "column name unavailable")
        })
    }

    /// Declared type of result column `index`, if it maps to a table column.
    pub fn column_decltype(&self, index: usize) -> DbResult<Option<String>> {
        let (stmt, i) = self.column_slot(index)?;
        // Safety: `stmt` is live and `i` is in range.
        Ok(unsafe { ffi::cstr_lossy(ffi::sqlite3_column_decltype(stmt, i)) })
    }

    /// Resolves all result column names.
    pub fn column_names(&self) -> DbResult<Vec<String>> {
        (0..self.column_count()?).map(|i| self.column_name(i)).collect()
    }

    fn column_slot(&self, index: usize) -> DbResult<(*mut ffi::sqlite3_stmt, c_int)> {
        let stmt = self.live()?;
        let count = self.raw_column_count(stmt);
        match c_int::try_from(index) {
            Ok(i) if i < count => Ok((stmt, i)),
            _ => Err(DbError::ColumnIndex {
                index,
                count: usize::try_from(count).unwrap_or(0),
            }),
        }
    }

    // ── Parameters and metadata ─────────────────────────────────────────

    /// Number of parameters (the largest parameter index).
    pub fn parameter_count(&self) -> DbResult<usize> {
        let stmt = self.live()?;
        Ok(usize::try_from(self.raw_parameter_count(stmt)).unwrap_or(0))
    }

    /// Name of parameter `index` (1-based), `None` for anonymous `?`.
    pub fn parameter_name(&self, index: usize) -> DbResult<Option<String>> {
        let stmt = self.live()?;
        let Ok(i) = c_int::try_from(index) else {
            return Ok(None);
        };
        // Safety: out-of-range indexes return null.
        Ok(unsafe { ffi::cstr_lossy(ffi::sqlite3_bind_parameter_name(stmt, i)) })
    }

    /// Index of the parameter called `name`, if any.
    pub fn parameter_index(&self, name: &str) -> DbResult<Option<usize>> {
        lookup_parameter(self.live()?, name)
    }

    /// The SQL text the statement was prepared from.
    pub fn sql(&self) -> DbResult<String> {
        let stmt = self.live()?;
        // Safety: `stmt` is live.
        Ok(unsafe { ffi::cstr_lossy(ffi::sqlite3_sql(stmt)) }.unwrap_or_default())
    }

    /// The SQL text with current bindings substituted.
    pub fn expanded_sql(&self) -> DbResult<Option<String>> {
        let stmt = self.live()?;
        // Safety: the returned buffer is owned by us and freed with sqlite3_free.
        unsafe {
            let raw = ffi::sqlite3_expanded_sql(stmt);
            let text = ffi::cstr_lossy(raw);
            ffi::sqlite3_free(raw.cast());
            Ok(text)
        }
    }

    /// `true` if the statement makes no direct changes to the database.
    pub fn readonly(&self) -> DbResult<bool> {
        let stmt = self.live()?;
        // Safety: `stmt` is live.
        Ok(unsafe { ffi::sqlite3_stmt_readonly(stmt) } != 0)
    }

    /// `true` between a step that returned a row and the next reset.
    pub fn is_busy(&self) -> DbResult<bool> {
        let stmt = self.live()?;
        // Safety: `stmt` is live.
        Ok(unsafe { ffi::sqlite3_stmt_busy(stmt) } != 0)
    }

    /// Reads a performance counter, optionally resetting it.
    pub fn status(&self, counter: StatementStatus, reset: bool) -> DbResult<i32> {
        let stmt = self.live()?;
        // Safety: `stmt` is live; the counter ids are SQLite's.
        Ok(unsafe { ffi::sqlite3_stmt_status(stmt, counter as c_int, c_int::from(reset)) })
    }

    // ── Row streaming ───────────────────────────────────────────────────

    /// Streams the remaining rows, decoding each as `T`.
    pub fn rows<T: FromRow>(&mut self) -> Rows<'_, 'conn, T> {
        Rows::new(self)
    }

    /// Raw handle, null once closed.
    pub(crate) const fn as_raw(&self) -> *mut ffi::sqlite3_stmt {
        self.stmt
    }

    fn raw_column_count(&self, stmt: *mut ffi::sqlite3_stmt) -> c_int {
        debug_assert_eq!(stmt, self.stmt);
        // Safety: `stmt` is live.
        unsafe { ffi::sqlite3_column_count(stmt) }
    }

    fn raw_parameter_count(&self, stmt: *mut ffi::sqlite3_stmt) -> c_int {
        debug_assert_eq!(stmt, self.stmt);
        // Safety: `stmt` is live.
        unsafe { ffi::sqlite3_bind_parameter_count(stmt) }
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("state", &self.state)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

fn compile(
    db: *mut ffi::sqlite3,
    sql: *const c_char,
    flags: PrepareFlags,
) -> DbResult<(*mut ffi::sqlite3_stmt, *const c_char)> {
    let mut stmt = std::ptr::null_mut();
    let mut tail = std::ptr::null();
    // Safety: `sql` is nul-terminated; `db` is a live connection.
    let rc = unsafe {
        ffi::sqlite3_prepare_v3(db, sql, -1, flags.0 as c_uint, &mut stmt, &mut tail)
    };
    if rc != ffi::SQLITE_OK {
        return Err(DbError::from_db(Stage::Compile, db, rc));
    }
    Ok((stmt, tail))
}

fn lookup_parameter(stmt: *mut ffi::sqlite3_stmt, name: &str) -> DbResult<Option<usize>> {
    let c_name = ffi::to_cstring(name)?;
    // Safety: `stmt` is live and `c_name` is nul-terminated.
    let index = unsafe { ffi::sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
    Ok(usize::try_from(index).ok().filter(|i| *i > 0))
}

/// Applies one encoded value with the matching `sqlite3_bind_*` call.
///
/// # Safety
///
/// `stmt` must be live and idle, and `slot` a valid parameter index.
pub(crate) unsafe fn bind_encoded(stmt: *mut ffi::sqlite3_stmt, slot: c_int, value: &Encoded<'_>) -> c_int {
    match *value {
        Encoded::Null => ffi::sqlite3_bind_null(stmt, slot),
        Encoded::Int(v) => ffi::sqlite3_bind_int(stmt, slot, v),
        Encoded::Int64(v) => ffi::sqlite3_bind_int64(stmt, slot, v),
        Encoded::Double(v) => ffi::sqlite3_bind_double(stmt, slot, v),
        Encoded::Text(s) => ffi::sqlite3_bind_text64(
            stmt,
            slot,
            s.as_ptr().cast(),
            s.len() as u64,
            ffi::SQLITE_TRANSIENT(),
            ffi::SQLITE_UTF8 as c_uchar,
        ),
        Encoded::Text16(units) => match c_int::try_from(units.len() * 2) {
            Ok(n) => ffi::sqlite3_bind_text16(stmt, slot, units.as_ptr().cast(), n, ffi::SQLITE_TRANSIENT()),
            Err(_) => ffi::SQLITE_TOOBIG,
        },
        Encoded::EncodedText { bytes, encoding } => ffi::sqlite3_bind_text64(
            stmt,
            slot,
            bytes.as_ptr().cast(),
            bytes.len() as u64,
            ffi::SQLITE_TRANSIENT(),
            encoding.as_raw() as c_uchar,
        ),
        Encoded::Blob(b) => ffi::sqlite3_bind_blob64(
            stmt,
            slot,
            b.as_ptr().cast(),
            b.len() as u64,
            ffi::SQLITE_TRANSIENT(),
        ),
        Encoded::ZeroBlob(n) => ffi::sqlite3_bind_zeroblob64(stmt, slot, n),
        Encoded::Pointer(p) => ffi::sqlite3_bind_pointer(stmt, slot, p.as_ptr(), p.tag().as_ptr(), None),
        Encoded::Value(v) => ffi::sqlite3_bind_value(stmt, slot, v.as_raw()),
    }
}

