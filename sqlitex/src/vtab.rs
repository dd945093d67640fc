//! Virtual tables.
//!
//! A table implements [`VirtualTable`] and hands out cursors implementing
//! [`VirtualTableCursor`]. Both live in `#[repr(C)]` capsules that begin with
//! the engine's own `sqlite3_vtab` / `sqlite3_vtab_cursor` header, so the
//! pointer SQLite passes back to each slot can be cast straight to the
//! capsule.
//!
//! Ownership:
//!
//! * the module capsule (the `sqlite3_module` plus the module's aux data) is
//!   freed by the module destructor SQLite runs when the module is replaced
//!   or the connection closes;
//! * a table capsule lives from a successful `create`/`connect` until
//!   `disconnect`, or until a successful `destroy`. A failed `destroy` keeps
//!   the table alive;
//! * a cursor capsule lives from `open` until `close`, which always frees it.
//!
//! Errors from table and cursor slots are reported by setting the table's
//! `zErrMsg` (allocated with `sqlite3_mprintf`) and returning the error's
//! code. Panics are caught and reported as `SQLITE_ERROR`.

use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::{Args, Context};
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;
use crate::function::{panic_message, report};
use crate::value::Value;

/// The context a cursor writes a column value into.
pub type VTabContext<'a> = Context<'a>;

/// A stateless function overloading a global SQL function for one table.
pub type VTabFunction = fn(&Args<'_>) -> DbResult<Value>;

/// How a module can be used from SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleKind {
    /// Tables are created with `CREATE VIRTUAL TABLE`; `create` and
    /// `connect` are distinct.
    #[default]
    Regular,
    /// Also usable directly as a table named after the module.
    Eponymous,
    /// Usable only as a table named after the module.
    EponymousOnly,
}

/// The connection handed to `create` / `connect`.
pub struct VTabConnection<'a> {
    db: *mut ffi::sqlite3,
    _marker: PhantomData<&'a ()>,
}

impl VTabConnection<'_> {
    /// Lets `update` honour `ON CONFLICT` clauses.
    pub fn enable_constraint_support(&mut self) -> DbResult<()> {
        self.config(ffi::SQLITE_VTAB_CONSTRAINT_SUPPORT, Some(1))
    }

    /// Marks the table safe to use from triggers and views.
    pub fn set_innocuous(&mut self) -> DbResult<()> {
        self.config(ffi::SQLITE_VTAB_INNOCUOUS, None)
    }

    /// Forbids use of the table from triggers and views.
    pub fn set_direct_only(&mut self) -> DbResult<()> {
        self.config(ffi::SQLITE_VTAB_DIRECTONLY, None)
    }

    fn config(&mut self, op: c_int, arg: Option<c_int>) -> DbResult<()> {
        // Safety: only called from inside xCreate/xConnect, where
        // sqlite3_vtab_config is allowed.
        let rc = unsafe {
            match arg {
                Some(value) => ffi::sqlite3_vtab_config(self.db, op, value),
                None => ffi::sqlite3_vtab_config(self.db, op),
            }
        };
        check(Stage::Engine, self.db, rc)
    }
}

/// The kind of row change passed to [`VirtualTable::update`].
#[derive(Debug)]
pub enum UpdateOp<'a> {
    /// `DELETE` of the row with this rowid.
    Delete {
        /// Row to remove.
        rowid: i64,
    },
    /// `INSERT`; `rowid` is `None` when the table should choose one.
    Insert {
        /// Requested rowid.
        rowid: Option<i64>,
        /// New column values, in declaration order.
        values: Args<'a>,
    },
    /// `UPDATE` of the row `old_rowid`, possibly changing its rowid.
    Update {
        /// Rowid before the change.
        old_rowid: i64,
        /// Rowid after the change.
        new_rowid: i64,
        /// New column values, in declaration order.
        values: Args<'a>,
    },
}

/// A virtual table implementation.
///
/// Every slot except `connect`, `best_index` and `open` has a default.
pub trait VirtualTable: Sized + Send + 'static {
    /// Data shared by every table of the module.
    type Aux: Send + 'static;
    /// Cursor type returned by [`open`](Self::open).
    type Cursor: VirtualTableCursor;

    /// Connects to an existing table. Returns the `CREATE TABLE` statement
    /// describing its columns, and the table.
    ///
    /// `args` holds the module name, the schema name, the table name, and
    /// then the module arguments.
    fn connect(db: &mut VTabConnection<'_>, aux: &Self::Aux, args: &[&str]) -> DbResult<(String, Self)>;

    /// Creates a new table. Defaults to [`connect`](Self::connect).
    fn create(db: &mut VTabConnection<'_>, aux: &Self::Aux, args: &[&str]) -> DbResult<(String, Self)> {
        Self::connect(db, aux, args)
    }

    /// Chooses a query plan.
    fn best_index(&self, info: &mut IndexInfo<'_>) -> DbResult<()>;

    /// Opens a cursor.
    fn open(&mut self) -> DbResult<Self::Cursor>;

    /// Releases the table. The table is freed whatever this returns.
    fn disconnect(self) -> DbResult<()> {
        Ok(())
    }

    /// Drops the table's backing storage. On error the table stays alive.
    fn destroy(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// Applies an INSERT, UPDATE or DELETE. Returns the rowid of an
    /// inserted row; ignored for other operations.
    fn update(&mut self, op: &UpdateOp<'_>) -> DbResult<i64> {
        let _ = op;
        Err(DbError::from_code(Stage::Engine, ffi::SQLITE_READONLY, "virtual table is read-only"))
    }

    /// Starts a transaction.
    fn begin(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// First phase of a commit.
    fn sync(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// Commits the transaction.
    fn commit(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// Rolls the transaction back.
    fn rollback(&mut self) -> DbResult<()> {
        Ok(())
    }

    /// Opens savepoint `n`.
    fn savepoint(&mut self, n: i32) -> DbResult<()> {
        let _ = n;
        Ok(())
    }

    /// Releases savepoint `n`.
    fn release(&mut self, n: i32) -> DbResult<()> {
        let _ = n;
        Ok(())
    }

    /// Rolls back to savepoint `n`.
    fn rollback_to(&mut self, n: i32) -> DbResult<()> {
        let _ = n;
        Ok(())
    }

    /// The table is being renamed to `new_name`.
    fn rename(&mut self, new_name: &str) -> DbResult<()> {
        let _ = new_name;
        Ok(())
    }

    /// Overloads the global function `name` taking `n_args` arguments
    /// when its first argument is a column of this table.
    fn find_function(&self, n_args: i32, name: &str) -> Option<VTabFunction> {
        let _ = (n_args, name);
        None
    }
}

/// A cursor over a virtual table.
pub trait VirtualTableCursor: Sized + Send + 'static {
    /// Starts a scan using the plan chosen by `best_index`.
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &Args<'_>) -> DbResult<()>;

    /// Advances to the next row.
    fn next(&mut self) -> DbResult<()>;

    /// `true` once the scan has no current row.
    fn eof(&self) -> bool;

    /// Writes column `index` of the current row into `ctx`.
    fn column(&self, ctx: &VTabContext<'_>, index: usize) -> DbResult<()>;

    /// Rowid of the current row.
    fn rowid(&self) -> DbResult<i64>;

    /// Releases the cursor. The cursor is freed whatever this returns.
    fn close(self) -> DbResult<()> {
        Ok(())
    }
}

// ── Index planning ──────────────────────────────────────────────────────

/// Operator of a WHERE-clause constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `MATCH`
    Match,
    /// `LIKE`
    Like,
    /// `GLOB`
    Glob,
    /// `REGEXP`
    Regexp,
    /// `!=` / `<>`
    Ne,
    /// `IS NOT`
    IsNot,
    /// `IS NOT NULL`
    IsNotNull,
    /// `IS NULL`
    IsNull,
    /// `IS`
    Is,
    /// `LIMIT`
    Limit,
    /// `OFFSET`
    Offset,
    /// A function overloaded through `find_function`.
    Function(u8),
    /// Any operator this crate does not know.
    Other(u8),
}

impl From<u8> for ConstraintOp {
    fn from(op: u8) -> Self {
        match op {
            2 => Self::Eq,
            4 => Self::Gt,
            8 => Self::Le,
            16 => Self::Lt,
            32 => Self::Ge,
            64 => Self::Match,
            65 => Self::Like,
            66 => Self::Glob,
            67 => Self::Regexp,
            68 => Self::Ne,
            69 => Self::IsNot,
            70 => Self::IsNotNull,
            71 => Self::IsNull,
            72 => Self::Is,
            73 => Self::Limit,
            74 => Self::Offset,
            150..=255 => Self::Function(op),
            other => Self::Other(other),
        }
    }
}

/// One WHERE-clause term offered to `best_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConstraint {
    /// Constrained column; -1 for the rowid.
    pub column: i32,
    /// Operator.
    pub op: ConstraintOp,
    /// `false` when the term cannot be used by this plan.
    pub usable: bool,
}

/// One ORDER BY term offered to `best_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOrderBy {
    /// Ordered column.
    pub column: i32,
    /// Descending order.
    pub desc: bool,
}

/// Planner input and output for [`VirtualTable::best_index`].
pub struct IndexInfo<'a> {
    raw: &'a mut ffi::sqlite3_index_info,
}

impl IndexInfo<'_> {
    fn constraint_slice(&self) -> &[ffi::sqlite3_index_constraint] {
        // Safety: aConstraint holds nConstraint entries for this call.
        unsafe { raw_slice(self.raw.aConstraint, self.raw.nConstraint) }
    }

    /// The constraints of the query, in the order SQLite lists them.
    #[must_use]
    pub fn constraints(&self) -> Vec<IndexConstraint> {
        self.constraint_slice()
            .iter()
            .map(|c| IndexConstraint {
                column: c.iColumn,
                op: ConstraintOp::from(c.op),
                usable: c.usable != 0,
            })
            .collect()
    }

    /// The ORDER BY terms of the query.
    #[must_use]
    pub fn order_bys(&self) -> Vec<IndexOrderBy> {
        // Safety: aOrderBy holds nOrderBy entries for this call.
        unsafe { raw_slice(self.raw.aOrderBy, self.raw.nOrderBy) }
            .iter()
            .map(|o| IndexOrderBy {
                column: o.iColumn,
                desc: o.desc != 0,
            })
            .collect()
    }

    /// Passes constraint `constraint` to `filter` as argument
    /// `argv_index` (1-based), and tells SQLite whether it may skip
    /// re-checking it.
    pub fn use_constraint(&mut self, constraint: usize, argv_index: i32, omit: bool) -> DbResult<()> {
        let count = self.constraint_slice().len();
        if constraint >= count {
            return Err(DbError::ArgumentIndex {
                index: constraint,
                count,
            });
        }
        // Safety: aConstraintUsage parallels aConstraint; the index is checked.
        unsafe {
            let usage = &mut *self.raw.aConstraintUsage.add(constraint);
            usage.argvIndex = argv_index;
            usage.omit = u8::from(omit);
        }
        Ok(())
    }

    /// Collation of constraint `constraint`'s right-hand side.
    pub fn collation(&self, constraint: usize) -> DbResult<String> {
        let count = self.constraint_slice().len();
        let index = c_int::try_from(constraint)
            .ok()
            .filter(|_| constraint < count)
            .ok_or(DbError::ArgumentIndex {
                index: constraint,
                count,
            })?;
        let raw = std::ptr::from_ref::<ffi::sqlite3_index_info>(&*self.raw).cast_mut();
        // Safety: only valid inside xBestIndex, which is where IndexInfo lives.
        let name = unsafe { ffi::cstr_lossy(ffi::sqlite3_vtab_collation(raw, index)) };
        Ok(name.unwrap_or_else(|| "BINARY".to_string()))
    }

    /// Bit set of the columns the query reads; bit 63 covers every
    /// column from 63 on.
    #[must_use]
    pub fn columns_used(&self) -> u64 {
        self.raw.colUsed
    }

    /// Plan number passed to `filter`.
    pub fn set_idx_num(&mut self, idx_num: i32) {
        self.raw.idxNum = idx_num;
    }

    /// Plan string passed to `filter`.
    pub fn set_idx_str(&mut self, idx_str: &str) {
        if self.raw.needToFreeIdxStr != 0 {
            // Safety: allocated by an earlier call of this method.
            unsafe { ffi::sqlite3_free(self.raw.idxStr.cast()) };
        }
        self.raw.idxStr = ffi::mprintf(idx_str);
        self.raw.needToFreeIdxStr = c_int::from(!self.raw.idxStr.is_null());
    }

    /// Estimated cost of the plan.
    pub fn set_estimated_cost(&mut self, cost: f64) {
        self.raw.estimatedCost = cost;
    }

    /// Estimated number of rows the plan yields.
    pub fn set_estimated_rows(&mut self, rows: i64) {
        self.raw.estimatedRows = rows;
    }

    /// Declares that rows come out in the requested ORDER BY order.
    pub fn set_order_by_consumed(&mut self, consumed: bool) {
        self.raw.orderByConsumed = c_int::from(consumed);
    }

    /// Declares that the plan returns at most one row.
    pub fn set_unique_scan(&mut self) {
        self.raw.idxFlags |= ffi::SQLITE_INDEX_SCAN_UNIQUE;
    }
}

unsafe fn raw_slice<'a, T>(ptr: *const T, len: c_int) -> &'a [T] {
    match usize::try_from(len) {
        Ok(n) if n > 0 && !ptr.is_null() => std::slice::from_raw_parts(ptr, n),
        _ => &[],
    }
}

// ── Capsules ────────────────────────────────────────────────────────────

#[repr(C)]
struct TableCapsule<T> {
    base: ffi::sqlite3_vtab,
    table: T,
}

#[repr(C)]
struct CursorCapsule<C> {
    base: ffi::sqlite3_vtab_cursor,
    cursor: C,
}

struct ModuleCapsule<T: VirtualTable> {
    module: ffi::sqlite3_module,
    aux: T::Aux,
}

pub(crate) fn register<T: VirtualTable>(
    db: *mut ffi::sqlite3,
    name: &str,
    kind: ModuleKind,
    aux: T::Aux,
) -> DbResult<()> {
    let c_name = ffi::to_cstring(name)?;
    let capsule = Box::into_raw(Box::new(ModuleCapsule::<T> {
        module: module::<T>(kind),
        aux,
    }));
    // Safety: SQLite keeps `&capsule.module` and `capsule` until it runs
    // `drop_module::<T>`, which it also does when this call fails.
    let rc = unsafe {
        ffi::sqlite3_create_module_v2(
            db,
            c_name.as_ptr(),
            std::ptr::addr_of!((*capsule).module),
            capsule.cast(),
            Some(drop_module::<T>),
        )
    };
    check(Stage::Engine, db, rc)?;
    tracing::debug!(name, ?kind, "registered virtual table module");
    Ok(())
}

fn module<T: VirtualTable>(kind: ModuleKind) -> ffi::sqlite3_module {
    // Safety: every field is an integer or an optional function pointer,
    // for which all-zero is valid.
    let mut m: ffi::sqlite3_module = unsafe { std::mem::zeroed() };
    m.iVersion = 2;
    match kind {
        ModuleKind::Regular => {
            m.xCreate = Some(x_create::<T>);
            m.xConnect = Some(x_connect::<T>);
            m.xDestroy = Some(x_destroy::<T>);
        }
        ModuleKind::Eponymous => {
            m.xCreate = Some(x_connect::<T>);
            m.xConnect = Some(x_connect::<T>);
            m.xDestroy = Some(x_disconnect::<T>);
        }
        ModuleKind::EponymousOnly => {
            m.xCreate = None;
            m.xConnect = Some(x_connect::<T>);
            m.xDestroy = Some(x_disconnect::<T>);
        }
    }
    m.xBestIndex = Some(x_best_index::<T>);
    m.xDisconnect = Some(x_disconnect::<T>);
    m.xOpen = Some(x_open::<T>);
    m.xClose = Some(x_close::<T::Cursor>);
    m.xFilter = Some(x_filter::<T::Cursor>);
    m.xNext = Some(x_next::<T::Cursor>);
    m.xEof = Some(x_eof::<T::Cursor>);
    m.xColumn = Some(x_column::<T::Cursor>);
    m.xRowid = Some(x_rowid::<T::Cursor>);
    m.xUpdate = Some(x_update::<T>);
    m.xBegin = Some(x_begin::<T>);
    m.xSync = Some(x_sync::<T>);
    m.xCommit = Some(x_commit::<T>);
    m.xRollback = Some(x_rollback::<T>);
    m.xFindFunction = Some(x_find_function::<T>);
    m.xRename = Some(x_rename::<T>);
    m.xSavepoint = Some(x_savepoint::<T>);
    m.xRelease = Some(x_release::<T>);
    m.xRollbackTo = Some(x_rollback_to::<T>);
    m
}

unsafe extern "C" fn drop_module<T: VirtualTable>(capsule: *mut c_void) {
    if !capsule.is_null() {
        drop(Box::from_raw(capsule.cast::<ModuleCapsule<T>>()));
    }
}

// ── Error plumbing ──────────────────────────────────────────────────────

/// Replaces the table's error message with `message`.
unsafe fn set_vtab_error(vtab: *mut ffi::sqlite3_vtab, message: &str) {
    if vtab.is_null() {
        return;
    }
    if !(*vtab).zErrMsg.is_null() {
        ffi::sqlite3_free((*vtab).zErrMsg.cast());
    }
    (*vtab).zErrMsg = ffi::mprintf(message);
}

/// Maps a slot outcome to its return code, recording any error on `vtab`.
unsafe fn slot_code(vtab: *mut ffi::sqlite3_vtab, outcome: std::thread::Result<DbResult<()>>) -> c_int {
    match outcome {
        Ok(Ok(())) => ffi::SQLITE_OK,
        Ok(Err(e)) => {
            set_vtab_error(vtab, &e.to_string());
            e.callback_code()
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(%message, "panic in virtual table");
            set_vtab_error(vtab, &format!("panic in virtual table: {message}"));
            ffi::SQLITE_ERROR
        }
    }
}

unsafe fn table_call<T: VirtualTable>(
    vtab: *mut ffi::sqlite3_vtab,
    f: impl FnOnce(&mut T) -> DbResult<()>,
) -> c_int {
    let table = &mut (*vtab.cast::<TableCapsule<T>>()).table;
    let outcome = catch_unwind(AssertUnwindSafe(|| f(table)));
    slot_code(vtab, outcome)
}

unsafe fn cursor_call<C: VirtualTableCursor>(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    f: impl FnOnce(&mut C) -> DbResult<()>,
) -> c_int {
    let vtab = (*cursor).pVtab;
    let inner = &mut (*cursor.cast::<CursorCapsule<C>>()).cursor;
    let outcome = catch_unwind(AssertUnwindSafe(|| f(inner)));
    slot_code(vtab, outcome)
}

// ── Table slots ─────────────────────────────────────────────────────────

unsafe extern "C" fn x_create<T: VirtualTable>(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    construct::<T>(db, aux, argc, argv, pp_vtab, pz_err, true)
}

unsafe extern "C" fn x_connect<T: VirtualTable>(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    construct::<T>(db, aux, argc, argv, pp_vtab, pz_err, false)
}

unsafe fn construct<T: VirtualTable>(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
    create: bool,
) -> c_int {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let capsule = &*aux.cast::<ModuleCapsule<T>>();
        let args = module_args(argc, argv)?;
        let mut conn = VTabConnection {
            db,
            _marker: PhantomData,
        };
        let (schema, table) = if create {
            T::create(&mut conn, &capsule.aux, &args)?
        } else {
            T::connect(&mut conn, &capsule.aux, &args)?
        };
        let c_schema = ffi::to_cstring(&schema)?;
        check(Stage::Engine, db, ffi::sqlite3_declare_vtab(db, c_schema.as_ptr()))?;
        Ok(table)
    }));
    let error = match outcome {
        Ok(Ok(table)) => {
            let capsule = Box::new(TableCapsule {
                base: std::mem::zeroed(),
                table,
            });
            *pp_vtab = Box::into_raw(capsule).cast();
            return ffi::SQLITE_OK;
        }
        Ok(Err(e)) => e,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(%message, "panic in virtual table constructor");
            DbError::handler(format!("panic in virtual table constructor: {message}"))
        }
    };
    if !pz_err.is_null() {
        *pz_err = ffi::mprintf(&error.to_string());
    }
    error.callback_code()
}

unsafe fn module_args<'a>(argc: c_int, argv: *const *const c_char) -> DbResult<Vec<&'a str>> {
    raw_slice(argv, argc)
        .iter()
        .map(|arg| {
            ffi::cstr_borrowed(*arg)
                .ok_or_else(|| DbError::Conversion("module argument is not valid UTF-8".to_string()))
        })
        .collect()
}

unsafe extern "C" fn x_best_index<T: VirtualTable>(
    vtab: *mut ffi::sqlite3_vtab,
    info: *mut ffi::sqlite3_index_info,
) -> c_int {
    table_call::<T>(vtab, |table| table.best_index(&mut IndexInfo { raw: &mut *info }))
}

unsafe extern "C" fn x_disconnect<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    let TableCapsule { base, table } = *Box::from_raw(vtab.cast::<TableCapsule<T>>());
    if !base.zErrMsg.is_null() {
        ffi::sqlite3_free(base.zErrMsg.cast());
    }
    match catch_unwind(AssertUnwindSafe(|| table.disconnect())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "virtual table disconnect failed"),
        Err(panic) => {
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in virtual table disconnect");
        }
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_destroy<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    let rc = table_call::<T>(vtab, T::destroy);
    if rc == ffi::SQLITE_OK {
        let TableCapsule { base, table } = *Box::from_raw(vtab.cast::<TableCapsule<T>>());
        if !base.zErrMsg.is_null() {
            ffi::sqlite3_free(base.zErrMsg.cast());
        }
        drop(table);
    }
    rc
}

unsafe extern "C" fn x_open<T: VirtualTable>(
    vtab: *mut ffi::sqlite3_vtab,
    pp_cursor: *mut *mut ffi::sqlite3_vtab_cursor,
) -> c_int {
    table_call::<T>(vtab, |table| {
        let cursor = table.open()?;
        let capsule = Box::new(CursorCapsule {
            base: std::mem::zeroed(),
            cursor,
        });
        *pp_cursor = Box::into_raw(capsule).cast();
        Ok(())
    })
}

unsafe extern "C" fn x_update<T: VirtualTable>(
    vtab: *mut ffi::sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    table_call::<T>(vtab, |table| {
        let all = Args::from_raw(argc, argv);
        let first = all.value(0)?;
        let op = if all.len() == 1 {
            UpdateOp::Delete {
                rowid: first.as_i64(),
            }
        } else {
            let values = Args::from_raw(argc - 2, argv.add(2));
            let second = all.value(1)?;
            if first.is_null() {
                UpdateOp::Insert {
                    rowid: (!second.is_null()).then(|| second.as_i64()),
                    values,
                }
            } else {
                UpdateOp::Update {
                    old_rowid: first.as_i64(),
                    new_rowid: second.as_i64(),
                    values,
                }
            }
        };
        let rowid = table.update(&op)?;
        if matches!(op, UpdateOp::Insert { .. }) && !p_rowid.is_null() {
            *p_rowid = rowid;
        }
        Ok(())
    })
}

unsafe extern "C" fn x_begin<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    table_call::<T>(vtab, T::begin)
}

unsafe extern "C" fn x_sync<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    table_call::<T>(vtab, T::sync)
}

unsafe extern "C" fn x_commit<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    table_call::<T>(vtab, T::commit)
}

unsafe extern "C" fn x_rollback<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    table_call::<T>(vtab, T::rollback)
}

unsafe extern "C" fn x_savepoint<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    table_call::<T>(vtab, |table| table.savepoint(n))
}

unsafe extern "C" fn x_release<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    table_call::<T>(vtab, |table| table.release(n))
}

unsafe extern "C" fn x_rollback_to<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab, n: c_int) -> c_int {
    table_call::<T>(vtab, |table| table.rollback_to(n))
}

unsafe extern "C" fn x_rename<T: VirtualTable>(vtab: *mut ffi::sqlite3_vtab, new_name: *const c_char) -> c_int {
    table_call::<T>(vtab, |table| {
        let name = ffi::cstr_borrowed(new_name)
            .ok_or_else(|| DbError::Conversion("table name is not valid UTF-8".to_string()))?;
        table.rename(name)
    })
}

type RawFunction = unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);

unsafe extern "C" fn x_find_function<T: VirtualTable>(
    vtab: *mut ffi::sqlite3_vtab,
    n_args: c_int,
    name: *const c_char,
    px_func: *mut Option<RawFunction>,
    pp_arg: *mut *mut c_void,
) -> c_int {
    let table = &(*vtab.cast::<TableCapsule<T>>()).table;
    let found = catch_unwind(AssertUnwindSafe(|| {
        ffi::cstr_borrowed(name).and_then(|name| table.find_function(n_args, name))
    }));
    match found {
        Ok(Some(function)) => {
            *px_func = Some(call_overload);
            *pp_arg = function as *mut c_void;
            1
        }
        Ok(None) => 0,
        Err(panic) => {
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in find_function");
            0
        }
    }
}

unsafe extern "C" fn call_overload(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let context = Context::from_raw(ctx);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        // Safety: the user data is the function pointer stored by
        // `x_find_function`.
        let function: VTabFunction = std::mem::transmute::<*mut c_void, VTabFunction>(ffi::sqlite3_user_data(ctx));
        let args = Args::for_call(ctx, argc, argv);
        let value = function(&args)?;
        context.set_result(&value)
    }));
    report(&context, outcome);
}

// ── Cursor slots ────────────────────────────────────────────────────────

unsafe extern "C" fn x_close<C: VirtualTableCursor>(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let vtab = (*cursor).pVtab;
    let CursorCapsule { cursor, .. } = *Box::from_raw(cursor.cast::<CursorCapsule<C>>());
    let outcome = catch_unwind(AssertUnwindSafe(|| cursor.close()));
    slot_code(vtab, outcome)
}

unsafe extern "C" fn x_filter<C: VirtualTableCursor>(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    idx_num: c_int,
    idx_str: *const c_char,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> c_int {
    cursor_call::<C>(cursor, |c| {
        let idx_str = ffi::cstr_borrowed(idx_str);
        let args = Args::from_raw(argc, argv);
        c.filter(idx_num, idx_str, &args)
    })
}

unsafe extern "C" fn x_next<C: VirtualTableCursor>(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    cursor_call::<C>(cursor, C::next)
}

unsafe extern "C" fn x_eof<C: VirtualTableCursor>(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let inner = &(*cursor.cast::<CursorCapsule<C>>()).cursor;
    match catch_unwind(AssertUnwindSafe(|| inner.eof())) {
        Ok(eof) => c_int::from(eof),
        Err(panic) => {
            // End the scan rather than loop on a broken cursor.
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in virtual table eof");
            1
        }
    }
}

unsafe extern "C" fn x_column<C: VirtualTableCursor>(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    ctx: *mut ffi::sqlite3_context,
    index: c_int,
) -> c_int {
    cursor_call::<C>(cursor, |c| {
        let context = Context::from_raw(ctx);
        c.column(&context, usize::try_from(index).unwrap_or(0))
    })
}

unsafe extern "C" fn x_rowid<C: VirtualTableCursor>(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    cursor_call::<C>(cursor, |c| {
        *p_rowid = c.rowid()?;
        Ok(())
    })
}

/// Names a virtual-table argument string without its surrounding quotes.
#[must_use]
pub fn dequote(arg: &str) -> &str {
    let arg = arg.trim();
    let bytes = arg.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(b'\'' | b'"' | b'`'), Some(q)) if bytes.len() >= 2 && bytes[0] == *q => &arg[1..arg.len() - 1],
        (Some(b'['), Some(b']')) if bytes.len() >= 2 => &arg[1..arg.len() - 1],
        _ => arg,
    }
}

/// Splits a `key=value` module argument.
#[must_use]
pub fn parse_kv(arg: &str) -> Option<(&str, &str)> {
    let (key, value) = arg.split_once('=')?;
    Some((key.trim(), dequote(value)))
}
