//! Callback-side marshaling: argument lists and result contexts.

use std::any::Any;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_uchar, c_void};

use crate::error::{DbError, DbResult, Stage};
use crate::ffi;
use crate::value::{Encoded, FromSql, ToSql, ValueRef};

/// Arguments passed to a function or virtual-table callback.
///
/// Borrowed from the engine for the duration of one callback.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    values: &'a [*mut ffi::sqlite3_value],
    /// Function-call context; null for virtual-table callbacks.
    ctx: *mut ffi::sqlite3_context,
}

impl<'a> Args<'a> {
    /// Wraps the engine's `(argc, argv)` pair.
    ///
    /// # Safety
    ///
    /// `argv` must point at `argc` valid values that outlive `'a`.
    pub(crate) unsafe fn from_raw(argc: c_int, argv: *mut *mut ffi::sqlite3_value) -> Self {
        let values = match usize::try_from(argc) {
            Ok(n) if n > 0 && !argv.is_null() => std::slice::from_raw_parts(argv, n),
            _ => &[],
        };
        Self {
            values,
            ctx: std::ptr::null_mut(),
        }
    }

    /// Wraps the arguments of a function call running in `ctx`.
    ///
    /// # Safety
    ///
    /// As for [`Args::from_raw`]; `ctx` must be the running call's context.
    pub(crate) unsafe fn for_call(
        ctx: *mut ffi::sqlite3_context,
        argc: c_int,
        argv: *mut *mut ffi::sqlite3_value,
    ) -> Self {
        Self {
            ctx,
            ..Self::from_raw(argc, argv)
        }
    }

    /// Number of arguments.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when called without arguments.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrows argument `index` (0-based).
    pub fn value(&self, index: usize) -> DbResult<ValueRef<'a>> {
        self.values
            .get(index)
            .map(|v| ValueRef::from_value(*v))
            .ok_or(DbError::ArgumentIndex {
                index,
                count: self.values.len(),
            })
    }

    /// Decodes argument `index` as `T`.
    pub fn get<T: FromSql>(&self, index: usize) -> DbResult<T> {
        T::from_sql(self.value(index)?)
    }

    /// Iterates over the arguments in order.
    pub fn iter(&self) -> impl Iterator<Item = ValueRef<'a>> + 'a {
        self.values.iter().map(|v| ValueRef::from_value(*v))
    }

    /// Reads the data cached against argument `index` by an earlier call
    /// of the same function in the same statement.
    #[must_use]
    pub fn auxdata<T: Clone + Send + 'static>(&self, index: usize) -> Option<T> {
        let slot = c_int::try_from(index).ok()?;
        if self.ctx.is_null() {
            return None;
        }
        // Safety: auxdata is only ever set by `set_auxdata` below, which
        // stores a `Box<dyn Any + Send>`.
        unsafe {
            let raw = ffi::sqlite3_get_auxdata(self.ctx, slot).cast::<Box<dyn Any + Send>>();
            raw.as_ref()?.downcast_ref::<T>().cloned()
        }
    }

    /// Caches `data` against argument `index`. SQLite keeps it while the
    /// argument stays constant and frees it when done.
    pub fn set_auxdata<T: Send + 'static>(&self, index: usize, data: T) -> DbResult<()> {
        if self.ctx.is_null() {
            return Err(DbError::InvalidHandle("function context"));
        }
        let slot = c_int::try_from(index).map_err(|_| DbError::ArgumentIndex {
            index,
            count: self.values.len(),
        })?;
        let boxed: Box<Box<dyn Any + Send>> = Box::new(Box::new(data));
        // Safety: ownership passes to SQLite, which calls `free_auxdata` once.
        unsafe {
            ffi::sqlite3_set_auxdata(self.ctx, slot, Box::into_raw(boxed).cast(), Some(free_auxdata));
        }
        Ok(())
    }
}

unsafe extern "C" fn free_auxdata(data: *mut c_void) {
    drop(Box::from_raw(data.cast::<Box<dyn Any + Send>>()));
}

impl std::fmt::Debug for Args<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// The result slot of a function call or virtual-table column request.
pub struct Context<'a> {
    raw: *mut ffi::sqlite3_context,
    _marker: PhantomData<&'a ()>,
}

impl Context<'_> {
    /// # Safety
    ///
    /// `raw` must be the context of the callback currently running.
    pub(crate) const unsafe fn from_raw(raw: *mut ffi::sqlite3_context) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn as_raw(&self) -> *mut ffi::sqlite3_context {
        self.raw
    }

    /// Sets the callback's result to `value`.
    pub fn set_result<T: ToSql + ?Sized>(&self, value: &T) -> DbResult<()> {
        let encoded = value.to_sql()?;
        // Safety: `self.raw` is the live context of the running callback.
        unsafe { set_result(self.raw, &encoded) }
    }

    /// `true` while a virtual-table UPDATE is asking for a column it will
    /// not change.
    #[must_use]
    pub fn no_change(&self) -> bool {
        // Safety: `self.raw` is the live context of the running callback.
        unsafe { ffi::sqlite3_vtab_nochange(self.raw) != 0 }
    }

    /// Reports `err` as the callback's result.
    pub(crate) fn set_error(&self, err: &DbError) {
        // Safety: `self.raw` is the live context of the running callback.
        unsafe { set_error(self.raw, err) }
    }
}

/// Applies one encoded value with the matching `sqlite3_result_*` call.
///
/// # Safety
///
/// `ctx` must be the context of the callback currently running.
pub(crate) unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Encoded<'_>) -> DbResult<()> {
    match *value {
        Encoded::Null => ffi::sqlite3_result_null(ctx),
        Encoded::Int(v) => ffi::sqlite3_result_int(ctx, v),
        Encoded::Int64(v) => ffi::sqlite3_result_int64(ctx, v),
        Encoded::Double(v) => ffi::sqlite3_result_double(ctx, v),
        Encoded::Text(s) => ffi::sqlite3_result_text64(
            ctx,
            s.as_ptr().cast(),
            s.len() as u64,
            ffi::SQLITE_TRANSIENT(),
            ffi::SQLITE_UTF8 as c_uchar,
        ),
        Encoded::Text16(units) => ffi::sqlite3_result_text16(
            ctx,
            units.as_ptr().cast(),
            ffi::len_as_c_int(units.len() * 2)?,
            ffi::SQLITE_TRANSIENT(),
        ),
        Encoded::EncodedText { bytes, encoding } => ffi::sqlite3_result_text64(
            ctx,
            bytes.as_ptr().cast(),
            bytes.len() as u64,
            ffi::SQLITE_TRANSIENT(),
            encoding.as_raw() as c_uchar,
        ),
        Encoded::Blob(b) => ffi::sqlite3_result_blob64(
            ctx,
            b.as_ptr().cast(),
            b.len() as u64,
            ffi::SQLITE_TRANSIENT(),
        ),
        Encoded::ZeroBlob(n) => {
            let rc = ffi::sqlite3_result_zeroblob64(ctx, n);
            if rc != ffi::SQLITE_OK {
                return Err(DbError::from_code(
                    Stage::Engine,
                    rc,
                    "zero blob too large",
                ));
            }
        }
        Encoded::Pointer(p) => {
            ffi::sqlite3_result_pointer(ctx, p.as_ptr(), p.tag().as_ptr(), None);
        }
        Encoded::Value(v) => ffi::sqlite3_result_value(ctx, v.as_raw()),
    }
    Ok(())
}

/// Reports `err` through `sqlite3_result_error` and the matching code.
///
/// # Safety
///
/// `ctx` must be the context of the callback currently running.
pub(crate) unsafe fn set_error(ctx: *mut ffi::sqlite3_context, err: &DbError) {
    let message = err.to_string();
    ffi::sqlite3_result_error(
        ctx,
        message.as_ptr().cast(),
        c_int::try_from(message.len()).unwrap_or(c_int::MAX),
    );
    let code = err.callback_code();
    if code != ffi::SQLITE_ERROR {
        ffi::sqlite3_result_error_code(ctx, code);
    }
}
