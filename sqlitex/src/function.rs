//! Application-defined SQL functions.
//!
//! Handlers are boxed and handed to `sqlite3_create_function_v2` as the
//! user-data pointer. The destructor trampoline is the only place the box is
//! freed; SQLite calls it when the function is replaced or removed, when the
//! connection closes, and when registration itself fails.

use std::any::Any;
use std::ffi::CString;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::{Args, Context};
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;
use crate::value::{Encoding, ToSql};

/// Behaviour flags for a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionFlags {
    bits: c_int,
    encoding: Option<Encoding>,
    conflicting: bool,
}

impl FunctionFlags {
    /// No flags, UTF-8 arguments.
    pub const NONE: Self = Self::from_bits(0);
    /// Same inputs always give the same output.
    pub const DETERMINISTIC: Self = Self::from_bits(ffi::SQLITE_DETERMINISTIC);
    /// Callable only from top-level SQL, not from triggers or views.
    pub const DIRECT_ONLY: Self = Self::from_bits(ffi::SQLITE_DIRECTONLY);
    /// No side effects; safe to call from schema objects.
    pub const INNOCUOUS: Self = Self::from_bits(ffi::SQLITE_INNOCUOUS);

    const fn from_bits(bits: c_int) -> Self {
        Self {
            bits,
            encoding: None,
            conflicting: false,
        }
    }

    /// Sets the preferred text encoding of the arguments.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self.conflicting = false;
        self
    }

    /// Text encoding of the arguments; UTF-8 unless one was set.
    #[must_use]
    pub const fn encoding(self) -> Encoding {
        match self.encoding {
            Some(encoding) => encoding,
            None => Encoding::Utf8,
        }
    }

    /// Flag bits plus the text representation for `eTextRep`.
    ///
    /// Fails when two different encodings were combined with `|`.
    pub(crate) fn raw(self) -> DbResult<c_int> {
        if self.conflicting {
            return Err(DbError::Conversion(
                "function flags combine conflicting text encodings".to_string(),
            ));
        }
        Ok(self.bits | self.encoding().as_raw())
    }
}

impl Default for FunctionFlags {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::ops::BitOr for FunctionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let (encoding, clash) = match (self.encoding, rhs.encoding) {
            (Some(a), Some(b)) => (Some(a), a != b),
            (a, b) => (a.or(b), false),
        };
        Self {
            bits: self.bits | rhs.bits,
            encoding,
            conflicting: self.conflicting || rhs.conflicting || clash,
        }
    }
}

/// A scalar SQL function.
///
/// Takes `&self`: a function may be re-entered from a nested query while
/// one of its calls is still running.
pub trait ScalarFunction: Send + 'static {
    /// Result type.
    type Output: ToSql;

    /// Computes the result for one call.
    fn invoke(&self, args: &Args<'_>) -> DbResult<Self::Output>;
}

/// An aggregate SQL function.
pub trait AggregateFunction: Send + 'static {
    /// Per-group accumulator.
    type State;
    /// Result type.
    type Output: ToSql;

    /// Creates the accumulator for a group, on its first row.
    fn init(&self) -> Self::State;

    /// Folds one row into the accumulator.
    fn step(&self, state: &mut Self::State, args: &Args<'_>) -> DbResult<()>;

    /// Produces the group's result. `state` is `None` when the group had no
    /// rows.
    fn finalize(&self, state: Option<Self::State>) -> DbResult<Self::Output>;
}

/// A window function: an aggregate that can also remove rows from its frame.
pub trait WindowFunction: AggregateFunction {
    /// Current value of the window, without consuming the accumulator.
    fn value(&self, state: Option<&Self::State>) -> DbResult<Self::Output>;

    /// Removes one row from the accumulator.
    fn inverse(&self, state: &mut Self::State, args: &Args<'_>) -> DbResult<()>;
}

/// Closure adapter for [`ScalarFunction`].
pub struct FnScalar<F, R> {
    f: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> FnScalar<F, R>
where
    F: Fn(&Args<'_>) -> DbResult<R> + Send + 'static,
    R: ToSql + 'static,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _output: PhantomData,
        }
    }
}

impl<F, R> ScalarFunction for FnScalar<F, R>
where
    F: Fn(&Args<'_>) -> DbResult<R> + Send + 'static,
    R: ToSql + 'static,
{
    type Output = R;

    fn invoke(&self, args: &Args<'_>) -> DbResult<R> {
        (self.f)(args)
    }
}

/// Closure adapter for [`AggregateFunction`]: a fold with an initial state
/// and a final mapping.
pub struct FnAggregate<S, I, T, Fin, R> {
    init: I,
    step: T,
    finalize: Fin,
    _types: PhantomData<fn() -> (S, R)>,
}

impl<S, I, T, Fin, R> FnAggregate<S, I, T, Fin, R>
where
    S: 'static,
    I: Fn() -> S + Send + 'static,
    T: Fn(&mut S, &Args<'_>) -> DbResult<()> + Send + 'static,
    Fin: Fn(Option<S>) -> DbResult<R> + Send + 'static,
    R: ToSql + 'static,
{
    /// Builds an aggregate from its three phases.
    pub const fn new(init: I, step: T, finalize: Fin) -> Self {
        Self {
            init,
            step,
            finalize,
            _types: PhantomData,
        }
    }
}

impl<S, I, T, Fin, R> AggregateFunction for FnAggregate<S, I, T, Fin, R>
where
    S: 'static,
    I: Fn() -> S + Send + 'static,
    T: Fn(&mut S, &Args<'_>) -> DbResult<()> + Send + 'static,
    Fin: Fn(Option<S>) -> DbResult<R> + Send + 'static,
    R: ToSql + 'static,
{
    type State = S;
    type Output = R;

    fn init(&self) -> S {
        (self.init)()
    }

    fn step(&self, state: &mut S, args: &Args<'_>) -> DbResult<()> {
        (self.step)(state, args)
    }

    fn finalize(&self, state: Option<S>) -> DbResult<R> {
        (self.finalize)(state)
    }
}

// ── Registration ────────────────────────────────────────────────────────

pub(crate) fn register_scalar<S: ScalarFunction>(
    db: *mut ffi::sqlite3,
    name: &str,
    n_args: i32,
    flags: FunctionFlags,
    handler: S,
) -> DbResult<()> {
    let c_name = function_name(name)?;
    let text_rep = flags.raw()?;
    let app = Box::into_raw(Box::new(handler));
    // Safety: `app` is freed by `drop_boxed::<S>` exactly once, including
    // when registration fails.
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c_name.as_ptr(),
            n_args,
            text_rep,
            app.cast(),
            Some(call_scalar::<S>),
            None,
            None,
            Some(drop_boxed::<S>),
        )
    };
    check(Stage::Engine, db, rc)?;
    tracing::debug!(name, n_args, "registered scalar function");
    Ok(())
}

pub(crate) fn register_aggregate<A: AggregateFunction>(
    db: *mut ffi::sqlite3,
    name: &str,
    n_args: i32,
    flags: FunctionFlags,
    handler: A,
) -> DbResult<()> {
    let c_name = function_name(name)?;
    let text_rep = flags.raw()?;
    let app = Box::into_raw(Box::new(handler));
    // Safety: as for `register_scalar`.
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c_name.as_ptr(),
            n_args,
            text_rep,
            app.cast(),
            None,
            Some(call_step::<A>),
            Some(call_final::<A>),
            Some(drop_boxed::<A>),
        )
    };
    check(Stage::Engine, db, rc)?;
    tracing::debug!(name, n_args, "registered aggregate function");
    Ok(())
}

pub(crate) fn register_window<W: WindowFunction>(
    db: *mut ffi::sqlite3,
    name: &str,
    n_args: i32,
    flags: FunctionFlags,
    handler: W,
) -> DbResult<()> {
    let c_name = function_name(name)?;
    let text_rep = flags.raw()?;
    let app = Box::into_raw(Box::new(handler));
    // Safety: as for `register_scalar`; create_window_function also calls
    // the destructor on failure.
    let rc = unsafe {
        ffi::sqlite3_create_window_function(
            db,
            c_name.as_ptr(),
            n_args,
            text_rep,
            app.cast(),
            Some(call_step::<W>),
            Some(call_final::<W>),
            Some(call_value::<W>),
            Some(call_inverse::<W>),
            Some(drop_boxed::<W>),
        )
    };
    check(Stage::Engine, db, rc)?;
    tracing::debug!(name, n_args, "registered window function");
    Ok(())
}

/// Removes the function registered under `name` with `n_args` arguments and
/// argument encoding `encoding`.
pub(crate) fn remove(
    db: *mut ffi::sqlite3,
    name: &str,
    n_args: i32,
    encoding: Encoding,
) -> DbResult<()> {
    let c_name = function_name(name)?;
    // Safety: null callbacks delete the function; SQLite runs the old
    // handler's destructor.
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db,
            c_name.as_ptr(),
            n_args,
            encoding.as_raw(),
            std::ptr::null_mut(),
            None,
            None,
            None,
            None,
        )
    };
    check(Stage::Engine, db, rc)
}

fn function_name(name: &str) -> DbResult<CString> {
    ffi::to_cstring(name)
}

// ── Trampolines ─────────────────────────────────────────────────────────

/// Frees a handler box leaked at registration.
pub(crate) unsafe extern "C" fn drop_boxed<T>(app: *mut c_void) {
    if !app.is_null() {
        drop(Box::from_raw(app.cast::<T>()));
    }
}

unsafe fn handler<'a, T>(ctx: *mut ffi::sqlite3_context) -> &'a T {
    &*ffi::sqlite3_user_data(ctx).cast::<T>()
}

unsafe extern "C" fn call_scalar<S: ScalarFunction>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let context = Context::from_raw(ctx);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let args = Args::for_call(ctx, argc, argv);
        let output = handler::<S>(ctx).invoke(&args)?;
        context.set_result(&output)
    }));
    report(&context, outcome);
}

/// Slot in the aggregate context holding the boxed accumulator.
unsafe fn state_slot<S>(ctx: *mut ffi::sqlite3_context, allocate: bool) -> *mut *mut S {
    let size = if allocate {
        c_int::try_from(std::mem::size_of::<*mut S>()).unwrap_or(0)
    } else {
        0
    };
    ffi::sqlite3_aggregate_context(ctx, size).cast::<*mut S>()
}

unsafe extern "C" fn call_step<A: AggregateFunction>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let context = Context::from_raw(ctx);
    let slot = state_slot::<A::State>(ctx, true);
    if slot.is_null() {
        ffi::sqlite3_result_error_nomem(ctx);
        return;
    }
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let handler = handler::<A>(ctx);
        if (*slot).is_null() {
            *slot = Box::into_raw(Box::new(handler.init()));
        }
        let args = Args::for_call(ctx, argc, argv);
        handler.step(&mut **slot, &args)
    }));
    report(&context, outcome);
}

unsafe extern "C" fn call_inverse<W: WindowFunction>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let context = Context::from_raw(ctx);
    let slot = state_slot::<W::State>(ctx, true);
    if slot.is_null() {
        ffi::sqlite3_result_error_nomem(ctx);
        return;
    }
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let handler = handler::<W>(ctx);
        if (*slot).is_null() {
            *slot = Box::into_raw(Box::new(handler.init()));
        }
        let args = Args::for_call(ctx, argc, argv);
        handler.inverse(&mut **slot, &args)
    }));
    report(&context, outcome);
}

unsafe extern "C" fn call_value<W: WindowFunction>(ctx: *mut ffi::sqlite3_context) {
    let context = Context::from_raw(ctx);
    let slot = state_slot::<W::State>(ctx, false);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let state = if slot.is_null() { None } else { (*slot).as_ref() };
        let output = handler::<W>(ctx).value(state)?;
        context.set_result(&output)
    }));
    report(&context, outcome);
}

unsafe extern "C" fn call_final<A: AggregateFunction>(ctx: *mut ffi::sqlite3_context) {
    let context = Context::from_raw(ctx);
    let slot = state_slot::<A::State>(ctx, false);
    // Take the accumulator first so it is freed even if finalize panics.
    let state = if slot.is_null() || (*slot).is_null() {
        None
    } else {
        let boxed = Box::from_raw(*slot);
        *slot = std::ptr::null_mut();
        Some(*boxed)
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let output = handler::<A>(ctx).finalize(state)?;
        context.set_result(&output)
    }));
    report(&context, outcome);
}

/// Turns a handler outcome into the call's error result, if any.
pub(crate) fn report(context: &Context<'_>, outcome: std::thread::Result<DbResult<()>>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => context.set_error(&e),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(%message, "panic in SQL function");
            context.set_error(&DbError::handler(format!("panic in SQL function: {message}")));
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
