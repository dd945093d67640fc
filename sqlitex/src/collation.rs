//! Application-defined collating sequences.

use std::cmp::Ordering;
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{check, DbResult, Stage};
use crate::ffi;
use crate::function::{drop_boxed, panic_message};

/// A text ordering usable in `COLLATE` clauses.
pub trait Collation: Send + 'static {
    /// Compares two UTF-8 strings.
    fn compare(&self, lhs: &str, rhs: &str) -> Ordering;
}

impl<F> Collation for F
where
    F: Fn(&str, &str) -> Ordering + Send + 'static,
{
    fn compare(&self, lhs: &str, rhs: &str) -> Ordering {
        self(lhs, rhs)
    }
}

pub(crate) fn register<C: Collation>(db: *mut ffi::sqlite3, name: &str, collation: C) -> DbResult<()> {
    let c_name = ffi::to_cstring(name)?;
    let app = Box::into_raw(Box::new(collation));
    // Safety: on success SQLite owns `app` and frees it through
    // `drop_boxed::<C>`.
    let rc = unsafe {
        ffi::sqlite3_create_collation_v2(
            db,
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            app.cast(),
            Some(call_compare::<C>),
            Some(drop_boxed::<C>),
        )
    };
    if rc != ffi::SQLITE_OK {
        // This API does not run the destructor when it fails.
        // Safety: SQLite did not take ownership of `app`.
        unsafe { drop(Box::from_raw(app)) };
    }
    check(Stage::Engine, db, rc)?;
    tracing::debug!(name, "registered collation");
    Ok(())
}

/// Removes the collation called `name`.
pub(crate) fn remove(db: *mut ffi::sqlite3, name: &str) -> DbResult<()> {
    let c_name = ffi::to_cstring(name)?;
    // Safety: a null comparator deletes the collation and runs the old
    // destructor.
    let rc = unsafe {
        ffi::sqlite3_create_collation_v2(
            db,
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            std::ptr::null_mut(),
            None,
            None,
        )
    };
    check(Stage::Engine, db, rc)
}

unsafe extern "C" fn call_compare<C: Collation>(
    app: *mut c_void,
    lhs_len: c_int,
    lhs: *const c_void,
    rhs_len: c_int,
    rhs: *const c_void,
) -> c_int {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let collation = &*app.cast::<C>();
        let lhs = text(lhs, lhs_len);
        let rhs = text(rhs, rhs_len);
        collation.compare(&lhs, &rhs)
    }));
    match outcome {
        Ok(Ordering::Less) => -1,
        Ok(Ordering::Equal) => 0,
        Ok(Ordering::Greater) => 1,
        Err(panic) => {
            // Collations cannot report errors; treat the pair as equal.
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in collation");
            0
        }
    }
}

unsafe fn text<'a>(ptr: *const c_void, len: c_int) -> std::borrow::Cow<'a, str> {
    let bytes = match usize::try_from(len) {
        Ok(n) if n > 0 && !ptr.is_null() => std::slice::from_raw_parts(ptr.cast::<u8>(), n),
        _ => &[],
    };
    String::from_utf8_lossy(bytes)
}
