//! Raw SQLite symbols plus the C-string glue shared by the safe wrappers.
//!
//! The symbols come from `libsqlite3-sys`, which compiles the bundled
//! amalgamation. The rest of the crate reaches the C API only through this
//! module, so every raw type and constant is spelled `ffi::...` at the call
//! site.

#![allow(non_camel_case_types, dead_code)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};

pub(crate) use libsqlite3_sys::*;

use crate::error::{DbError, DbResult};

// ── Symbols missing from the generated bindings ─────────────────────────
//
// `libsqlite3-sys` leaves the UTF-16 entry points and `sqlite3_close_v2`
// out of its bindings. The bundled amalgamation still exports them; these
// declarations shadow the glob import above.

extern "C" {
    pub(crate) fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;

    pub(crate) fn sqlite3_bind_text16(
        stmt: *mut sqlite3_stmt,
        index: c_int,
        text: *const c_void,
        n_bytes: c_int,
        destructor: sqlite3_destructor_type,
    ) -> c_int;

    pub(crate) fn sqlite3_result_text16(
        ctx: *mut sqlite3_context,
        text: *const c_void,
        n_bytes: c_int,
        destructor: sqlite3_destructor_type,
    );
}

/// Primary result code mask (the low byte of an extended code).
pub(crate) const PRIMARY_MASK: c_int = 0xff;

/// Schema name used when the caller does not name one.
pub(crate) const MAIN_DB: &CStr = c"main";

/// Returns the most recent error message recorded on `db`.
pub(crate) fn errmsg(db: *mut sqlite3) -> String {
    if db.is_null() {
        return "no database handle".to_string();
    }
    // Safety: `db` is a live connection handle owned by the caller.
    unsafe { cstr_lossy(sqlite3_errmsg(db)) }
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Returns the extended error code most recently recorded on `db`.
pub(crate) fn extended_errcode(db: *mut sqlite3) -> c_int {
    if db.is_null() {
        return SQLITE_MISUSE;
    }
    // Safety: `db` is a live connection handle owned by the caller.
    unsafe { sqlite3_extended_errcode(db) }
}

/// Copies a nul-terminated C string into an owned `String`.
///
/// Returns `None` for a null pointer. Invalid UTF-8 is replaced.
///
/// # Safety
///
/// `ptr` must be null or point at a nul-terminated string.
pub(crate) unsafe fn cstr_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Borrows a nul-terminated C string as `&str`, rejecting invalid UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point at a nul-terminated string that outlives `'a`.
pub(crate) unsafe fn cstr_borrowed<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        CStr::from_ptr(ptr).to_str().ok()
    }
}

/// Converts a Rust string into a `CString`, failing on interior nul bytes.
pub(crate) fn to_cstring(s: &str) -> DbResult<CString> {
    CString::new(s).map_err(|e| DbError::Conversion(format!("nul byte in string: {e}")))
}

/// Allocates a copy of `msg` with `sqlite3_mprintf` so SQLite can free it.
///
/// Interior nul bytes truncate the message rather than failing.
pub(crate) fn mprintf(msg: &str) -> *mut c_char {
    let bytes: Vec<u8> = msg.bytes().take_while(|b| *b != 0).collect();
    let Ok(c_msg) = CString::new(bytes) else {
        return std::ptr::null_mut();
    };
    // Safety: both arguments are valid nul-terminated strings.
    unsafe { sqlite3_mprintf(c"%s".as_ptr(), c_msg.as_ptr()) }
}

/// Length of a slice as the `c_int` SQLite expects, failing when too large.
pub(crate) fn len_as_c_int(len: usize) -> DbResult<c_int> {
    c_int::try_from(len).map_err(|_| {
        DbError::Conversion(format!("length {len} exceeds the SQLite size limit"))
    })
}
