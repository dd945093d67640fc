//! Typed marshaling, row streaming and extension callbacks over the `SQLite`
//! C API.
//!
//! The raw symbols come from `libsqlite3-sys`, which compiles the bundled
//! amalgamation. On top of them this crate provides:
//!
//! * **Values**: [`ToSql`] / [`FromSql`] conversions between host types and
//!   the engine's dynamically typed values, plus the owned [`Value`] sum type.
//! * **Statements**: [`Statement`] with an explicit state machine, and the
//!   single-pass [`Rows`] stream decoding each row through [`FromRow`].
//! * **Extensions**: scalar, aggregate and window functions, collations and
//!   virtual tables registered as typed handler objects. Panics and errors
//!   raised by handlers are reported to the engine, never unwound into it.
//! * **Hooks**: commit, rollback, update and progress callbacks on a
//!   connection, plus the process-wide [`status`] counters.
//! * **Resources**: [`Connection`], [`Blob`], [`Backup`] and (with the
//!   `snapshot` feature) [`Snapshot`], each releasing its handle exactly
//!   once.
//!
//! Consumer code uses only the safe types defined here. The `ffi` module is
//! the single place where raw symbols are imported.

mod ffi;

mod backup;
mod blob;
mod collation;
mod config;
mod connection;
mod context;
pub mod error;
pub mod function;
mod hooks;
mod registry;
mod row;
#[cfg(feature = "snapshot")]
mod snapshot;
mod statement;
mod status;
mod transaction;
pub mod value;
pub mod vtab;

pub use backup::{Backup, BackupStep};
pub use blob::Blob;
pub use collation::Collation;
pub use config::{Limit, OpenFlags, OpenOptions};
pub use connection::{ColumnMetadata, Connection, InterruptHandle};
pub use context::{Args, Context};
pub use error::{DbError, DbResult, ResultCode};
pub use function::{
    AggregateFunction, FnAggregate, FnScalar, FunctionFlags, ScalarFunction, WindowFunction,
};
pub use hooks::UpdateAction;
pub use registry::ExtensionRegistry;
pub use row::{ColumnCursor, FromRow, Rows};
#[cfg(feature = "snapshot")]
pub use snapshot::Snapshot;
pub use statement::{PrepareFlags, Statement, StatementStatus, StepResult, StreamState};
pub use status::{randomness, status, Statistic, StatusCounter};
pub use transaction::{Transaction, TransactionBehavior};
pub use value::{
    AnyValue, Encoded, EncodedText, Encoding, FromSql, Null, Pointer, ToSql, Utf16String, Value,
    ValueRef, ValueType, ZeroBlob,
};
pub use vtab::{ModuleKind, VirtualTable, VirtualTableCursor};

/// Threading mode the library was compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    /// No mutexes; unsafe to use from more than one thread.
    SingleThread,
    /// Connections are serialized internally.
    Serialized,
    /// Safe as long as no connection is used by two threads at once.
    MultiThread,
}

/// Version string of the linked library, e.g. `"3.46.0"`.
#[must_use]
pub fn version() -> String {
    // Safety: returns a static nul-terminated string.
    unsafe { ffi::cstr_lossy(ffi::sqlite3_libversion()) }.unwrap_or_default()
}

/// Version as an integer, e.g. `3046000`.
#[must_use]
pub fn version_number() -> i32 {
    // Safety: no preconditions.
    unsafe { ffi::sqlite3_libversion_number() }
}

/// Check-in identifier of the linked library source.
#[must_use]
pub fn source_id() -> String {
    // Safety: returns a static nul-terminated string.
    unsafe { ffi::cstr_lossy(ffi::sqlite3_sourceid()) }.unwrap_or_default()
}

/// `true` if `sql` ends with a complete statement.
pub fn is_complete(sql: &str) -> DbResult<bool> {
    let c_sql = ffi::to_cstring(sql)?;
    // Safety: `c_sql` is nul-terminated.
    Ok(unsafe { ffi::sqlite3_complete(c_sql.as_ptr()) } != 0)
}

/// The compile-time threading mode.
#[must_use]
pub fn threading_mode() -> ThreadingMode {
    // Safety: no preconditions.
    match unsafe { ffi::sqlite3_threadsafe() } {
        0 => ThreadingMode::SingleThread,
        2 => ThreadingMode::MultiThread,
        _ => ThreadingMode::Serialized,
    }
}

#[cfg(test)]
mod tests;
