//! Error types for the typed SQLite layer.

use std::fmt;
use std::os::raw::c_int;

use thiserror::Error;

use crate::ffi;

/// Result code returned by a SQLite call.
///
/// Holds the extended code when extended result codes are enabled, which they
/// are on every connection this crate opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// The primary result code (low byte of the extended code).
    #[must_use]
    pub const fn primary(self) -> i32 {
        self.0 & ffi::PRIMARY_MASK
    }

    /// English description of the code, as reported by `sqlite3_errstr`.
    #[must_use]
    pub fn description(self) -> String {
        // Safety: sqlite3_errstr returns a static string for any input.
        unsafe { ffi::cstr_lossy(ffi::sqlite3_errstr(self.0)) }
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which call surfaced an engine failure.
///
/// Busy, locked and constraint codes are classified the same way at every
/// stage; the stage only decides the bucket for all other codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Compile,
    Bind,
    Step,
    Engine,
}

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// Malformed SQL or unsupported prepare flags.
    #[error("compile error {code}: {message}")]
    Compile {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// Bad parameter index or name, or a value the engine rejected.
    #[error("bind error {code}: {message}")]
    Bind {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// Generic execution failure.
    #[error("step error {code}: {message}")]
    Step {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// The database file is locked by another connection. Retryable.
    #[error("database busy {code}: {message}")]
    Busy {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// A table is locked within this connection's shared cache. Retryable.
    #[error("database table locked {code}: {message}")]
    Locked {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// A data-integrity constraint was violated.
    #[error("constraint violation {code}: {message}")]
    Constraint {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// Any other engine failure outside prepare/bind/step (open, register,
    /// backup, blob I/O, ...).
    #[error("sqlite error {code}: {message}")]
    Engine {
        /// Engine result code.
        code: ResultCode,
        /// Engine message.
        message: String,
    },

    /// The handle was used after it was closed.
    #[error("{0} used after close")]
    UseAfterClose(&'static str),

    /// The wrapper is empty (default-constructed or moved out of).
    #[error("invalid handle: empty {0}")]
    InvalidHandle(&'static str),

    /// Type, encoding or pointer-tag mismatch while marshaling a value.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A column was read while the statement was not positioned on a row.
    #[error("statement is not positioned on a row")]
    NoRow,

    /// A column index was outside the current row.
    #[error("column index {index} out of range for {count} columns")]
    ColumnIndex {
        /// Requested index.
        index: usize,
        /// Columns in the current row.
        count: usize,
    },

    /// A callback argument index was outside the argument list.
    #[error("argument index {index} out of range for {count} arguments")]
    ArgumentIndex {
        /// Requested index.
        index: usize,
        /// Arguments passed to the callback.
        count: usize,
    },

    /// Error raised by a user-supplied callback handler.
    #[error("{0}")]
    Handler(String),
}

impl DbError {
    /// Builds an error for the given engine code and message.
    pub(crate) fn from_code(stage: Stage, code: c_int, message: impl Into<String>) -> Self {
        let code = ResultCode(code);
        let message = message.into();
        match code.primary() {
            ffi::SQLITE_BUSY => Self::Busy { code, message },
            ffi::SQLITE_LOCKED => Self::Locked { code, message },
            ffi::SQLITE_CONSTRAINT => Self::Constraint { code, message },
            _ => match stage {
                Stage::Compile => Self::Compile { code, message },
                Stage::Bind => Self::Bind { code, message },
                Stage::Step => Self::Step { code, message },
                Stage::Engine => Self::Engine { code, message },
            },
        }
    }

    /// Builds an error from the state recorded on `db` after a failed call.
    pub(crate) fn from_db(stage: Stage, db: *mut ffi::sqlite3, code: c_int) -> Self {
        // Prefer the extended code SQLite recorded for this failure.
        let recorded = ffi::extended_errcode(db);
        let code = if recorded & ffi::PRIMARY_MASK == code & ffi::PRIMARY_MASK {
            recorded
        } else {
            code
        };
        Self::from_code(stage, code, ffi::errmsg(db))
    }

    /// Convenience constructor for handler errors.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// The engine result code, when the error came from the engine.
    #[must_use]
    pub const fn code(&self) -> Option<ResultCode> {
        match self {
            Self::Compile { code, .. }
            | Self::Bind { code, .. }
            | Self::Step { code, .. }
            | Self::Busy { code, .. }
            | Self::Locked { code, .. }
            | Self::Constraint { code, .. }
            | Self::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `true` for [`DbError::Busy`].
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// `true` for [`DbError::Locked`].
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// `true` when the operation was cancelled by an interrupt.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.code()
            .is_some_and(|c| c.primary() == ffi::SQLITE_INTERRUPT)
    }

    /// The result code a callback trampoline reports for this error.
    pub(crate) fn callback_code(&self) -> c_int {
        match self {
            Self::Conversion(_) => ffi::SQLITE_MISMATCH,
            Self::UseAfterClose(_) | Self::InvalidHandle(_) => ffi::SQLITE_MISUSE,
            Self::ArgumentIndex { .. } | Self::ColumnIndex { .. } => ffi::SQLITE_RANGE,
            other => other.code().map_or(ffi::SQLITE_ERROR, |c| c.0),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Maps a non-ok engine return code to an error, passing `SQLITE_OK` through.
pub(crate) fn check(stage: Stage, db: *mut ffi::sqlite3, rc: c_int) -> DbResult<()> {
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(DbError::from_db(stage, db, rc))
    }
}
