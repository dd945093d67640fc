//! Connection configuration: open flags, the [`OpenOptions`] builder and
//! run-time limits.

use std::os::raw::c_int;
use std::time::Duration;

use crate::ffi;

/// Flags passed to `sqlite3_open_v2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(c_int);

impl OpenFlags {
    /// Open read-only.
    pub const READ_ONLY: Self = Self(ffi::SQLITE_OPEN_READONLY);
    /// Open for reading and writing.
    pub const READ_WRITE: Self = Self(ffi::SQLITE_OPEN_READWRITE);
    /// Create the database if it does not exist.
    pub const CREATE: Self = Self(ffi::SQLITE_OPEN_CREATE);
    /// Interpret the path as a URI.
    pub const URI: Self = Self(ffi::SQLITE_OPEN_URI);
    /// Pure in-memory database.
    pub const MEMORY: Self = Self(ffi::SQLITE_OPEN_MEMORY);
    /// Multi-thread mode: no connection mutex.
    pub const NO_MUTEX: Self = Self(ffi::SQLITE_OPEN_NOMUTEX);
    /// Serialized mode.
    pub const FULL_MUTEX: Self = Self(ffi::SQLITE_OPEN_FULLMUTEX);
    /// Shared cache.
    pub const SHARED_CACHE: Self = Self(ffi::SQLITE_OPEN_SHAREDCACHE);
    /// Private cache.
    pub const PRIVATE_CACHE: Self = Self(ffi::SQLITE_OPEN_PRIVATECACHE);

    /// Empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw `SQLITE_OPEN_*` bits.
    #[must_use]
    pub const fn bits(self) -> c_int {
        self.0
    }
}

/// Read-write, create if missing, with URI filenames.
impl Default for OpenFlags {
    fn default() -> Self {
        Self::READ_WRITE | Self::CREATE | Self::URI
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Builder for [`Connection::open_with`](crate::Connection::open_with).
///
/// Applied in order after the handle is created: extended result codes,
/// busy timeout, then foreign keys.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub(crate) flags: OpenFlags,
    pub(crate) vfs: Option<String>,
    pub(crate) busy_timeout: Option<Duration>,
    pub(crate) foreign_keys: Option<bool>,
}

impl OpenOptions {
    /// Default options: read-write, create, URI filenames.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the open flags.
    #[must_use]
    pub const fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Opens read-only instead of read-write/create.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.flags = OpenFlags(
            (self.flags.0 & !(ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE))
                | ffi::SQLITE_OPEN_READONLY,
        );
        self
    }

    /// Uses the named VFS.
    #[must_use]
    pub fn vfs(mut self, name: impl Into<String>) -> Self {
        self.vfs = Some(name.into());
        self
    }

    /// Waits up to `timeout` for locks before failing with a busy error.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Enables or disables foreign key enforcement.
    #[must_use]
    pub const fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = Some(enabled);
        self
    }
}

/// Run-time limits for [`Connection::limit`](crate::Connection::limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Limit {
    /// Maximum length of a string or blob.
    Length = 0,
    /// Maximum length of an SQL statement.
    SqlLength = 1,
    /// Maximum number of columns.
    Column = 2,
    /// Maximum depth of an expression tree.
    ExprDepth = 3,
    /// Maximum number of terms in a compound SELECT.
    CompoundSelect = 4,
    /// Maximum number of VDBE instructions.
    VdbeOp = 5,
    /// Maximum number of function arguments.
    FunctionArg = 6,
    /// Maximum number of attached databases.
    Attached = 7,
    /// Maximum length of a LIKE or GLOB pattern.
    LikePatternLength = 8,
    /// Maximum parameter index.
    VariableNumber = 9,
    /// Maximum trigger recursion depth.
    TriggerDepth = 10,
    /// Maximum number of auxiliary worker threads.
    WorkerThreads = 11,
}

impl Limit {
    pub(crate) const fn as_raw(self) -> c_int {
        self as c_int
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let flags = OpenFlags::default();
        assert!(flags.contains(OpenFlags::READ_WRITE | OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::READ_ONLY));
    }

    #[test]
    fn test_read_only_clears_write_bits() {
        let opts = OpenOptions::new().read_only();
        assert!(opts.flags.contains(OpenFlags::READ_ONLY));
        assert!(!opts.flags.contains(OpenFlags::READ_WRITE));
        assert!(!opts.flags.contains(OpenFlags::CREATE));
        assert!(opts.flags.contains(OpenFlags::URI));
    }
}
