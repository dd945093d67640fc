//! WAL snapshots: reopen a read transaction at a recorded point.

use std::cmp::Ordering;

use crate::connection::Connection;
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;

/// A recorded state of a WAL-mode database.
///
/// Snapshots from the same database are ordered by age.
pub struct Snapshot {
    ptr: *mut ffi::sqlite3_snapshot,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
        }
    }
}

impl Snapshot {
    /// Must be called inside a read transaction on `schema`.
    pub(crate) fn get(conn: &Connection, schema: &str) -> DbResult<Self> {
        let db = conn.handle()?;
        let c_schema = ffi::to_cstring(schema)?;
        let mut ptr = std::ptr::null_mut();
        // Safety: `db` is open; `ptr` receives a snapshot owned by us.
        let rc = unsafe { ffi::sqlite3_snapshot_get(db, c_schema.as_ptr(), &mut ptr) };
        check(Stage::Engine, db, rc)?;
        Ok(Self { ptr })
    }

    pub(crate) fn open(&self, conn: &Connection, schema: &str) -> DbResult<()> {
        let ptr = self.handle()?;
        let db = conn.handle()?;
        let c_schema = ffi::to_cstring(schema)?;
        // Safety: both handles are live.
        let rc = unsafe { ffi::sqlite3_snapshot_open(db, c_schema.as_ptr(), ptr) };
        check(Stage::Engine, db, rc)
    }

    fn handle(&self) -> DbResult<*mut ffi::sqlite3_snapshot> {
        if self.ptr.is_null() {
            Err(DbError::InvalidHandle("snapshot"))
        } else {
            Ok(self.ptr)
        }
    }

    /// Orders two snapshots of the same database; older compares less.
    pub fn compare(&self, other: &Self) -> DbResult<Ordering> {
        let lhs = self.handle()?;
        let rhs = other.handle()?;
        // Safety: both snapshots are live.
        Ok(unsafe { ffi::sqlite3_snapshot_cmp(lhs, rhs) }.cmp(&0))
    }

    /// Releases the snapshot. Freeing twice is a no-op.
    pub fn free(&mut self) {
        if !self.ptr.is_null() {
            let ptr = std::mem::replace(&mut self.ptr, std::ptr::null_mut());
            // Safety: freed exactly once.
            unsafe { ffi::sqlite3_snapshot_free(ptr) };
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.compare(other), Ok(Ordering::Equal))
    }
}

impl PartialOrd for Snapshot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("open", &!self.ptr.is_null())
            .finish()
    }
}
