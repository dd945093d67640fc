//! Online backup between two connections.

use std::marker::PhantomData;
use std::os::raw::c_int;

use crate::connection::Connection;
use crate::error::{DbError, DbResult, Stage};
use crate::ffi;

/// Outcome of one [`Backup::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    /// Pages were copied and more remain.
    More,
    /// Every page has been copied.
    Done,
    /// The source or destination was busy; step again later.
    Busy,
    /// The source or destination table was locked; step again later.
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Done,
    Failed,
}

/// An online backup session copying one database into another.
///
/// Busy and locked steps are reported, not retried. Any other failure ends
/// the session: later steps fail without calling the engine.
pub struct Backup<'src, 'dst> {
    backup: *mut ffi::sqlite3_backup,
    destination: *mut ffi::sqlite3,
    state: SessionState,
    _conns: PhantomData<(&'src Connection, &'dst Connection)>,
}

impl Default for Backup<'_, '_> {
    fn default() -> Self {
        Self {
            backup: std::ptr::null_mut(),
            destination: std::ptr::null_mut(),
            state: SessionState::Running,
            _conns: PhantomData,
        }
    }
}

impl<'src, 'dst> Backup<'src, 'dst> {
    /// Starts copying `source_schema` of `source` into `destination_schema`
    /// of `destination`.
    pub fn new(
        source: &'src Connection,
        source_schema: &str,
        destination: &'dst Connection,
        destination_schema: &str,
    ) -> DbResult<Self> {
        let src = source.handle()?;
        let dst = destination.handle()?;
        let c_src = ffi::to_cstring(source_schema)?;
        let c_dst = ffi::to_cstring(destination_schema)?;
        // Safety: both handles are open; names are nul-terminated.
        let backup = unsafe { ffi::sqlite3_backup_init(dst, c_dst.as_ptr(), src, c_src.as_ptr()) };
        if backup.is_null() {
            // The failure is recorded on the destination connection.
            return Err(DbError::from_db(Stage::Engine, dst, ffi::extended_errcode(dst)));
        }
        Ok(Self {
            backup,
            destination: dst,
            state: SessionState::Running,
            _conns: PhantomData,
        })
    }

    fn handle(&self) -> DbResult<*mut ffi::sqlite3_backup> {
        if self.backup.is_null() {
            Err(DbError::InvalidHandle("backup"))
        } else {
            Ok(self.backup)
        }
    }

    /// Copies up to `pages` pages. A non-positive count copies everything
    /// that is left.
    pub fn step(&mut self, pages: i32) -> DbResult<BackupStep> {
        let backup = self.handle()?;
        match self.state {
            SessionState::Done => return Ok(BackupStep::Done),
            SessionState::Failed => {
                return Err(DbError::from_code(
                    Stage::Engine,
                    ffi::SQLITE_MISUSE,
                    "backup session already failed",
                ))
            }
            SessionState::Running => {}
        }
        let pages: c_int = if pages <= 0 { -1 } else { pages };
        // Safety: `backup` is live.
        let rc = unsafe { ffi::sqlite3_backup_step(backup, pages) };
        match rc & ffi::PRIMARY_MASK {
            ffi::SQLITE_OK => Ok(BackupStep::More),
            ffi::SQLITE_DONE => {
                self.state = SessionState::Done;
                Ok(BackupStep::Done)
            }
            ffi::SQLITE_BUSY => Ok(BackupStep::Busy),
            ffi::SQLITE_LOCKED => Ok(BackupStep::Locked),
            _ => {
                self.state = SessionState::Failed;
                Err(DbError::from_code(Stage::Engine, rc, ffi::errmsg(self.destination)))
            }
        }
    }

    /// Pages still to be copied, as of the last step.
    pub fn remaining(&self) -> DbResult<u32> {
        let backup = self.handle()?;
        // Safety: `backup` is live.
        Ok(u32::try_from(unsafe { ffi::sqlite3_backup_remaining(backup) }).unwrap_or(0))
    }

    /// Total pages in the source, as of the last step.
    pub fn page_count(&self) -> DbResult<u32> {
        let backup = self.handle()?;
        // Safety: `backup` is live.
        Ok(u32::try_from(unsafe { ffi::sqlite3_backup_pagecount(backup) }).unwrap_or(0))
    }

    /// `true` once a step has returned [`BackupStep::Done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    /// Releases the session. Finishing twice is a no-op.
    ///
    /// Reports the error of a failed session.
    pub fn finish(&mut self) -> DbResult<()> {
        if self.backup.is_null() {
            return Ok(());
        }
        let backup = std::mem::replace(&mut self.backup, std::ptr::null_mut());
        // Safety: finished exactly once.
        let rc = unsafe { ffi::sqlite3_backup_finish(backup) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(DbError::from_db(Stage::Engine, self.destination, rc))
        }
    }
}

impl Drop for Backup<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "failed to finish backup");
        }
    }
}

impl std::fmt::Debug for Backup<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backup")
            .field("open", &!self.backup.is_null())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
