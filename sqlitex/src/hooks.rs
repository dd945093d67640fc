//! Commit, rollback, update and progress callbacks on a [`Connection`].
//!
//! Each hook is double-boxed so the engine receives a thin pointer. The box
//! lives in the connection until the hook is replaced or cleared, or the
//! connection closes. Trampolines catch panics; a panicking commit hook
//! rolls the transaction back and a panicking progress handler interrupts.

use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::connection::Connection;
use crate::error::DbResult;
use crate::ffi;
use crate::function::panic_message;

type CommitHook = Box<dyn FnMut() -> bool + Send>;
type RollbackHook = Box<dyn FnMut() + Send>;
type UpdateHook = Box<dyn FnMut(UpdateAction, &str, &str, i64) + Send>;
type ProgressHandler = Box<dyn FnMut() -> bool + Send>;

/// Hooks currently installed on a connection.
#[derive(Default)]
pub(crate) struct Hooks {
    commit: Option<Box<CommitHook>>,
    rollback: Option<Box<RollbackHook>>,
    update: Option<Box<UpdateHook>>,
    progress: Option<Box<ProgressHandler>>,
}

/// The kind of row change reported to an update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl UpdateAction {
    const fn from_raw(op: c_int) -> Option<Self> {
        match op {
            ffi::SQLITE_INSERT => Some(Self::Insert),
            ffi::SQLITE_UPDATE => Some(Self::Update),
            ffi::SQLITE_DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Connection {
    /// Calls `hook` before each commit. Returning `true` turns the commit
    /// into a rollback. Replaces any previous commit hook.
    ///
    /// The hook must not use the connection it is installed on.
    pub fn commit_hook<F>(&mut self, hook: F) -> DbResult<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let db = self.handle()?;
        let mut boxed: Box<CommitHook> = Box::new(Box::new(hook));
        let arg: *mut CommitHook = &mut *boxed;
        // Safety: the box is kept in `self` until replaced or closed.
        unsafe { ffi::sqlite3_commit_hook(db, Some(call_commit), arg.cast()) };
        self.hooks.commit = Some(boxed);
        Ok(())
    }

    /// Removes the commit hook.
    pub fn clear_commit_hook(&mut self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        unsafe { ffi::sqlite3_commit_hook(db, None, std::ptr::null_mut()) };
        self.hooks.commit = None;
        Ok(())
    }

    /// Calls `hook` whenever a transaction rolls back. Replaces any previous
    /// rollback hook.
    pub fn rollback_hook<F>(&mut self, hook: F) -> DbResult<()>
    where
        F: FnMut() + Send + 'static,
    {
        let db = self.handle()?;
        let mut boxed: Box<RollbackHook> = Box::new(Box::new(hook));
        let arg: *mut RollbackHook = &mut *boxed;
        // Safety: the box is kept in `self` until replaced or closed.
        unsafe { ffi::sqlite3_rollback_hook(db, Some(call_rollback), arg.cast()) };
        self.hooks.rollback = Some(boxed);
        Ok(())
    }

    /// Removes the rollback hook.
    pub fn clear_rollback_hook(&mut self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        unsafe { ffi::sqlite3_rollback_hook(db, None, std::ptr::null_mut()) };
        self.hooks.rollback = None;
        Ok(())
    }

    /// Calls `hook` with the action, schema, table and rowid of every row
    /// inserted, updated or deleted in a rowid table. Replaces any previous
    /// update hook.
    ///
    /// The hook must not use the connection it is installed on.
    pub fn update_hook<F>(&mut self, hook: F) -> DbResult<()>
    where
        F: FnMut(UpdateAction, &str, &str, i64) + Send + 'static,
    {
        let db = self.handle()?;
        let mut boxed: Box<UpdateHook> = Box::new(Box::new(hook));
        let arg: *mut UpdateHook = &mut *boxed;
        // Safety: the box is kept in `self` until replaced or closed.
        unsafe { ffi::sqlite3_update_hook(db, Some(call_update), arg.cast()) };
        self.hooks.update = Some(boxed);
        Ok(())
    }

    /// Removes the update hook.
    pub fn clear_update_hook(&mut self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        unsafe { ffi::sqlite3_update_hook(db, None, std::ptr::null_mut()) };
        self.hooks.update = None;
        Ok(())
    }

    /// Calls `handler` roughly every `n_ops` virtual machine instructions
    /// while a statement runs. Returning `true` interrupts the statement.
    /// Replaces any previous progress handler.
    pub fn progress_handler<F>(&mut self, n_ops: u32, handler: F) -> DbResult<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let db = self.handle()?;
        let n_ops = c_int::try_from(n_ops.max(1)).unwrap_or(c_int::MAX);
        let mut boxed: Box<ProgressHandler> = Box::new(Box::new(handler));
        let arg: *mut ProgressHandler = &mut *boxed;
        // Safety: the box is kept in `self` until replaced or closed.
        unsafe { ffi::sqlite3_progress_handler(db, n_ops, Some(call_progress), arg.cast()) };
        self.hooks.progress = Some(boxed);
        Ok(())
    }

    /// Removes the progress handler.
    pub fn clear_progress_handler(&mut self) -> DbResult<()> {
        let db = self.handle()?;
        // Safety: `db` is live.
        unsafe { ffi::sqlite3_progress_handler(db, 0, None, std::ptr::null_mut()) };
        self.hooks.progress = None;
        Ok(())
    }
}

unsafe extern "C" fn call_commit(arg: *mut c_void) -> c_int {
    let hook = &mut *arg.cast::<CommitHook>();
    match catch_unwind(AssertUnwindSafe(|| hook())) {
        Ok(rollback) => c_int::from(rollback),
        Err(panic) => {
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in commit hook");
            1
        }
    }
}

unsafe extern "C" fn call_rollback(arg: *mut c_void) {
    let hook = &mut *arg.cast::<RollbackHook>();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook())) {
        tracing::error!(message = %panic_message(panic.as_ref()), "panic in rollback hook");
    }
}

unsafe extern "C" fn call_update(
    arg: *mut c_void,
    op: c_int,
    schema: *const c_char,
    table: *const c_char,
    rowid: ffi::sqlite3_int64,
) {
    let Some(action) = UpdateAction::from_raw(op) else {
        return;
    };
    let hook = &mut *arg.cast::<UpdateHook>();
    let schema = ffi::cstr_borrowed(schema).unwrap_or_default();
    let table = ffi::cstr_borrowed(table).unwrap_or_default();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(action, schema, table, rowid))) {
        tracing::error!(message = %panic_message(panic.as_ref()), "panic in update hook");
    }
}

unsafe extern "C" fn call_progress(arg: *mut c_void) -> c_int {
    let handler = &mut *arg.cast::<ProgressHandler>();
    match catch_unwind(AssertUnwindSafe(|| handler())) {
        Ok(stop) => c_int::from(stop),
        Err(panic) => {
            tracing::error!(message = %panic_message(panic.as_ref()), "panic in progress handler");
            1
        }
    }
}
