//! Incremental blob I/O.

use std::io;
use std::marker::PhantomData;
use std::os::raw::c_int;

use crate::connection::Connection;
use crate::error::{check, DbError, DbResult, Stage};
use crate::ffi;

/// An open handle on one blob cell.
///
/// Reads and writes address a fixed-size region: a blob cannot grow through
/// this handle, so writes past [`size`](Self::size) fail. The
/// [`io::Read`]/[`io::Write`]/[`io::Seek`] impls share one stream position.
pub struct Blob<'conn> {
    blob: *mut ffi::sqlite3_blob,
    db: *mut ffi::sqlite3,
    position: u64,
    _conn: PhantomData<&'conn Connection>,
}

impl Default for Blob<'_> {
    fn default() -> Self {
        Self {
            blob: std::ptr::null_mut(),
            db: std::ptr::null_mut(),
            position: 0,
            _conn: PhantomData,
        }
    }
}

impl<'conn> Blob<'conn> {
    pub(crate) fn open(
        conn: &'conn Connection,
        schema: &str,
        table: &str,
        column: &str,
        rowid: i64,
        read_only: bool,
    ) -> DbResult<Self> {
        let db = conn.handle()?;
        let c_schema = ffi::to_cstring(schema)?;
        let c_table = ffi::to_cstring(table)?;
        let c_column = ffi::to_cstring(column)?;
        let mut blob = std::ptr::null_mut();
        // Safety: all names are nul-terminated; `blob` receives the handle.
        let rc = unsafe {
            ffi::sqlite3_blob_open(
                db,
                c_schema.as_ptr(),
                c_table.as_ptr(),
                c_column.as_ptr(),
                rowid,
                c_int::from(!read_only),
                &mut blob,
            )
        };
        check(Stage::Engine, db, rc)?;
        Ok(Self {
            blob,
            db,
            position: 0,
            _conn: PhantomData,
        })
    }

    fn handle(&self) -> DbResult<*mut ffi::sqlite3_blob> {
        if self.blob.is_null() {
            Err(DbError::InvalidHandle("blob"))
        } else {
            Ok(self.blob)
        }
    }

    /// Size of the blob in bytes.
    pub fn size(&self) -> DbResult<u64> {
        let blob = self.handle()?;
        // Safety: `blob` is open.
        let n = unsafe { ffi::sqlite3_blob_bytes(blob) };
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Fills `buf` with bytes starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> DbResult<()> {
        let blob = self.handle()?;
        let len = ffi::len_as_c_int(buf.len())?;
        let offset = offset_as_c_int(offset)?;
        // Safety: `buf` is valid for `len` bytes.
        let rc = unsafe { ffi::sqlite3_blob_read(blob, buf.as_mut_ptr().cast(), len, offset) };
        check(Stage::Engine, self.db, rc)
    }

    /// Writes `data` starting at `offset`. Fails if the write would extend
    /// past the end of the blob.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> DbResult<()> {
        let blob = self.handle()?;
        let len = ffi::len_as_c_int(data.len())?;
        let offset = offset_as_c_int(offset)?;
        // Safety: `data` is valid for `len` bytes.
        let rc = unsafe { ffi::sqlite3_blob_write(blob, data.as_ptr().cast(), len, offset) };
        check(Stage::Engine, self.db, rc)
    }

    /// Moves the handle to the same column of another row and rewinds.
    pub fn reopen(&mut self, rowid: i64) -> DbResult<()> {
        let blob = self.handle()?;
        // Safety: `blob` is open.
        let rc = unsafe { ffi::sqlite3_blob_reopen(blob, rowid) };
        check(Stage::Engine, self.db, rc)?;
        self.position = 0;
        Ok(())
    }

    /// Closes the handle. Closing twice is a no-op.
    pub fn close(&mut self) -> DbResult<()> {
        if self.blob.is_null() {
            return Ok(());
        }
        let blob = std::mem::replace(&mut self.blob, std::ptr::null_mut());
        // Safety: closed exactly once.
        let rc = unsafe { ffi::sqlite3_blob_close(blob) };
        check(Stage::Engine, self.db, rc)
    }

    fn remaining(&self) -> DbResult<u64> {
        Ok(self.size()?.saturating_sub(self.position))
    }
}

fn offset_as_c_int(offset: u64) -> DbResult<c_int> {
    c_int::try_from(offset).map_err(|_| DbError::Conversion(format!("blob offset {offset} out of range")))
}

fn io_error(e: DbError) -> io::Error {
    io::Error::other(e)
}

impl io::Read for Blob<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining().map_err(io_error)?;
        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if n == 0 {
            return Ok(0);
        }
        self.read_at(&mut buf[..n], self.position).map_err(io_error)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl io::Write for Blob<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.remaining().map_err(io_error)?;
        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "blob cannot grow"));
        }
        if n > 0 {
            self.write_at(&buf[..n], self.position).map_err(io_error)?;
            self.position += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for Blob<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let size = self.size().map_err(io_error)?;
        let target = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::End(delta) => size.checked_add_signed(delta),
            io::SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of blob")
        })?;
        self.position = target;
        Ok(target)
    }
}

impl Drop for Blob<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close blob handle");
        }
    }
}

impl std::fmt::Debug for Blob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("open", &!self.blob.is_null())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
