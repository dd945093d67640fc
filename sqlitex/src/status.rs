//! Process-wide runtime counters and the engine's random number source.

use std::os::raw::{c_int, c_void};

use crate::error::{DbError, DbResult, Stage};
use crate::ffi;

/// A process-wide counter tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCounter {
    /// Bytes of heap memory currently checked out.
    MemoryUsed,
    /// Page cache slots in use.
    PageCacheUsed,
    /// Page cache bytes served by the general-purpose allocator.
    PageCacheOverflow,
    /// Largest single allocation request.
    MallocSize,
    /// Deepest parser stack reached.
    ParserStack,
    /// Largest page cache allocation request.
    PageCacheSize,
    /// Separate allocations currently checked out.
    MallocCount,
}

impl StatusCounter {
    const fn as_raw(self) -> c_int {
        match self {
            Self::MemoryUsed => ffi::SQLITE_STATUS_MEMORY_USED,
            Self::PageCacheUsed => ffi::SQLITE_STATUS_PAGECACHE_USED,
            Self::PageCacheOverflow => ffi::SQLITE_STATUS_PAGECACHE_OVERFLOW,
            Self::MallocSize => ffi::SQLITE_STATUS_MALLOC_SIZE,
            Self::ParserStack => ffi::SQLITE_STATUS_PARSER_STACK,
            Self::PageCacheSize => ffi::SQLITE_STATUS_PAGECACHE_SIZE,
            Self::MallocCount => ffi::SQLITE_STATUS_MALLOC_COUNT,
        }
    }
}

/// Current and highest recorded value of a [`StatusCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistic {
    /// Value right now.
    pub current: i64,
    /// Highest value since start-up or the last reset.
    pub highwater: i64,
}

/// Reads `counter`. With `reset`, the highwater mark restarts from the
/// current value after it is read.
pub fn status(counter: StatusCounter, reset: bool) -> DbResult<Statistic> {
    let (mut current, mut highwater) = (0, 0);
    // Safety: both out-pointers are valid for writes.
    let rc = unsafe {
        ffi::sqlite3_status64(counter.as_raw(), &mut current, &mut highwater, c_int::from(reset))
    };
    if rc == ffi::SQLITE_OK {
        Ok(Statistic { current, highwater })
    } else {
        Err(DbError::from_code(Stage::Engine, rc, format!("cannot read {counter:?}")))
    }
}

/// Largest request handed to the engine in one call.
const RANDOM_CHUNK: usize = 1 << 30;

/// Fills `buf` from the engine's pseudo-random number generator.
pub fn randomness(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(RANDOM_CHUNK) {
        let len = c_int::try_from(chunk.len()).unwrap_or(c_int::MAX);
        // Safety: `chunk` is valid for `len` bytes of writes.
        unsafe { ffi::sqlite3_randomness(len, chunk.as_mut_ptr().cast::<c_void>()) };
    }
}
