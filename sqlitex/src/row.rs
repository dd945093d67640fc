//! Row streaming over a [`Statement`].

use std::fmt;
use std::marker::PhantomData;
use std::time::SystemTime;

use crate::error::{DbError, DbResult};
use crate::statement::{Statement, StepResult, StreamState};
use crate::value::{AnyValue, FromSql, Utf16String, Value};

/// Forward-only typed reader over the columns of the current row.
///
/// The position starts at zero for every row.
pub struct ColumnCursor<'r> {
    stmt: &'r Statement<'r>,
    position: usize,
    count: usize,
}

impl<'r> ColumnCursor<'r> {
    /// Starts reading the current row of `stmt`.
    pub fn new(stmt: &'r Statement<'r>) -> DbResult<Self> {
        let count = stmt.column_count()?;
        Ok(Self {
            stmt,
            position: 0,
            count,
        })
    }

    /// Decodes the next column as `T` and advances.
    pub fn next<T: FromSql>(&mut self) -> DbResult<T> {
        if self.position >= self.count {
            return Err(DbError::ColumnIndex {
                index: self.position,
                count: self.count,
            });
        }
        let value = self.stmt.column(self.position)?;
        self.position += 1;
        Ok(value)
    }

    /// Advances past one column without decoding it.
    pub fn skip(&mut self) -> DbResult<()> {
        if self.position >= self.count {
            return Err(DbError::ColumnIndex {
                index: self.position,
                count: self.count,
            });
        }
        self.position += 1;
        Ok(())
    }

    /// Columns read so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Columns left in the row.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.count - self.position
    }
}

impl fmt::Debug for ColumnCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCursor")
            .field("position", &self.position)
            .field("count", &self.count)
            .finish()
    }
}

/// Types built from one result row.
pub trait FromRow: Sized {
    /// Reads the row through `cursor`.
    fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self>;
}

macro_rules! from_row_scalar {
    ($($t:ty),* $(,)?) => {$(
        impl FromRow for $t {
            fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self> {
                cursor.next()
            }
        }
    )*};
}

from_row_scalar!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, bool, f32, f64, String,
    Vec<u8>, Utf16String, Value, AnyValue, SystemTime,
);

impl<T: FromSql> FromRow for Option<T> {
    fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self> {
        cursor.next()
    }
}

/// Every remaining column as an owned [`Value`].
impl FromRow for Vec<Value> {
    fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self> {
        (0..cursor.remaining()).map(|_| cursor.next()).collect()
    }
}

macro_rules! from_row_tuple {
    ($($name:ident),+) => {
        impl<$($name: FromSql),+> FromRow for ($($name,)+) {
            fn from_row(cursor: &mut ColumnCursor<'_>) -> DbResult<Self> {
                Ok(($(cursor.next::<$name>()?,)+))
            }
        }
    };
}

from_row_tuple!(A);
from_row_tuple!(A, B);
from_row_tuple!(A, B, C);
from_row_tuple!(A, B, C, D);
from_row_tuple!(A, B, C, D, E);
from_row_tuple!(A, B, C, D, E, F);
from_row_tuple!(A, B, C, D, E, F, G);
from_row_tuple!(A, B, C, D, E, F, G, H);

/// Lazy single-pass sequence of decoded rows.
///
/// Each call to `next` steps the statement once. An error is yielded once and
/// ends the sequence. A statement that is already exhausted yields nothing
/// until it is reset.
pub struct Rows<'s, 'conn, T> {
    stmt: Option<&'s mut Statement<'conn>>,
    _marker: PhantomData<fn() -> T>,
}

impl<'s, 'conn, T: FromRow> Rows<'s, 'conn, T> {
    pub(crate) fn new(stmt: &'s mut Statement<'conn>) -> Self {
        Self {
            stmt: Some(stmt),
            _marker: PhantomData,
        }
    }
}

impl<T> Rows<'_, '_, T> {
    /// The end-of-sequence sentinel.
    #[must_use]
    pub const fn end() -> Self {
        Self {
            stmt: None,
            _marker: PhantomData,
        }
    }

    /// `true` once the sequence has ended, including a stream over a
    /// statement that is already exhausted or closed.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.stmt.as_deref().map_or(true, |stmt| {
            matches!(stmt.state(), StreamState::Exhausted | StreamState::Closed)
        })
    }
}

impl<T: FromRow> Iterator for Rows<'_, '_, T> {
    type Item = DbResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let stmt = self.stmt.as_deref_mut()?;
        let item = match stmt.step() {
            Ok(StepResult::Row) => {
                ColumnCursor::new(stmt).and_then(|mut cursor| T::from_row(&mut cursor))
            }
            Ok(StepResult::Done) => {
                self.stmt = None;
                return None;
            }
            Err(e) => Err(e),
        };
        if item.is_err() {
            self.stmt = None;
        }
        Some(item)
    }
}

impl<T: FromRow> std::iter::FusedIterator for Rows<'_, '_, T> {}

/// Equal when both have ended or both stream the same statement.
impl<T> PartialEq for Rows<'_, '_, T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_end(), other.is_end()) {
            (true, true) => true,
            (false, false) => match (self.stmt.as_deref(), other.stmt.as_deref()) {
                (Some(a), Some(b)) => a.as_raw() == b.as_raw(),
                _ => false,
            },
            _ => false,
        }
    }
}

impl<T> fmt::Debug for Rows<'_, '_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows").field("ended", &self.is_end()).finish()
    }
}
