//! Parameter and column value types, and the host-type marshaling traits.
//!
//! Encoding goes through [`ToSql`], which turns a host value into an
//! [`Encoded`] describing exactly one `sqlite3_bind_*` / `sqlite3_result_*`
//! call. Decoding goes through [`FromSql`], which reads a [`ValueRef`] (a
//! result column or a callback argument).

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{DbError, DbResult, Stage};
use crate::ffi;

/// Text encodings understood by SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// UTF-8.
    #[default]
    Utf8,
    /// UTF-16 in the platform's native byte order.
    Utf16,
    /// UTF-16 little endian.
    Utf16Le,
    /// UTF-16 big endian.
    Utf16Be,
}

impl Encoding {
    /// The `SQLITE_UTF*` constant for this encoding.
    pub(crate) const fn as_raw(self) -> c_int {
        match self {
            Self::Utf8 => ffi::SQLITE_UTF8,
            Self::Utf16 => ffi::SQLITE_UTF16,
            Self::Utf16Le => ffi::SQLITE_UTF16LE,
            Self::Utf16Be => ffi::SQLITE_UTF16BE,
        }
    }

    /// Resolves [`Encoding::Utf16`] to the concrete native byte order.
    const fn resolved(self) -> Self {
        match self {
            Self::Utf16 if cfg!(target_endian = "little") => Self::Utf16Le,
            Self::Utf16 => Self::Utf16Be,
            other => other,
        }
    }

    /// Display name matching `PRAGMA encoding`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Utf16Le => "UTF-16le",
            Self::Utf16Be => "UTF-16be",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit signed integer.
    Integer,
    /// IEEE double.
    Float,
    /// Text.
    Text,
    /// Binary blob.
    Blob,
    /// SQL NULL.
    Null,
}

impl ValueType {
    pub(crate) fn from_raw(raw: c_int) -> Self {
        match raw {
            ffi::SQLITE_INTEGER => Self::Integer,
            ffi::SQLITE_FLOAT => Self::Float,
            ffi::SQLITE_TEXT => Self::Text,
            ffi::SQLITE_BLOB => Self::Blob,
            _ => Self::Null,
        }
    }
}

/// An owned value that can be bound to a prepared statement parameter or
/// read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

impl Value {
    /// Storage class of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Integer(_) => ValueType::Integer,
            Self::Real(_) => ValueType::Float,
            Self::Text(_) => ValueType::Text,
            Self::Blob(_) => ValueType::Blob,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Convenience macro for building parameter lists.
///
/// Usage: `params![1_i64, blob.as_slice(), "text"]`
#[macro_export]
macro_rules! params {
    ($($val:expr),* $(,)?) => {
        &[$($crate::Value::from($val)),*][..]
    };
}

/// SQL NULL as a bindable host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Null;

/// A blob of `n` zero bytes, bound without materialising it in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroBlob(pub u64);

/// UTF-16 text in the platform's native byte order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Utf16String(pub Vec<u16>);

impl From<&str> for Utf16String {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl Utf16String {
    /// Decodes the code units, failing on unpaired surrogates.
    pub fn to_string_checked(&self) -> DbResult<String> {
        String::from_utf16(&self.0).map_err(|e| DbError::Conversion(e.to_string()))
    }
}

/// Raw text bytes tagged with the encoding they are written in.
///
/// The marshaling layer never transcodes an `EncodedText`: it is bound with
/// its own tag and read back only through an accessor naming the wanted
/// encoding ([`ValueRef::text_encoded`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    encoding: Encoding,
    bytes: Vec<u8>,
}

impl EncodedText {
    /// Wraps bytes already written in `encoding`.
    ///
    /// UTF-16 input must contain whole code units.
    pub fn new(encoding: Encoding, bytes: Vec<u8>) -> DbResult<Self> {
        if encoding != Encoding::Utf8 && bytes.len() % 2 != 0 {
            return Err(DbError::Conversion(format!(
                "{encoding} text must have an even byte length, got {}",
                bytes.len()
            )));
        }
        Ok(Self { encoding, bytes })
    }

    /// Encodes `s` into `encoding`.
    #[must_use]
    pub fn encode(s: &str, encoding: Encoding) -> Self {
        let bytes = match encoding.resolved() {
            Encoding::Utf8 => s.as_bytes().to_vec(),
            Encoding::Utf16Be => s.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            _ => s.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        };
        Self { encoding, bytes }
    }

    /// The encoding tag.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrows the text as UTF-8; fails unless the tag is UTF-8.
    pub fn as_utf8(&self) -> DbResult<&str> {
        if self.encoding != Encoding::Utf8 {
            return Err(DbError::Conversion(format!(
                "text is tagged {}, not UTF-8",
                self.encoding
            )));
        }
        std::str::from_utf8(&self.bytes).map_err(|e| DbError::Conversion(e.to_string()))
    }

    /// Decodes the bytes according to their own tag.
    pub fn decode(&self) -> DbResult<String> {
        let units: Vec<u16> = match self.encoding.resolved() {
            Encoding::Utf8 => return self.as_utf8().map(str::to_owned),
            Encoding::Utf16Be => self
                .bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect(),
            _ => self
                .bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        };
        String::from_utf16(&units).map_err(|e| DbError::Conversion(e.to_string()))
    }
}

/// An opaque pointer passed through SQL with a type tag.
///
/// SQL sees the value as NULL; only code asking for the same tag through
/// [`ValueRef::pointer`] gets the pointer back. The pointee is never owned
/// or freed by this crate.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    ptr: *mut c_void,
    tag: &'static CStr,
}

impl Pointer {
    /// Tags `ptr` with `tag`.
    #[must_use]
    pub const fn new(ptr: *mut c_void, tag: &'static CStr) -> Self {
        Self { ptr, tag }
    }

    /// The raw pointer.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// The type tag.
    #[must_use]
    pub const fn tag(&self) -> &'static CStr {
        self.tag
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("ptr", &self.ptr)
            .field("tag", &self.tag)
            .finish()
    }
}

/// An owned copy of an engine value (`sqlite3_value_dup`).
///
/// Independent of the row or callback that produced it; freed on drop.
pub struct AnyValue {
    raw: NonNull<ffi::sqlite3_value>,
}

impl AnyValue {
    /// Duplicates `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a valid `sqlite3_value` for the duration of the call.
    pub(crate) unsafe fn dup(raw: *const ffi::sqlite3_value) -> DbResult<Self> {
        let copy = ffi::sqlite3_value_dup(raw);
        NonNull::new(copy).map(|raw| Self { raw }).ok_or_else(|| {
            DbError::from_code(Stage::Engine, ffi::SQLITE_NOMEM, "sqlite3_value_dup failed")
        })
    }

    pub(crate) const fn as_raw(&self) -> *mut ffi::sqlite3_value {
        self.raw.as_ptr()
    }

    /// Borrows the value for decoding.
    #[must_use]
    pub const fn as_value_ref(&self) -> ValueRef<'_> {
        ValueRef::from_value(self.raw.as_ptr())
    }

    /// Storage class of the value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.as_value_ref().value_type()
    }

    /// Decodes the value as `T`.
    pub fn get<T: FromSql>(&self) -> DbResult<T> {
        T::from_sql(self.as_value_ref())
    }

    /// Makes another independent copy.
    pub fn try_clone(&self) -> DbResult<Self> {
        // Safety: `self.raw` stays valid while `self` is alive.
        unsafe { Self::dup(self.raw.as_ptr()) }
    }
}

impl Drop for AnyValue {
    fn drop(&mut self) {
        // Safety: the value was produced by sqlite3_value_dup and is freed once.
        unsafe { ffi::sqlite3_value_free(self.raw.as_ptr()) }
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyValue")
            .field("type", &self.value_type())
            .finish_non_exhaustive()
    }
}

/// One marshaled host value: exactly one `sqlite3_bind_*` or
/// `sqlite3_result_*` call.
#[derive(Debug, Clone, Copy)]
pub enum Encoded<'a> {
    /// `bind_null` / `result_null`.
    Null,
    /// 32-bit integer path.
    Int(i32),
    /// 64-bit integer path.
    Int64(i64),
    /// Double path.
    Double(f64),
    /// UTF-8 text.
    Text(&'a str),
    /// Native-order UTF-16 code units.
    Text16(&'a [u16]),
    /// Raw text bytes with an explicit encoding tag.
    EncodedText {
        /// Bytes in `encoding`.
        bytes: &'a [u8],
        /// Encoding tag passed to SQLite.
        encoding: Encoding,
    },
    /// Blob bytes.
    Blob(&'a [u8]),
    /// `n` zero bytes.
    ZeroBlob(u64),
    /// Typed opaque pointer.
    Pointer(Pointer),
    /// Engine value copied with `bind_value` / `result_value`.
    Value(&'a AnyValue),
}

/// Host types that can be encoded as a parameter or callback result.
pub trait ToSql {
    /// Describes the bind/result call for this value.
    fn to_sql(&self) -> DbResult<Encoded<'_>>;
}

/// Host types that can be decoded from a column or callback argument.
pub trait FromSql: Sized {
    /// Decodes `value`, copying out of engine memory where needed.
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self>;
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        (**self).to_sql()
    }
}

impl<T: ToSql + ?Sized> ToSql for Box<T> {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        (**self).to_sql()
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(Encoded::Null),
        }
    }
}

fn out_of_range<T>(v: i64) -> DbError {
    DbError::Conversion(format!(
        "integer {v} out of range for {}",
        std::any::type_name::<T>()
    ))
}

macro_rules! int32_sql {
    ($($t:ty),*) => {$(
        impl ToSql for $t {
            fn to_sql(&self) -> DbResult<Encoded<'_>> {
                Ok(Encoded::Int(i32::from(*self)))
            }
        }

        impl FromSql for $t {
            fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
                let v = value.as_i64();
                <$t>::try_from(v).map_err(|_| out_of_range::<$t>(v))
            }
        }
    )*};
}

macro_rules! int64_sql {
    ($($t:ty),*) => {$(
        impl ToSql for $t {
            fn to_sql(&self) -> DbResult<Encoded<'_>> {
                let v = i64::try_from(*self).map_err(|_| {
                    DbError::Conversion(format!("integer {self} out of range for i64"))
                })?;
                Ok(Encoded::Int64(v))
            }
        }

        impl FromSql for $t {
            fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
                let v = value.as_i64();
                <$t>::try_from(v).map_err(|_| out_of_range::<$t>(v))
            }
        }
    )*};
}

macro_rules! uint64_sql {
    ($($t:ty),*) => {$(
        impl ToSql for $t {
            #[allow(clippy::cast_possible_wrap)]
            fn to_sql(&self) -> DbResult<Encoded<'_>> {
                Ok(Encoded::Int64(*self as i64))
            }
        }

        impl FromSql for $t {
            #[allow(clippy::cast_sign_loss)]
            fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
                Ok(value.as_i64() as $t)
            }
        }
    )*};
}

int32_sql!(i8, i16, i32, u8, u16);

impl ToSql for u32 {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        // Values past i32::MAX widen to the 64-bit path rather than wrap.
        Ok(i32::try_from(*self).map_or(Encoded::Int64(i64::from(*self)), Encoded::Int))
    }
}

impl FromSql for u32 {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        let v = value.as_i64();
        Self::try_from(v).map_err(|_| out_of_range::<Self>(v))
    }
}
int64_sql!(isize);

impl ToSql for i64 {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Int64(*self))
    }
}

impl FromSql for i64 {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(value.as_i64())
    }
}

// Unsigned 64-bit values are stored bit-for-bit in the signed column.
uint64_sql!(u64, usize);

impl ToSql for bool {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Int(i32::from(*self)))
    }
}

impl FromSql for bool {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(value.as_i64() != 0)
    }
}

impl ToSql for f64 {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Double(*self))
    }
}

impl FromSql for f64 {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(value.as_f64())
    }
}

impl ToSql for f32 {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Double(f64::from(*self)))
    }
}

impl FromSql for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(value.as_f64() as Self)
    }
}

impl ToSql for str {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Text(self))
    }
}

impl ToSql for String {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Text(self.as_str()))
    }
}

impl FromSql for String {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Blob(self))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Blob(self.as_slice()))
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(value.as_blob().to_vec())
    }
}

impl<const N: usize> ToSql for [u8; N] {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Blob(self.as_slice()))
    }
}

impl ToSql for Utf16String {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Text16(&self.0))
    }
}

impl FromSql for Utf16String {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(Self(value.text16()))
    }
}

impl ToSql for EncodedText {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::EncodedText {
            bytes: &self.bytes,
            encoding: self.encoding,
        })
    }
}

impl ToSql for ZeroBlob {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::ZeroBlob(self.0))
    }
}

impl ToSql for Null {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Null)
    }
}

impl ToSql for Pointer {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Pointer(*self))
    }
}

impl ToSql for AnyValue {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(Encoded::Value(self))
    }
}

impl FromSql for AnyValue {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        value.to_any()
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        Ok(match self {
            Self::Null => Encoded::Null,
            Self::Integer(v) => Encoded::Int64(*v),
            Self::Real(v) => Encoded::Double(*v),
            Self::Text(v) => Encoded::Text(v),
            Self::Blob(v) => Encoded::Blob(v),
        })
    }
}

impl FromSql for Value {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        Ok(match value.value_type() {
            ValueType::Null => Self::Null,
            ValueType::Integer => Self::Integer(value.as_i64()),
            ValueType::Float => Self::Real(value.as_f64()),
            ValueType::Text => Self::Text(value.as_str()?.to_owned()),
            ValueType::Blob => Self::Blob(value.as_blob().to_vec()),
        })
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        if value.value_type() == ValueType::Null {
            Ok(None)
        } else {
            T::from_sql(value).map(Some)
        }
    }
}

/// Timestamps are stored as whole seconds since the Unix epoch.
impl ToSql for SystemTime {
    fn to_sql(&self) -> DbResult<Encoded<'_>> {
        let seconds = match self.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_secs()),
            Err(before) => i64::try_from(before.duration().as_secs()).map(|s| -s),
        }
        .map_err(|_| DbError::Conversion("timestamp out of range".to_string()))?;
        Ok(Encoded::Int64(seconds))
    }
}

impl FromSql for SystemTime {
    fn from_sql(value: ValueRef<'_>) -> DbResult<Self> {
        let seconds = value.as_i64();
        let offset = Duration::from_secs(seconds.unsigned_abs());
        let time = if seconds >= 0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        };
        time.ok_or_else(|| DbError::Conversion(format!("timestamp {seconds} out of range")))
    }
}

#[derive(Clone, Copy)]
enum Source {
    Column {
        stmt: *mut ffi::sqlite3_stmt,
        index: c_int,
    },
    Value(*mut ffi::sqlite3_value),
}

/// A borrowed engine value: a column of the current row or a callback
/// argument.
///
/// Valid only for `'a`, which ends before the owning statement can step or
/// reset, or when the callback that received it returns.
#[derive(Clone, Copy)]
pub struct ValueRef<'a> {
    source: Source,
    _marker: PhantomData<&'a ()>,
}

impl<'a> ValueRef<'a> {
    pub(crate) const fn from_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Self {
        Self {
            source: Source::Column { stmt, index },
            _marker: PhantomData,
        }
    }

    pub(crate) const fn from_value(value: *mut ffi::sqlite3_value) -> Self {
        Self {
            source: Source::Value(value),
            _marker: PhantomData,
        }
    }

    /// Storage class of the value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        // Safety: the source handle is valid for 'a.
        let raw = unsafe {
            match self.source {
                Source::Column { stmt, index } => ffi::sqlite3_column_type(stmt, index),
                Source::Value(v) => ffi::sqlite3_value_type(v),
            }
        };
        ValueType::from_raw(raw)
    }

    /// `true` if the value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value_type() == ValueType::Null
    }

    /// Reads the value through the 32-bit integer path.
    #[must_use]
    pub fn as_i32(&self) -> i32 {
        // Safety: the source handle is valid for 'a.
        unsafe {
            match self.source {
                Source::Column { stmt, index } => ffi::sqlite3_column_int(stmt, index),
                Source::Value(v) => ffi::sqlite3_value_int(v),
            }
        }
    }

    /// Reads the value through the 64-bit integer path.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        // Safety: the source handle is valid for 'a.
        unsafe {
            match self.source {
                Source::Column { stmt, index } => ffi::sqlite3_column_int64(stmt, index),
                Source::Value(v) => ffi::sqlite3_value_int64(v),
            }
        }
    }

    /// Reads the value as a double.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        // Safety: the source handle is valid for 'a.
        unsafe {
            match self.source {
                Source::Column { stmt, index } => ffi::sqlite3_column_double(stmt, index),
                Source::Value(v) => ffi::sqlite3_value_double(v),
            }
        }
    }

    /// Borrows the bytes of the value's one stable representation.
    ///
    /// Blobs are read through the blob accessor and every other class
    /// through the UTF-8 text accessor. Once made, that representation is
    /// never converted again, so earlier borrows stay valid for 'a.
    fn raw_bytes(&self) -> &'a [u8] {
        let value_type = self.value_type();
        if value_type == ValueType::Null {
            return &[];
        }
        // Safety: the source handle is valid for 'a; the byte count is read
        // after the data pointer, as SQLite requires.
        unsafe {
            let (ptr, len) = match (value_type, self.source) {
                (ValueType::Blob, Source::Column { stmt, index }) => (
                    ffi::sqlite3_column_blob(stmt, index),
                    ffi::sqlite3_column_bytes(stmt, index),
                ),
                (ValueType::Blob, Source::Value(v)) => {
                    (ffi::sqlite3_value_blob(v), ffi::sqlite3_value_bytes(v))
                }
                (_, Source::Column { stmt, index }) => (
                    ffi::sqlite3_column_text(stmt, index).cast(),
                    ffi::sqlite3_column_bytes(stmt, index),
                ),
                (_, Source::Value(v)) => {
                    (ffi::sqlite3_value_text(v).cast(), ffi::sqlite3_value_bytes(v))
                }
            };
            raw_slice(ptr.cast(), len)
        }
    }

    /// Borrows the value as UTF-8 text. NULL reads as the empty string and
    /// a blob must hold valid UTF-8.
    pub fn as_str(&self) -> DbResult<&'a str> {
        std::str::from_utf8(self.raw_bytes())
            .map_err(|e| DbError::Conversion(format!("invalid UTF-8 text: {e}")))
    }

    /// Borrows the value as bytes. Text reads as its UTF-8 bytes and NULL as
    /// an empty slice.
    #[must_use]
    pub fn as_blob(&self) -> &'a [u8] {
        self.raw_bytes()
    }

    /// Copies the value out as native-order UTF-16 code units.
    ///
    /// Transcoded from the UTF-8 text; invalid sequences become U+FFFD.
    #[must_use]
    pub fn text16(&self) -> Vec<u16> {
        String::from_utf8_lossy(self.raw_bytes()).encode_utf16().collect()
    }

    /// Copies the value out as text in the requested encoding.
    pub fn text_encoded(&self, encoding: Encoding) -> DbResult<EncodedText> {
        let wanted = encoding.resolved();
        let bytes = if wanted == Encoding::Utf8 {
            self.as_str()?.as_bytes().to_vec()
        } else {
            let units = self.as_str()?.encode_utf16();
            if wanted == Encoding::Utf16Be {
                units.flat_map(u16::to_be_bytes).collect()
            } else {
                units.flat_map(u16::to_le_bytes).collect()
            }
        };
        EncodedText::new(encoding, bytes)
    }

    /// Number of bytes in [`as_blob`](Self::as_blob).
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.raw_bytes().len()
    }

    /// Recovers a typed pointer, failing unless it was bound with `tag`.
    pub fn pointer(&self, tag: &CStr) -> DbResult<*mut c_void> {
        // Safety: the source handle is valid for 'a; sqlite3_value_pointer
        // returns null unless the value carries a pointer with this tag.
        let ptr = unsafe { ffi::sqlite3_value_pointer(self.raw_value(), tag.as_ptr()) };
        if ptr.is_null() {
            Err(DbError::Conversion(format!(
                "value is not a pointer tagged {}",
                tag.to_string_lossy()
            )))
        } else {
            Ok(ptr)
        }
    }

    /// Duplicates the value so it outlives its row or callback.
    pub fn to_any(&self) -> DbResult<AnyValue> {
        // Safety: the source handle is valid for 'a.
        unsafe { AnyValue::dup(self.raw_value()) }
    }

    /// Subtype attached by the function that produced the value, or zero.
    #[must_use]
    pub fn subtype(&self) -> u32 {
        // Safety: the source handle is valid for 'a.
        unsafe { ffi::sqlite3_value_subtype(self.raw_value()) }
    }

    /// `true` inside a virtual-table UPDATE when the column is unchanged.
    #[must_use]
    pub fn no_change(&self) -> bool {
        match self.source {
            // Safety: argument values are valid for 'a.
            Source::Value(v) => unsafe { ffi::sqlite3_value_nochange(v) != 0 },
            Source::Column { .. } => false,
        }
    }

    /// Decodes the value as `T`.
    pub fn get<T: FromSql>(self) -> DbResult<T> {
        T::from_sql(self)
    }

    fn raw_value(&self) -> *mut ffi::sqlite3_value {
        match self.source {
            // Safety: valid column of a statement positioned on a row.
            Source::Column { stmt, index } => unsafe { ffi::sqlite3_column_value(stmt, index) },
            Source::Value(v) => v,
        }
    }
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("type", &self.value_type())
            .finish_non_exhaustive()
    }
}

/// Borrows `len` bytes at `ptr`, treating null or non-positive lengths as
/// empty.
///
/// # Safety
///
/// `ptr` must be null or valid for `len` bytes for `'a`.
unsafe fn raw_slice<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    match usize::try_from(len) {
        Ok(len) if len > 0 && !ptr.is_null() => std::slice::from_raw_parts(ptr, len),
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_text_keeps_its_tag() {
        let le = EncodedText::encode("hé", Encoding::Utf16Le);
        assert_eq!(le.as_bytes(), &[b'h', 0, 0xe9, 0]);
        assert!(le.as_utf8().is_err());
        assert_eq!(le.decode().expect("decode"), "hé");

        let be = EncodedText::encode("hé", Encoding::Utf16Be);
        assert_eq!(be.as_bytes(), &[0, b'h', 0, 0xe9]);
        assert_eq!(be.decode().expect("decode"), "hé");
    }

    #[test]
    fn test_odd_utf16_length_rejected() {
        assert!(matches!(
            EncodedText::new(Encoding::Utf16Le, vec![1, 2, 3]),
            Err(DbError::Conversion(_))
        ));
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_timestamp_encoding() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert!(matches!(t.to_sql(), Ok(Encoded::Int64(1_700_000_000))));
        let before = UNIX_EPOCH - Duration::from_secs(60);
        assert!(matches!(before.to_sql(), Ok(Encoded::Int64(-60))));
    }

    #[test]
    fn test_integer_width_paths() {
        assert!(matches!(7_u16.to_sql(), Ok(Encoded::Int(7))));
        assert!(matches!(u32::MAX.to_sql(), Ok(Encoded::Int64(4_294_967_295))));
        assert!(matches!((-5_i8).to_sql(), Ok(Encoded::Int(-5))));
        assert!(matches!(u64::MAX.to_sql(), Ok(Encoded::Int64(-1))));
        assert!(matches!(7_i64.to_sql(), Ok(Encoded::Int64(7))));
        assert!(matches!(1.5_f32.to_sql(), Ok(Encoded::Double(v)) if (v - 1.5).abs() < f64::EPSILON));
    }
}
