//! Conversion between caller values and the native buffers bound to the driver.
//!
//! Every SQL type the engine binds has exactly one [`NativeBuffer`] case. Encoding picks the
//! case from the declared [`SqlType`], decoding dispatches on the case alone, so output
//! parameters and result columns share one decode path.

use crate::error::OdbcMiddlewareError;
use crate::native::{
    CDataType, SQL_NULL_DATA, SQL_WCHAR_WIDTH, SqlDataType, SqlDateStruct, SqlNumericStruct,
    SqlTimestampStruct,
};
use crate::types::{NumericValue, SqlType, SqlValue};

/// Column buffers for unbounded (long) columns are capped at this many characters or bytes.
pub const MAX_COLUMN_BUFFER: usize = 64 * 1024;

/// Native storage for one bound parameter or fetched column.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeBuffer {
    Null,
    Bit(u8),
    TinyInt(i32),
    SmallInt(i32),
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Char(Vec<u8>),
    VarChar(Vec<u8>),
    NChar(Vec<u16>),
    NVarChar(Vec<u16>),
    Binary(Vec<u8>),
    VarBinary(Vec<u8>),
    Date(SqlDateStruct),
    Timestamp(SqlTimestampStruct),
    Numeric(SqlNumericStruct),
    /// Procedure return code bound ahead of the declared parameters.
    ReturnCode(i16),
    /// Placeholder for a parameter whose payload is streamed while the statement waits.
    DataAtExec { sql_type: SqlDataType, c_type: CDataType },
}

/// A freshly encoded buffer plus the bind metadata derived from the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub buffer: NativeBuffer,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub indicator: isize,
}

impl Encoded {
    fn sized(buffer: NativeBuffer, column_size: usize, decimal_digits: i16) -> Self {
        let indicator = isize::try_from(buffer.buffer_length()).unwrap_or(isize::MAX);
        Self {
            buffer,
            column_size,
            decimal_digits,
            indicator,
        }
    }

    fn null(buffer: NativeBuffer, column_size: usize) -> Self {
        Self {
            buffer,
            column_size,
            decimal_digits: 0,
            indicator: SQL_NULL_DATA,
        }
    }
}

impl NativeBuffer {
    #[must_use]
    pub fn c_type(&self) -> CDataType {
        match self {
            NativeBuffer::Null | NativeBuffer::Char(_) | NativeBuffer::VarChar(_) => CDataType::Char,
            NativeBuffer::Bit(_) => CDataType::Bit,
            NativeBuffer::TinyInt(_) | NativeBuffer::SmallInt(_) | NativeBuffer::Integer(_) => {
                CDataType::SLong
            }
            NativeBuffer::BigInt(_) => CDataType::SBigInt,
            NativeBuffer::Double(_) => CDataType::Double,
            NativeBuffer::NChar(_) | NativeBuffer::NVarChar(_) => CDataType::WChar,
            NativeBuffer::Binary(_) | NativeBuffer::VarBinary(_) => CDataType::Binary,
            NativeBuffer::Date(_) => CDataType::TypeDate,
            NativeBuffer::Timestamp(_) => CDataType::TypeTimestamp,
            NativeBuffer::Numeric(_) => CDataType::Numeric,
            NativeBuffer::ReturnCode(_) => CDataType::SShort,
            NativeBuffer::DataAtExec { c_type, .. } => *c_type,
        }
    }

    #[must_use]
    pub fn sql_type(&self) -> SqlDataType {
        match self {
            NativeBuffer::Null | NativeBuffer::VarChar(_) => SqlDataType::VarChar,
            NativeBuffer::Bit(_) => SqlDataType::Bit,
            NativeBuffer::TinyInt(_) => SqlDataType::TinyInt,
            NativeBuffer::SmallInt(_) => SqlDataType::SmallInt,
            NativeBuffer::Integer(_) | NativeBuffer::ReturnCode(_) => SqlDataType::Integer,
            NativeBuffer::BigInt(_) => SqlDataType::BigInt,
            NativeBuffer::Double(_) => SqlDataType::Double,
            NativeBuffer::Char(_) => SqlDataType::Char,
            NativeBuffer::NChar(_) => SqlDataType::WChar,
            NativeBuffer::NVarChar(_) => SqlDataType::WVarChar,
            NativeBuffer::Binary(_) => SqlDataType::Binary,
            NativeBuffer::VarBinary(_) => SqlDataType::VarBinary,
            NativeBuffer::Date(_) => SqlDataType::TypeDate,
            NativeBuffer::Timestamp(_) => SqlDataType::TypeTimestamp,
            NativeBuffer::Numeric(_) => SqlDataType::Numeric,
            NativeBuffer::DataAtExec { sql_type, .. } => *sql_type,
        }
    }

    /// Size in bytes of the storage handed to the driver.
    #[must_use]
    pub fn buffer_length(&self) -> usize {
        match self {
            NativeBuffer::Null | NativeBuffer::DataAtExec { .. } => 0,
            NativeBuffer::Bit(_) => 1,
            NativeBuffer::ReturnCode(_) => 2,
            NativeBuffer::TinyInt(_) | NativeBuffer::SmallInt(_) | NativeBuffer::Integer(_) => 4,
            NativeBuffer::BigInt(_) | NativeBuffer::Double(_) => 8,
            NativeBuffer::Char(bytes)
            | NativeBuffer::VarChar(bytes)
            | NativeBuffer::Binary(bytes)
            | NativeBuffer::VarBinary(bytes) => bytes.len(),
            NativeBuffer::NChar(units) | NativeBuffer::NVarChar(units) => {
                units.len() * SQL_WCHAR_WIDTH
            }
            NativeBuffer::Date(_) => SqlDateStruct::SIZE,
            NativeBuffer::Timestamp(_) => SqlTimestampStruct::SIZE,
            NativeBuffer::Numeric(_) => SqlNumericStruct::SIZE,
        }
    }

    /// Whether this case owns heap storage.
    #[must_use]
    pub fn is_heap(&self) -> bool {
        matches!(
            self,
            NativeBuffer::Char(_)
                | NativeBuffer::VarChar(_)
                | NativeBuffer::NChar(_)
                | NativeBuffer::NVarChar(_)
                | NativeBuffer::Binary(_)
                | NativeBuffer::VarBinary(_)
        )
    }

    /// Drop any heap storage, leaving an empty buffer of the same case. Returns the number of
    /// bytes released; a second call releases nothing.
    pub fn release(&mut self) -> usize {
        let released = if self.is_heap() { self.buffer_length() } else { 0 };
        match self {
            NativeBuffer::Char(bytes)
            | NativeBuffer::VarChar(bytes)
            | NativeBuffer::Binary(bytes)
            | NativeBuffer::VarBinary(bytes) => *bytes = Vec::new(),
            NativeBuffer::NChar(units) | NativeBuffer::NVarChar(units) => *units = Vec::new(),
            _ => {}
        }
        released
    }

    /// Host-order image of the buffer, exactly as a C driver would see it.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            NativeBuffer::Null | NativeBuffer::DataAtExec { .. } => Vec::new(),
            NativeBuffer::Bit(v) => vec![*v],
            NativeBuffer::TinyInt(v) | NativeBuffer::SmallInt(v) | NativeBuffer::Integer(v) => {
                v.to_ne_bytes().to_vec()
            }
            NativeBuffer::BigInt(v) => v.to_ne_bytes().to_vec(),
            NativeBuffer::Double(v) => v.to_ne_bytes().to_vec(),
            NativeBuffer::ReturnCode(v) => v.to_ne_bytes().to_vec(),
            NativeBuffer::Char(bytes)
            | NativeBuffer::VarChar(bytes)
            | NativeBuffer::Binary(bytes)
            | NativeBuffer::VarBinary(bytes) => bytes.clone(),
            NativeBuffer::NChar(units) | NativeBuffer::NVarChar(units) => {
                units.iter().flat_map(|u| u.to_ne_bytes()).collect()
            }
            NativeBuffer::Date(d) => d.to_bytes().to_vec(),
            NativeBuffer::Timestamp(t) => t.to_bytes().to_vec(),
            NativeBuffer::Numeric(n) => n.to_bytes().to_vec(),
        }
    }

    /// Store bytes the driver produced. Variable-length buffers keep their allocated size and
    /// truncate longer input the way a C buffer would.
    ///
    /// # Errors
    /// Returns `ValidationError` when a fixed-size image is too short, or `Unsupported` for
    /// buffers the driver never writes.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), OdbcMiddlewareError> {
        match self {
            NativeBuffer::Bit(v) => *v = fixed::<1>(bytes)?[0],
            NativeBuffer::TinyInt(v) | NativeBuffer::SmallInt(v) | NativeBuffer::Integer(v) => {
                *v = i32::from_ne_bytes(fixed::<4>(bytes)?);
            }
            NativeBuffer::BigInt(v) => *v = i64::from_ne_bytes(fixed::<8>(bytes)?),
            NativeBuffer::Double(v) => *v = f64::from_ne_bytes(fixed::<8>(bytes)?),
            NativeBuffer::ReturnCode(v) => *v = i16::from_ne_bytes(fixed::<2>(bytes)?),
            NativeBuffer::Char(buf)
            | NativeBuffer::VarChar(buf)
            | NativeBuffer::Binary(buf)
            | NativeBuffer::VarBinary(buf) => {
                let len = buf.len().min(bytes.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                buf[len..].fill(0);
            }
            NativeBuffer::NChar(units) | NativeBuffer::NVarChar(units) => {
                let incoming = bytes.chunks_exact(SQL_WCHAR_WIDTH);
                let len = units.len().min(incoming.len());
                for (slot, pair) in units.iter_mut().zip(incoming) {
                    *slot = u16::from_ne_bytes([pair[0], pair[1]]);
                }
                units[len..].fill(0);
            }
            NativeBuffer::Date(d) => *d = SqlDateStruct::from_bytes(bytes)?,
            NativeBuffer::Timestamp(t) => *t = SqlTimestampStruct::from_bytes(bytes)?,
            NativeBuffer::Numeric(n) => *n = SqlNumericStruct::from_bytes(bytes)?,
            NativeBuffer::Null | NativeBuffer::DataAtExec { .. } => {
                return Err(OdbcMiddlewareError::Unsupported(format!(
                    "driver cannot write into a {:?} buffer",
                    self.sql_type()
                )));
            }
        }
        Ok(())
    }

    /// Decode the buffer into a caller value. `indicator` is the length-or-indicator the driver
    /// reported for this buffer.
    ///
    /// # Errors
    /// Returns `ValidationError` when date/time fields are out of range, or `Unsupported` for a
    /// data-at-execution placeholder.
    pub fn decode(&self, indicator: isize) -> Result<SqlValue, OdbcMiddlewareError> {
        if indicator == SQL_NULL_DATA {
            return Ok(SqlValue::Null);
        }
        let value = match self {
            NativeBuffer::Null => SqlValue::Null,
            NativeBuffer::Bit(v) => SqlValue::Bool(*v != 0),
            NativeBuffer::TinyInt(v) | NativeBuffer::SmallInt(v) | NativeBuffer::Integer(v) => {
                SqlValue::Int(*v)
            }
            NativeBuffer::BigInt(v) => SqlValue::BigInt(*v),
            NativeBuffer::Double(v) => SqlValue::Double(*v),
            NativeBuffer::ReturnCode(v) => SqlValue::Int(i32::from(*v)),
            NativeBuffer::Char(bytes) | NativeBuffer::VarChar(bytes) => {
                let bytes = &bytes[..reported_len(indicator, bytes.len())];
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                SqlValue::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            NativeBuffer::NChar(units) | NativeBuffer::NVarChar(units) => {
                let byte_len = reported_len(indicator, units.len() * SQL_WCHAR_WIDTH);
                let units = &units[..byte_len / SQL_WCHAR_WIDTH];
                let end = units.iter().position(|u| *u == 0).unwrap_or(units.len());
                SqlValue::Text(String::from_utf16_lossy(&units[..end]))
            }
            NativeBuffer::Binary(bytes) | NativeBuffer::VarBinary(bytes) => {
                SqlValue::Binary(bytes[..reported_len(indicator, bytes.len())].to_vec())
            }
            NativeBuffer::Date(d) => SqlValue::Date(d.to_date()?),
            NativeBuffer::Timestamp(t) => SqlValue::Timestamp(t.to_datetime()?),
            NativeBuffer::Numeric(n) => SqlValue::Numeric(NumericValue::from_native(n)),
            NativeBuffer::DataAtExec { .. } => {
                return Err(OdbcMiddlewareError::Unsupported(
                    "data-at-execution parameters carry no value to decode".into(),
                ));
            }
        };
        Ok(value)
    }

    /// Declared type this buffer case encodes.
    #[must_use]
    pub fn declared_type(&self) -> Option<SqlType> {
        let ty = match self {
            NativeBuffer::Null => SqlType::Null,
            NativeBuffer::Bit(_) => SqlType::Bit,
            NativeBuffer::TinyInt(_) => SqlType::TinyInt,
            NativeBuffer::SmallInt(_) | NativeBuffer::ReturnCode(_) => SqlType::SmallInt,
            NativeBuffer::Integer(_) => SqlType::Int32,
            NativeBuffer::BigInt(_) => SqlType::BigInt,
            NativeBuffer::Double(_) => SqlType::Real,
            NativeBuffer::Char(_) => SqlType::Char,
            NativeBuffer::VarChar(_) => SqlType::VarChar,
            NativeBuffer::NChar(_) => SqlType::NChar,
            NativeBuffer::NVarChar(_) => SqlType::NVarChar,
            NativeBuffer::Binary(_) => SqlType::Binary,
            NativeBuffer::VarBinary(_) => SqlType::VarBinary,
            NativeBuffer::Date(_) => SqlType::Date,
            NativeBuffer::Timestamp(_) => SqlType::Timestamp,
            NativeBuffer::Numeric(_) => SqlType::Numeric,
            NativeBuffer::DataAtExec { .. } => return None,
        };
        Some(ty)
    }

    /// Write `value` into this buffer the way a driver fills a bound or fetched buffer, and
    /// return the length-or-indicator it would report. Text and binary report their full
    /// length even when the allocation truncates them.
    ///
    /// # Errors
    /// Returns `ValidationError` when the value does not fit this buffer's type.
    pub fn store_value(&mut self, value: &SqlValue) -> Result<isize, OdbcMiddlewareError> {
        if value.is_null() {
            return Ok(SQL_NULL_DATA);
        }
        if let NativeBuffer::ReturnCode(code) = self {
            let raw = value.as_int().ok_or_else(|| mismatch(SqlType::SmallInt, value))?;
            *code = i16::try_from(raw).map_err(|_| {
                OdbcMiddlewareError::validation(format!("return code {raw} exceeds SMALLINT"))
            })?;
            return Ok(2);
        }
        let ty = self.declared_type().ok_or_else(|| {
            OdbcMiddlewareError::Unsupported("driver cannot write a data-at-execution buffer".into())
        })?;
        let encoded = encode(ty, value)?;
        self.load_bytes(&encoded.buffer.to_bytes())?;
        Ok(encoded.indicator)
    }

    /// Allocate a buffer suitable for fetching a result column of the described type.
    #[must_use]
    pub fn for_column(sql_type: SqlDataType, column_size: usize) -> Self {
        let chars = if column_size == 0 {
            MAX_COLUMN_BUFFER
        } else {
            column_size.min(MAX_COLUMN_BUFFER)
        };
        match sql_type {
            SqlDataType::Bit => NativeBuffer::Bit(0),
            SqlDataType::TinyInt => NativeBuffer::TinyInt(0),
            SqlDataType::SmallInt => NativeBuffer::SmallInt(0),
            SqlDataType::Integer => NativeBuffer::Integer(0),
            SqlDataType::BigInt => NativeBuffer::BigInt(0),
            SqlDataType::Float | SqlDataType::Real | SqlDataType::Double => NativeBuffer::Double(0.0),
            SqlDataType::Numeric | SqlDataType::Decimal => {
                NativeBuffer::Numeric(SqlNumericStruct::default())
            }
            SqlDataType::TypeDate => NativeBuffer::Date(SqlDateStruct::default()),
            SqlDataType::TypeTimestamp => NativeBuffer::Timestamp(SqlTimestampStruct::default()),
            SqlDataType::Char | SqlDataType::VarChar | SqlDataType::LongVarChar => {
                NativeBuffer::VarChar(vec![0; chars])
            }
            SqlDataType::Binary | SqlDataType::VarBinary | SqlDataType::LongVarBinary => {
                NativeBuffer::VarBinary(vec![0; chars])
            }
            SqlDataType::WChar
            | SqlDataType::WVarChar
            | SqlDataType::WLongVarChar
            | SqlDataType::Unknown => NativeBuffer::NVarChar(vec![0; chars]),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], OdbcMiddlewareError> {
    bytes
        .get(..N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| {
            OdbcMiddlewareError::validation(format!(
                "expected {N} bytes from driver, got {}",
                bytes.len()
            ))
        })
}

fn reported_len(indicator: isize, capacity: usize) -> usize {
    usize::try_from(indicator).map_or(capacity, |len| len.min(capacity))
}

fn mismatch(ty: SqlType, value: &SqlValue) -> OdbcMiddlewareError {
    OdbcMiddlewareError::validation(format!("value {value:?} cannot be bound as {ty:?}"))
}

fn int_in_range(
    ty: SqlType,
    value: &SqlValue,
    min: i64,
    max: i64,
) -> Result<i32, OdbcMiddlewareError> {
    let raw = value.as_int().ok_or_else(|| mismatch(ty, value))?;
    if raw < min || raw > max {
        return Err(OdbcMiddlewareError::validation(format!(
            "{raw} is out of range for {ty:?}"
        )));
    }
    i32::try_from(raw).map_err(|_| mismatch(ty, value))
}

/// Fractional-second digits needed to carry `nanos` without loss.
fn timestamp_digits(nanos: u32) -> i16 {
    if nanos % 1_000_000 == 0 { 3 } else { 7 }
}

/// `yyyy-mm-dd hh:mm:ss` is 19 characters; a fraction adds the point plus its digits.
fn timestamp_column_size(digits: i16) -> usize {
    match usize::try_from(digits) {
        Ok(0) | Err(_) => 19,
        Ok(digits) => 20 + digits,
    }
}

/// Encode an input value for the declared type.
///
/// # Errors
/// Returns `ValidationError` when the value does not fit the declared type, and for declared
/// types that cannot carry a plain input value (streams and output markers).
pub fn encode(ty: SqlType, value: &SqlValue) -> Result<Encoded, OdbcMiddlewareError> {
    if value.is_null() {
        return encode_null(ty);
    }
    let encoded = match ty {
        SqlType::Null => return Err(mismatch(ty, value)),
        SqlType::Bit => {
            let flag = value.as_bool().ok_or_else(|| mismatch(ty, value))?;
            Encoded::sized(NativeBuffer::Bit(u8::from(flag)), 0, 0)
        }
        SqlType::TinyInt => Encoded::sized(
            NativeBuffer::TinyInt(int_in_range(ty, value, 0, 255)?),
            0,
            0,
        ),
        SqlType::SmallInt => Encoded::sized(
            NativeBuffer::SmallInt(int_in_range(
                ty,
                value,
                i64::from(i16::MIN),
                i64::from(i16::MAX),
            )?),
            0,
            0,
        ),
        SqlType::Int32 => Encoded::sized(
            NativeBuffer::Integer(int_in_range(
                ty,
                value,
                i64::from(i32::MIN),
                i64::from(i32::MAX),
            )?),
            0,
            0,
        ),
        SqlType::BigInt => {
            let raw = value.as_int().ok_or_else(|| mismatch(ty, value))?;
            Encoded::sized(NativeBuffer::BigInt(raw), 0, 0)
        }
        SqlType::Real => {
            let raw = match value {
                SqlValue::Double(v) => *v,
                SqlValue::Int(v) => f64::from(*v),
                _ => return Err(mismatch(ty, value)),
            };
            Encoded::sized(NativeBuffer::Double(raw), 0, 0)
        }
        SqlType::Char | SqlType::VarChar => {
            let text = value.as_text().ok_or_else(|| mismatch(ty, value))?;
            let bytes = text.as_bytes().to_vec();
            let size = bytes.len().max(1);
            let buffer = if ty == SqlType::Char {
                NativeBuffer::Char(bytes)
            } else {
                NativeBuffer::VarChar(bytes)
            };
            Encoded::sized(buffer, size, 0)
        }
        SqlType::NChar | SqlType::NVarChar => {
            let text = value.as_text().ok_or_else(|| mismatch(ty, value))?;
            let units: Vec<u16> = text.encode_utf16().collect();
            let size = units.len().max(1);
            let buffer = if ty == SqlType::NChar {
                NativeBuffer::NChar(units)
            } else {
                NativeBuffer::NVarChar(units)
            };
            Encoded::sized(buffer, size, 0)
        }
        SqlType::Binary | SqlType::VarBinary => {
            let bytes = value.as_binary().ok_or_else(|| mismatch(ty, value))?.to_vec();
            let size = bytes.len().max(1);
            let buffer = if ty == SqlType::Binary {
                NativeBuffer::Binary(bytes)
            } else {
                NativeBuffer::VarBinary(bytes)
            };
            Encoded::sized(buffer, size, 0)
        }
        SqlType::Date => {
            let date = match value {
                SqlValue::Date(d) => *d,
                SqlValue::Timestamp(t) => t.date(),
                _ => return Err(mismatch(ty, value)),
            };
            Encoded::sized(NativeBuffer::Date(SqlDateStruct::from_date(date)?), 10, 0)
        }
        SqlType::Timestamp => {
            let ts = value.as_timestamp().ok_or_else(|| mismatch(ty, value))?;
            let native = SqlTimestampStruct::from_datetime(ts)?;
            let digits = timestamp_digits(native.fraction);
            Encoded::sized(NativeBuffer::Timestamp(native), timestamp_column_size(digits), digits)
        }
        SqlType::Numeric => {
            let SqlValue::Numeric(numeric) = value else {
                return Err(mismatch(ty, value));
            };
            let native = numeric.to_native();
            Encoded::sized(
                NativeBuffer::Numeric(native),
                usize::from(native.precision),
                i16::from(native.scale),
            )
        }
        SqlType::LongVarChar | SqlType::LongNVarChar | SqlType::LongVarBinary => {
            return Err(OdbcMiddlewareError::validation(format!(
                "{ty:?} parameters must be supplied as a stream"
            )));
        }
        SqlType::SqlOutputVar => {
            return Err(OdbcMiddlewareError::validation(
                "output parameters must be declared with an output descriptor",
            ));
        }
    };
    Ok(encoded)
}

fn encode_null(ty: SqlType) -> Result<Encoded, OdbcMiddlewareError> {
    let buffer = match ty {
        SqlType::Null | SqlType::VarChar | SqlType::LongVarChar => NativeBuffer::Null,
        SqlType::Bit => NativeBuffer::Bit(0),
        SqlType::TinyInt => NativeBuffer::TinyInt(0),
        SqlType::SmallInt => NativeBuffer::SmallInt(0),
        SqlType::Int32 => NativeBuffer::Integer(0),
        SqlType::BigInt => NativeBuffer::BigInt(0),
        SqlType::Real => NativeBuffer::Double(0.0),
        SqlType::Char => NativeBuffer::Char(Vec::new()),
        SqlType::NChar => NativeBuffer::NChar(Vec::new()),
        SqlType::NVarChar | SqlType::LongNVarChar => NativeBuffer::NVarChar(Vec::new()),
        SqlType::Binary => NativeBuffer::Binary(Vec::new()),
        SqlType::VarBinary | SqlType::LongVarBinary => NativeBuffer::VarBinary(Vec::new()),
        SqlType::Date => NativeBuffer::Date(SqlDateStruct::default()),
        SqlType::Timestamp => NativeBuffer::Timestamp(SqlTimestampStruct::default()),
        SqlType::Numeric => NativeBuffer::Numeric(SqlNumericStruct::default()),
        SqlType::SqlOutputVar => {
            return Err(OdbcMiddlewareError::validation(
                "output parameters must be declared with an output descriptor",
            ));
        }
    };
    Ok(Encoded::null(buffer, 1))
}

/// Allocate the buffer an output parameter of the declared type is bound with.
///
/// `length` is in characters for text types; wide text allocates two bytes per character.
///
/// # Errors
/// Returns `Unsupported` for BINARY/VARBINARY outputs, and `ValidationError` for types that
/// have no output form or bounds the driver struct cannot hold.
pub fn allocate_output(
    ty: SqlType,
    length: usize,
    precision: u32,
    scale: u32,
) -> Result<Encoded, OdbcMiddlewareError> {
    let encoded = match ty {
        SqlType::Bit => Encoded::sized(NativeBuffer::Bit(0), 0, 0),
        SqlType::TinyInt => Encoded::sized(NativeBuffer::TinyInt(0), 0, 0),
        SqlType::SmallInt => Encoded::sized(NativeBuffer::SmallInt(0), 0, 0),
        SqlType::Int32 => Encoded::sized(NativeBuffer::Integer(0), 0, 0),
        SqlType::BigInt => Encoded::sized(NativeBuffer::BigInt(0), 0, 0),
        SqlType::Real => Encoded::sized(NativeBuffer::Double(0.0), 0, 0),
        SqlType::Char => Encoded::sized(NativeBuffer::Char(vec![0; length]), length, 0),
        SqlType::VarChar => Encoded::sized(NativeBuffer::VarChar(vec![0; length]), length, 0),
        SqlType::NChar => Encoded::sized(NativeBuffer::NChar(vec![0; length]), length, 0),
        SqlType::NVarChar => Encoded::sized(NativeBuffer::NVarChar(vec![0; length]), length, 0),
        SqlType::Binary | SqlType::VarBinary => {
            return Err(OdbcMiddlewareError::Unsupported(format!(
                "{ty:?} output parameters are not implemented"
            )));
        }
        SqlType::Date => Encoded::sized(NativeBuffer::Date(SqlDateStruct::default()), 10, 0),
        SqlType::Timestamp => {
            let digits = i16::try_from(scale).map_err(|_| {
                OdbcMiddlewareError::validation(format!("timestamp scale {scale} is out of range"))
            })?;
            Encoded::sized(
                NativeBuffer::Timestamp(SqlTimestampStruct::default()),
                timestamp_column_size(digits),
                digits,
            )
        }
        SqlType::Numeric => {
            let template = NumericValue::new(precision, scale, true, Vec::new())?;
            let native = template.to_native();
            Encoded::sized(
                NativeBuffer::Numeric(native),
                usize::from(native.precision),
                i16::from(native.scale),
            )
        }
        SqlType::Null
        | SqlType::LongVarChar
        | SqlType::LongNVarChar
        | SqlType::LongVarBinary
        | SqlType::SqlOutputVar => {
            return Err(OdbcMiddlewareError::validation(format!(
                "{ty:?} cannot be declared as an output parameter"
            )));
        }
    };
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn integer_family_shares_c_type() {
        for ty in [SqlType::TinyInt, SqlType::SmallInt, SqlType::Int32] {
            let encoded = encode(ty, &SqlValue::Int(7)).unwrap();
            assert_eq!(encoded.buffer.c_type(), CDataType::SLong);
            assert_eq!(encoded.buffer.buffer_length(), 4);
        }
        let small = encode(SqlType::SmallInt, &SqlValue::Int(7)).unwrap();
        assert_eq!(small.buffer.sql_type(), SqlDataType::SmallInt);
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        assert!(encode(SqlType::TinyInt, &SqlValue::Int(300)).is_err());
        assert!(encode(SqlType::SmallInt, &SqlValue::Int(40_000)).is_err());
        assert!(encode(SqlType::Int32, &SqlValue::BigInt(i64::MAX)).is_err());
    }

    #[test]
    fn wide_text_is_sized_in_bytes() {
        let encoded = encode(SqlType::NVarChar, &SqlValue::Text("héllo".into())).unwrap();
        assert_eq!(encoded.column_size, 5);
        assert_eq!(encoded.buffer.buffer_length(), 10);
        assert_eq!(encoded.indicator, 10);
    }

    #[test]
    fn wide_output_allocates_two_bytes_per_char() {
        let encoded = allocate_output(SqlType::NChar, 12, 0, 0).unwrap();
        assert_eq!(encoded.buffer.buffer_length(), 24);
        assert_eq!(encoded.buffer.c_type(), CDataType::WChar);
        let narrow = allocate_output(SqlType::VarChar, 12, 0, 0).unwrap();
        assert_eq!(narrow.buffer.buffer_length(), 12);
    }

    #[test]
    fn binary_outputs_are_unsupported() {
        for ty in [SqlType::Binary, SqlType::VarBinary] {
            let err = allocate_output(ty, 16, 0, 0).unwrap_err();
            assert!(matches!(err, OdbcMiddlewareError::Unsupported(_)));
        }
    }

    #[test]
    fn null_indicator_wins_over_contents() {
        let buffer = NativeBuffer::Integer(99);
        assert_eq!(buffer.decode(SQL_NULL_DATA).unwrap(), SqlValue::Null);
    }

    #[test]
    fn decode_respects_reported_length() {
        let mut buffer = NativeBuffer::VarChar(vec![0; 8]);
        buffer.load_bytes(b"abcdef").unwrap();
        assert_eq!(buffer.decode(3).unwrap(), SqlValue::Text("abc".into()));
        assert_eq!(buffer.decode(100).unwrap(), SqlValue::Text("abcdef".into()));
    }

    #[test]
    fn load_truncates_to_allocation() {
        let mut buffer = NativeBuffer::NVarChar(vec![0; 2]);
        let image: Vec<u8> = "wxyz".encode_utf16().flat_map(u16::to_ne_bytes).collect();
        buffer.load_bytes(&image).unwrap();
        assert_eq!(buffer.decode(8).unwrap(), SqlValue::Text("wx".into()));
    }

    #[test]
    fn timestamp_digits_track_precision() {
        let millis = NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_milli_opt(1, 2, 3, 456))
            .unwrap();
        let encoded = encode(SqlType::Timestamp, &SqlValue::Timestamp(millis)).unwrap();
        assert_eq!((encoded.column_size, encoded.decimal_digits), (23, 3));
    }

    #[test]
    fn timestamp_without_fraction_is_nineteen_wide() {
        let whole = allocate_output(SqlType::Timestamp, 0, 0, 0).unwrap();
        assert_eq!((whole.column_size, whole.decimal_digits), (19, 0));
        let millis = allocate_output(SqlType::Timestamp, 0, 0, 3).unwrap();
        assert_eq!((millis.column_size, millis.decimal_digits), (23, 3));
    }

    #[test]
    fn out_of_range_dates_fail_to_encode() {
        let far = NaiveDate::from_ymd_opt(-40_000, 6, 1).unwrap();
        let err = encode(SqlType::Date, &SqlValue::Date(far)).unwrap_err();
        assert!(matches!(err, OdbcMiddlewareError::ValidationError(_)));
        let stamp = far.and_hms_opt(1, 2, 3).unwrap();
        let err = encode(SqlType::Timestamp, &SqlValue::Timestamp(stamp)).unwrap_err();
        assert!(matches!(err, OdbcMiddlewareError::ValidationError(_)));
    }

    #[test]
    fn tinyint_is_unsigned() {
        assert!(encode(SqlType::TinyInt, &SqlValue::Int(0)).is_ok());
        assert!(encode(SqlType::TinyInt, &SqlValue::Int(255)).is_ok());
        assert!(encode(SqlType::TinyInt, &SqlValue::Int(-1)).is_err());
        assert!(encode(SqlType::TinyInt, &SqlValue::Int(256)).is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let mut buffer = NativeBuffer::VarBinary(vec![1, 2, 3]);
        assert_eq!(buffer.release(), 3);
        assert_eq!(buffer.release(), 0);
        assert_eq!(buffer.buffer_length(), 0);
    }

    #[test]
    fn stream_types_need_a_stream() {
        let err = encode(SqlType::LongVarBinary, &SqlValue::Binary(vec![1])).unwrap_err();
        assert!(matches!(err, OdbcMiddlewareError::ValidationError(_)));
    }
}
