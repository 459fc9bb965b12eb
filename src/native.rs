//! Driver ABI constants and the fixed-layout structs ODBC drivers read and write.
//!
//! The structs are kept as plain Rust values and converted to and from the exact byte image
//! the C headers declare (host byte order, no padding), so a driver binding can copy them
//! straight into or out of bound buffers.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::OdbcMiddlewareError;

/// Width of the magnitude buffer in `SQL_NUMERIC_STRUCT`.
pub const SQL_MAX_NUMERIC_LEN: usize = 16;

/// Bytes per wide character (`SQLWCHAR` is UTF-16).
pub const SQL_WCHAR_WIDTH: usize = 2;

pub const SQL_NULL_DATA: isize = -1;
pub const SQL_DATA_AT_EXEC: isize = -2;
pub const SQL_NTS: isize = -3;
const SQL_LEN_DATA_AT_EXEC_OFFSET: isize = -100;

/// Indicator value announcing `length` bytes of data supplied at execution time, or `None`
/// when the length cannot be expressed in an indicator.
#[must_use]
pub fn sql_len_data_at_exec(length: usize) -> Option<isize> {
    let length = isize::try_from(length).ok()?;
    SQL_LEN_DATA_AT_EXEC_OFFSET.checked_sub(length)
}

/// `SQL_ATTR_QUERY_TIMEOUT`
pub const SQL_ATTR_QUERY_TIMEOUT: i32 = 0;

/// Direction a parameter is bound with (`InputOutputType` of `SQLBindParameter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamDirection {
    Input = 1,
    InputOutput = 2,
    Output = 4,
}

impl ParamDirection {
    #[must_use]
    pub fn code(self) -> i16 {
        self as i16
    }

    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, ParamDirection::Output | ParamDirection::InputOutput)
    }
}

/// C buffer type identifiers (`SQL_C_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CDataType {
    Char = 1,
    Numeric = 2,
    Double = 8,
    Bit = -7,
    WChar = -8,
    Binary = -2,
    SShort = -15,
    SLong = -16,
    SBigInt = -25,
    TypeDate = 91,
    TypeTimestamp = 93,
}

impl CDataType {
    #[must_use]
    pub fn code(self) -> i16 {
        self as i16
    }
}

/// SQL data type identifiers (`SQL_*`) as reported to and by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDataType {
    Unknown = 0,
    Char = 1,
    Numeric = 2,
    Decimal = 3,
    Integer = 4,
    SmallInt = 5,
    Float = 6,
    Real = 7,
    Double = 8,
    VarChar = 12,
    TypeDate = 91,
    TypeTimestamp = 93,
    LongVarChar = -1,
    Binary = -2,
    VarBinary = -3,
    LongVarBinary = -4,
    BigInt = -5,
    TinyInt = -6,
    Bit = -7,
    WChar = -8,
    WVarChar = -9,
    WLongVarChar = -10,
}

impl SqlDataType {
    #[must_use]
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Map a raw type code from `SQLDescribeCol`; unrecognized codes become `Unknown`.
    #[must_use]
    pub fn from_code(code: i16) -> Self {
        match code {
            1 => SqlDataType::Char,
            2 => SqlDataType::Numeric,
            3 => SqlDataType::Decimal,
            4 => SqlDataType::Integer,
            5 => SqlDataType::SmallInt,
            6 => SqlDataType::Float,
            7 => SqlDataType::Real,
            8 => SqlDataType::Double,
            12 => SqlDataType::VarChar,
            9 | 91 => SqlDataType::TypeDate,
            11 | 93 => SqlDataType::TypeTimestamp,
            -1 => SqlDataType::LongVarChar,
            -2 => SqlDataType::Binary,
            -3 => SqlDataType::VarBinary,
            -4 => SqlDataType::LongVarBinary,
            -5 => SqlDataType::BigInt,
            -6 => SqlDataType::TinyInt,
            -7 => SqlDataType::Bit,
            -8 => SqlDataType::WChar,
            -9 => SqlDataType::WVarChar,
            -10 => SqlDataType::WLongVarChar,
            _ => SqlDataType::Unknown,
        }
    }

    /// Type name reported in column metadata.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SqlDataType::Unknown => "unknown",
            SqlDataType::Char => "char",
            SqlDataType::Numeric => "numeric",
            SqlDataType::Decimal => "decimal",
            SqlDataType::Integer => "int",
            SqlDataType::SmallInt => "smallint",
            SqlDataType::Float => "float",
            SqlDataType::Real => "real",
            SqlDataType::Double => "double",
            SqlDataType::VarChar => "varchar",
            SqlDataType::TypeDate => "date",
            SqlDataType::TypeTimestamp => "timestamp",
            SqlDataType::LongVarChar => "text",
            SqlDataType::Binary => "binary",
            SqlDataType::VarBinary => "varbinary",
            SqlDataType::LongVarBinary => "image",
            SqlDataType::BigInt => "bigint",
            SqlDataType::TinyInt => "tinyint",
            SqlDataType::Bit => "bit",
            SqlDataType::WChar => "nchar",
            SqlDataType::WVarChar => "nvarchar",
            SqlDataType::WLongVarChar => "ntext",
        }
    }
}

/// `DATE_STRUCT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlDateStruct {
    pub year: i16,
    pub month: u16,
    pub day: u16,
}

impl SqlDateStruct {
    pub const SIZE: usize = 6;

    /// # Errors
    /// Returns `ValidationError` when the year does not fit the struct's `SQLSMALLINT`.
    pub fn from_date(date: NaiveDate) -> Result<Self, OdbcMiddlewareError> {
        let year = i16::try_from(date.year()).map_err(|_| {
            OdbcMiddlewareError::validation(format!("year {} is out of range for DATE", date.year()))
        })?;
        Ok(Self {
            year,
            month: calendar_field(date.month()),
            day: calendar_field(date.day()),
        })
    }

    /// # Errors
    /// Returns `ValidationError` when the fields do not name a calendar date.
    pub fn to_date(self) -> Result<NaiveDate, OdbcMiddlewareError> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))
            .ok_or_else(|| {
                OdbcMiddlewareError::validation(format!(
                    "invalid date {}-{}-{}",
                    self.year, self.month, self.day
                ))
            })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.year.to_ne_bytes());
        out[2..4].copy_from_slice(&self.month.to_ne_bytes());
        out[4..6].copy_from_slice(&self.day.to_ne_bytes());
        out
    }

    /// # Errors
    /// Returns `ValidationError` if `bytes` is shorter than the struct.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OdbcMiddlewareError> {
        let bytes = fixed_image(bytes, Self::SIZE, "DATE_STRUCT")?;
        Ok(Self {
            year: i16::from_ne_bytes([bytes[0], bytes[1]]),
            month: u16::from_ne_bytes([bytes[2], bytes[3]]),
            day: u16::from_ne_bytes([bytes[4], bytes[5]]),
        })
    }
}

/// `TIMESTAMP_STRUCT`; `fraction` is in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlTimestampStruct {
    pub year: i16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
}

impl SqlTimestampStruct {
    pub const SIZE: usize = 16;

    /// # Errors
    /// Returns `ValidationError` when the year does not fit the struct's `SQLSMALLINT`.
    pub fn from_datetime(value: NaiveDateTime) -> Result<Self, OdbcMiddlewareError> {
        let date = SqlDateStruct::from_date(value.date())?;
        Ok(Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: calendar_field(value.hour()),
            minute: calendar_field(value.minute()),
            second: calendar_field(value.second()),
            fraction: value.nanosecond(),
        })
    }

    /// # Errors
    /// Returns `ValidationError` when the fields do not name a valid point in time.
    pub fn to_datetime(self) -> Result<NaiveDateTime, OdbcMiddlewareError> {
        let date = SqlDateStruct {
            year: self.year,
            month: self.month,
            day: self.day,
        }
        .to_date()?;
        date.and_hms_nano_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.fraction,
        )
        .ok_or_else(|| {
            OdbcMiddlewareError::validation(format!(
                "invalid time {}:{}:{}.{}",
                self.hour, self.minute, self.second, self.fraction
            ))
        })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.year.to_ne_bytes());
        out[2..4].copy_from_slice(&self.month.to_ne_bytes());
        out[4..6].copy_from_slice(&self.day.to_ne_bytes());
        out[6..8].copy_from_slice(&self.hour.to_ne_bytes());
        out[8..10].copy_from_slice(&self.minute.to_ne_bytes());
        out[10..12].copy_from_slice(&self.second.to_ne_bytes());
        out[12..16].copy_from_slice(&self.fraction.to_ne_bytes());
        out
    }

    /// # Errors
    /// Returns `ValidationError` if `bytes` is shorter than the struct.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OdbcMiddlewareError> {
        let b = fixed_image(bytes, Self::SIZE, "TIMESTAMP_STRUCT")?;
        Ok(Self {
            year: i16::from_ne_bytes([b[0], b[1]]),
            month: u16::from_ne_bytes([b[2], b[3]]),
            day: u16::from_ne_bytes([b[4], b[5]]),
            hour: u16::from_ne_bytes([b[6], b[7]]),
            minute: u16::from_ne_bytes([b[8], b[9]]),
            second: u16::from_ne_bytes([b[10], b[11]]),
            fraction: u32::from_ne_bytes([b[12], b[13], b[14], b[15]]),
        })
    }
}

/// `SQL_NUMERIC_STRUCT`: `val` holds the unscaled magnitude, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlNumericStruct {
    pub precision: u8,
    pub scale: i8,
    /// 1 = positive, 2 = negative.
    pub sign: u8,
    pub val: [u8; SQL_MAX_NUMERIC_LEN],
}

impl SqlNumericStruct {
    pub const SIZE: usize = 3 + SQL_MAX_NUMERIC_LEN;
    pub const SIGN_POSITIVE: u8 = 1;
    pub const SIGN_NEGATIVE: u8 = 2;

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.precision;
        out[1] = self.scale.to_ne_bytes()[0];
        out[2] = self.sign;
        out[3..].copy_from_slice(&self.val);
        out
    }

    /// # Errors
    /// Returns `ValidationError` if `bytes` is shorter than the struct.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OdbcMiddlewareError> {
        let b = fixed_image(bytes, Self::SIZE, "SQL_NUMERIC_STRUCT")?;
        let mut val = [0u8; SQL_MAX_NUMERIC_LEN];
        val.copy_from_slice(&b[3..Self::SIZE]);
        Ok(Self {
            precision: b[0],
            scale: i8::from_ne_bytes([b[1]]),
            sign: b[2],
            val,
        })
    }
}

fn fixed_image<'a>(
    bytes: &'a [u8],
    size: usize,
    name: &str,
) -> Result<&'a [u8], OdbcMiddlewareError> {
    bytes.get(..size).ok_or_else(|| {
        OdbcMiddlewareError::validation(format!(
            "{name} needs {size} bytes, driver supplied {}",
            bytes.len()
        ))
    })
}

/// Month, day and time-of-day fields from chrono are always below 62.
fn calendar_field(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_at_exec_indicator_matches_macro() {
        assert_eq!(sql_len_data_at_exec(0), Some(-100));
        assert_eq!(sql_len_data_at_exec(42), Some(-142));
    }

    #[test]
    fn data_at_exec_indicator_rejects_huge_lengths() {
        let largest = usize::try_from(isize::MAX).unwrap();
        assert_eq!(sql_len_data_at_exec(largest), None);
        assert_eq!(sql_len_data_at_exec(largest - 98), None);
        assert_eq!(sql_len_data_at_exec(usize::MAX), None);
        assert_eq!(sql_len_data_at_exec(largest - 99), Some(isize::MIN));
    }

    #[test]
    fn out_of_range_years_are_rejected() {
        let far = NaiveDate::from_ymd_opt(40_000, 1, 1).unwrap();
        assert!(SqlDateStruct::from_date(far).is_err());
        let stamp = far.and_hms_opt(0, 0, 0).unwrap();
        assert!(SqlTimestampStruct::from_datetime(stamp).is_err());
        let edge = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(SqlDateStruct::from_date(edge).unwrap().year, 9999);
    }

    #[test]
    fn struct_images_have_header_sizes() {
        assert_eq!(SqlDateStruct::default().to_bytes().len(), 6);
        assert_eq!(SqlTimestampStruct::default().to_bytes().len(), 16);
        assert_eq!(SqlNumericStruct::default().to_bytes().len(), 19);
    }

    #[test]
    fn timestamp_image_keeps_nanoseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_nano_opt(23, 59, 58, 123_456_789))
            .unwrap();
        let image = SqlTimestampStruct::from_datetime(dt).unwrap().to_bytes();
        let back = SqlTimestampStruct::from_bytes(&image).unwrap().to_datetime().unwrap();
        assert_eq!(back, dt);
    }

    #[test]
    fn short_image_is_rejected() {
        assert!(SqlNumericStruct::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn impossible_date_is_rejected() {
        let bad = SqlDateStruct {
            year: 2023,
            month: 2,
            day: 30,
        };
        assert!(bad.to_date().is_err());
    }
}
