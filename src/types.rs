use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::OdbcMiddlewareError;
use crate::native::{SQL_MAX_NUMERIC_LEN, SqlNumericStruct};

/// Values that can be passed as query parameters or read back from a row or output parameter.
///
/// ```rust
/// use odbc_middleware::prelude::*;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value
    #[default]
    Null,
    /// Boolean value (BIT)
    Bool(bool),
    /// 32-bit integer (TINYINT, SMALLINT, INT)
    Int(i32),
    /// 64-bit integer (BIGINT)
    BigInt(i64),
    /// Floating point value (REAL/DOUBLE)
    Double(f64),
    /// Text value
    Text(String),
    /// Binary data
    Binary(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// Exact fixed-point value
    Numeric(NumericValue),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(value) => Some(i64::from(*value)),
            SqlValue::BigInt(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let SqlValue::Bool(value) = self {
            return Some(*value);
        } else if let Some(i) = self.as_int() {
            if i == 1 {
                return Some(true);
            } else if i == 0 {
                return Some(false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SqlValue::Double(value) => Some(*value),
            SqlValue::Numeric(value) => Some(value.to_f64()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Timestamp(value) => Some(*value),
            SqlValue::Date(value) => value.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        if let SqlValue::Binary(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// Declared parameter types with their stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SqlType {
    Null = 0,
    Bit = 1,
    /// Unsigned, 0 through 255.
    TinyInt = 2,
    SmallInt = 3,
    Int32 = 4,
    BigInt = 5,
    Real = 6,
    Char = 7,
    NChar = 8,
    VarChar = 9,
    NVarChar = 10,
    Binary = 11,
    VarBinary = 12,
    Date = 13,
    Timestamp = 14,
    Numeric = 15,
    LongVarChar = 16,
    LongNVarChar = 17,
    LongVarBinary = 18,
    SqlOutputVar = 19,
}

impl SqlType {
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Types that are sent in pieces while the statement waits for data.
    #[must_use]
    pub fn is_long(self) -> bool {
        matches!(
            self,
            SqlType::LongVarChar | SqlType::LongNVarChar | SqlType::LongVarBinary
        )
    }
}

impl TryFrom<u32> for SqlType {
    type Error = OdbcMiddlewareError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        let ty = match code {
            0 => SqlType::Null,
            1 => SqlType::Bit,
            2 => SqlType::TinyInt,
            3 => SqlType::SmallInt,
            4 => SqlType::Int32,
            5 => SqlType::BigInt,
            6 => SqlType::Real,
            7 => SqlType::Char,
            8 => SqlType::NChar,
            9 => SqlType::VarChar,
            10 => SqlType::NVarChar,
            11 => SqlType::Binary,
            12 => SqlType::VarBinary,
            13 => SqlType::Date,
            14 => SqlType::Timestamp,
            15 => SqlType::Numeric,
            16 => SqlType::LongVarChar,
            17 => SqlType::LongNVarChar,
            18 => SqlType::LongVarBinary,
            19 => SqlType::SqlOutputVar,
            other => {
                return Err(OdbcMiddlewareError::validation(format!(
                    "unknown parameter type code {other}"
                )));
            }
        };
        Ok(ty)
    }
}

impl From<SqlType> for u32 {
    fn from(ty: SqlType) -> Self {
        ty.code()
    }
}

/// Shape of the value a finished query resolves with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
pub enum FetchMode {
    /// Resolve with the first row only.
    Single,
    /// Resolve with every row.
    #[default]
    Array,
}

/// Exact fixed-point value in the driver's representation: an unscaled little-endian magnitude
/// plus precision, scale and sign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumericValue {
    pub precision: u8,
    pub scale: i8,
    /// `true` for positive values.
    pub sign: bool,
    pub value: Vec<u8>,
}

impl NumericValue {
    /// Build a numeric value, enforcing the bounds the driver struct can hold.
    ///
    /// # Errors
    /// Returns `ValidationError` if `precision > 255`, `scale > 127` or the magnitude is longer
    /// than [`SQL_MAX_NUMERIC_LEN`].
    pub fn new(
        precision: u32,
        scale: u32,
        sign: bool,
        value: Vec<u8>,
    ) -> Result<Self, OdbcMiddlewareError> {
        let precision = u8::try_from(precision).map_err(|_| {
            OdbcMiddlewareError::validation(format!("numeric precision {precision} exceeds 255"))
        })?;
        let scale = i8::try_from(scale).map_err(|_| {
            OdbcMiddlewareError::validation(format!("numeric scale {scale} exceeds 127"))
        })?;
        if value.len() > SQL_MAX_NUMERIC_LEN {
            return Err(OdbcMiddlewareError::validation(format!(
                "numeric value is {} bytes, maximum is {SQL_MAX_NUMERIC_LEN}",
                value.len()
            )));
        }
        Ok(Self {
            precision,
            scale,
            sign,
            value,
        })
    }

    /// Unscaled magnitude.
    #[must_use]
    pub fn magnitude(&self) -> u128 {
        let mut buf = [0u8; SQL_MAX_NUMERIC_LEN];
        let len = self.value.len().min(SQL_MAX_NUMERIC_LEN);
        buf[..len].copy_from_slice(&self.value[..len]);
        u128::from_le_bytes(buf)
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        let unscaled = self.magnitude() as f64 / 10f64.powi(i32::from(self.scale));
        if self.sign { unscaled } else { -unscaled }
    }

    #[must_use]
    pub fn to_native(&self) -> SqlNumericStruct {
        let mut val = [0u8; SQL_MAX_NUMERIC_LEN];
        let len = self.value.len().min(SQL_MAX_NUMERIC_LEN);
        val[..len].copy_from_slice(&self.value[..len]);
        SqlNumericStruct {
            precision: self.precision,
            scale: self.scale,
            sign: if self.sign {
                SqlNumericStruct::SIGN_POSITIVE
            } else {
                SqlNumericStruct::SIGN_NEGATIVE
            },
            val,
        }
    }

    #[must_use]
    pub fn from_native(native: &SqlNumericStruct) -> Self {
        // Trailing zero bytes carry no magnitude.
        let used = native
            .val
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |idx| idx + 1);
        Self {
            precision: native.precision,
            scale: native.scale,
            sign: native.sign != SqlNumericStruct::SIGN_NEGATIVE,
            value: native.val[..used].to_vec(),
        }
    }
}

impl std::fmt::Display for NumericValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digits = self.magnitude().to_string();
        let sign = if self.sign || self.magnitude() == 0 { "" } else { "-" };
        let scale = usize::try_from(self.scale.max(0)).unwrap_or(0);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// Build a numeric value from its parts.
///
/// # Errors
/// Same bounds as [`NumericValue::new`].
pub fn make_numeric(
    precision: u32,
    scale: u32,
    sign: bool,
    value: &[u8],
) -> Result<SqlValue, OdbcMiddlewareError> {
    NumericValue::new(precision, scale, sign, value.to_vec()).map(SqlValue::Numeric)
}

#[must_use]
pub fn make_timestamp(value: NaiveDateTime) -> SqlValue {
    SqlValue::Timestamp(value)
}
