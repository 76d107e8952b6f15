//! FILENAME: core/engine/src/value.rs
//! PURPOSE: Scalar type tags and the values the host engine hands to a transform.
//! CONTEXT: Every row, schema column and sub-query result is expressed in terms
//! of `ScalarType` / `ScalarValue`. Values are lightweight since one exists per
//! cell of every streamed row.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// The declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    SmallInt,
    Int,
    BigInt,
    Float4,
    Float8,
    /// Fixed-point decimal. Precision and scale live on the column descriptor.
    Numeric,
    Date,
    Timestamp,
    VarChar,
    /// Blank-padded fixed-width character.
    BpChar,
    Boolean,
    Interval,
    VarBinary,
}

impl ScalarType {
    /// True for the character types (`VARCHAR`, `CHAR`).
    pub fn is_character(&self) -> bool {
        matches!(self, ScalarType::VarChar | ScalarType::BpChar)
    }

    /// SQL-ish name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::SmallInt => "smallint",
            ScalarType::Int => "int",
            ScalarType::BigInt => "bigint",
            ScalarType::Float4 => "float4",
            ScalarType::Float8 => "float8",
            ScalarType::Numeric => "numeric",
            ScalarType::Date => "date",
            ScalarType::Timestamp => "timestamp",
            ScalarType::VarChar => "varchar",
            ScalarType::BpChar => "char",
            ScalarType::Boolean => "boolean",
            ScalarType::Interval => "interval",
            ScalarType::VarBinary => "varbinary",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value. `Null` is valid for every column type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    #[default]
    Null,
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float4(f32),
    Float8(f64),
    /// Unscaled integer plus scale: `Numeric { unscaled: 12345, scale: 2 }` is 123.45.
    Numeric { unscaled: i128, scale: u8 },
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since 1970-01-01 00:00:00.
    Timestamp(i64),
    VarChar(String),
    BpChar(String),
    Boolean(bool),
    /// Duration in microseconds.
    Interval(i64),
    VarBinary(Vec<u8>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// The type tag of a non-null value.
    pub fn data_type(&self) -> Option<ScalarType> {
        let ty = match self {
            ScalarValue::Null => return None,
            ScalarValue::SmallInt(_) => ScalarType::SmallInt,
            ScalarValue::Int(_) => ScalarType::Int,
            ScalarValue::BigInt(_) => ScalarType::BigInt,
            ScalarValue::Float4(_) => ScalarType::Float4,
            ScalarValue::Float8(_) => ScalarType::Float8,
            ScalarValue::Numeric { .. } => ScalarType::Numeric,
            ScalarValue::Date(_) => ScalarType::Date,
            ScalarValue::Timestamp(_) => ScalarType::Timestamp,
            ScalarValue::VarChar(_) => ScalarType::VarChar,
            ScalarValue::BpChar(_) => ScalarType::BpChar,
            ScalarValue::Boolean(_) => ScalarType::Boolean,
            ScalarValue::Interval(_) => ScalarType::Interval,
            ScalarValue::VarBinary(_) => ScalarType::VarBinary,
        };
        Some(ty)
    }

    pub fn text(s: impl Into<String>) -> Self {
        ScalarValue::VarChar(s.into())
    }

    /// Builds a date value from a calendar day. `None` for impossible dates.
    pub fn date_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(|d| ScalarValue::Date(date_to_days(d)))
    }

    /// Integer view of the integer-like variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::SmallInt(v) => Some(i64::from(*v)),
            ScalarValue::Int(v) => Some(i64::from(*v)),
            ScalarValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Float4(v) => Some(f64::from(*v)),
            ScalarValue::Float8(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Borrowed text of the character variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::VarChar(s) | ScalarValue::BpChar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value rendered for display (CLI output, column labels).
    /// Null renders as an empty string.
    pub fn display_value(&self) -> String {
        match self {
            ScalarValue::Null => String::new(),
            ScalarValue::SmallInt(v) => v.to_string(),
            ScalarValue::Int(v) => v.to_string(),
            ScalarValue::BigInt(v) => v.to_string(),
            ScalarValue::Float4(v) => v.to_string(),
            ScalarValue::Float8(v) => v.to_string(),
            ScalarValue::Numeric { unscaled, scale } => format_decimal(*unscaled, *scale),
            ScalarValue::Date(days) => match days_to_date(*days) {
                Some(d) => d.format("%Y-%m-%d").to_string(),
                None => days.to_string(),
            },
            ScalarValue::Timestamp(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(ts) => ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
                None => micros.to_string(),
            },
            ScalarValue::VarChar(s) | ScalarValue::BpChar(s) => s.clone(),
            ScalarValue::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            ScalarValue::Interval(micros) => format!("{}us", micros),
            ScalarValue::VarBinary(bytes) => {
                bytes.iter().map(|b| format!("{:02x}", b)).collect()
            }
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::VarChar(s.to_string())
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::BigInt(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float8(v)
    }
}

/// Converts a calendar date to days since the Unix epoch.
pub fn date_to_days(date: NaiveDate) -> i32 {
    chrono::Datelike::num_days_from_ce(&date) - UNIX_EPOCH_CE_DAYS
}

/// Converts days since the Unix epoch back to a calendar date.
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_CE_DAYS)?)
}

/// Plain decimal rendering of an unscaled integer at the given scale,
/// e.g. `(12345, 2)` -> `"123.45"`, `(-5, 3)` -> `"-0.005"`.
pub fn format_decimal(unscaled: i128, scale: u8) -> String {
    let digits = unscaled.unsigned_abs().to_string();
    let sign = if unscaled < 0 { "-" } else { "" };
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, int_part, frac_part)
}
