//! FILENAME: core/pivot-engine/src/canonical.rs
//! Canonical pivot keys.
//!
//! Pivot keys arrive from two independent streams: the mapping query (at
//! session start) and the pivot column of the input rows. Both sides are
//! reduced to the same text form so that equal values find each other even
//! when the two columns are declared with different widths:
//! - integers, floats and decimals print as plain decimal numbers, so `5`,
//!   `5.0` and `5.00` share the key `"5"`
//! - dates print as `YYYY-MM-DD`, timestamps as `YYYY-MM-DD HH:MM:SS[.fff]`
//! - character values are used verbatim (no trimming, no case folding)

use std::fmt;

use engine::value::days_to_date;
use engine::{ScalarType, ScalarValue};
use serde::{Deserialize, Serialize};

use crate::error::{PivotError, PivotResult};

/// Scale used to split 128-bit magnitudes into 64-bit printable chunks.
const WIDE_CHUNK: u128 = 1_000_000_000_000_000_000;
const WIDE_CHUNK_DIGITS: usize = 18;

/// The supported families of pivot key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    Integer,
    Float,
    Decimal,
    Date,
    Timestamp,
    Text,
}

impl TryFrom<ScalarType> for KeyKind {
    type Error = PivotError;

    fn try_from(ty: ScalarType) -> Result<Self, Self::Error> {
        match ty {
            ScalarType::SmallInt | ScalarType::Int | ScalarType::BigInt => Ok(KeyKind::Integer),
            ScalarType::Float4 | ScalarType::Float8 => Ok(KeyKind::Float),
            ScalarType::Numeric => Ok(KeyKind::Decimal),
            ScalarType::Date => Ok(KeyKind::Date),
            ScalarType::Timestamp => Ok(KeyKind::Timestamp),
            ScalarType::VarChar | ScalarType::BpChar => Ok(KeyKind::Text),
            ScalarType::Boolean | ScalarType::Interval | ScalarType::VarBinary => {
                Err(PivotError::UnsupportedType(ty))
            }
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyKind::Integer => "integer",
            KeyKind::Float => "float",
            KeyKind::Decimal => "decimal",
            KeyKind::Date => "date",
            KeyKind::Timestamp => "timestamp",
            KeyKind::Text => "text",
        };
        f.write_str(name)
    }
}

impl KeyKind {
    /// Whether keys of the two kinds share a canonical text space.
    pub fn is_compatible_with(&self, other: KeyKind) -> bool {
        let numeric = |k: &KeyKind| matches!(k, KeyKind::Integer | KeyKind::Float | KeyKind::Decimal);
        self == &other || (numeric(self) && numeric(&other))
    }

    /// Canonical text of a non-null value belonging to this kind.
    pub fn canonicalize(&self, value: &ScalarValue) -> PivotResult<String> {
        let key = match (self, value) {
            (_, ScalarValue::Null) => return Err(PivotError::NullPivotKey),
            (KeyKind::Integer, ScalarValue::SmallInt(v)) => v.to_string(),
            (KeyKind::Integer, ScalarValue::Int(v)) => v.to_string(),
            (KeyKind::Integer, ScalarValue::BigInt(v)) => v.to_string(),
            (KeyKind::Float, ScalarValue::Float4(v)) => canonical_float(*v, *v == 0.0),
            (KeyKind::Float, ScalarValue::Float8(v)) => canonical_float(*v, *v == 0.0),
            (KeyKind::Decimal, ScalarValue::Numeric { unscaled, scale }) => {
                canonical_decimal(*unscaled, *scale)
            }
            (KeyKind::Date, ScalarValue::Date(days)) => match days_to_date(*days) {
                Some(date) => date.format("%Y-%m-%d").to_string(),
                None => days.to_string(),
            },
            (KeyKind::Timestamp, ScalarValue::Timestamp(micros)) => {
                match chrono::DateTime::from_timestamp_micros(*micros) {
                    Some(ts) => ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
                    None => micros.to_string(),
                }
            }
            (KeyKind::Text, ScalarValue::VarChar(s) | ScalarValue::BpChar(s)) => s.clone(),
            (kind, other) => {
                return Err(PivotError::KeyTypeMismatch {
                    expected: *kind,
                    // Null was handled by the first arm.
                    found: other.data_type().unwrap_or(ScalarType::VarChar),
                })
            }
        };
        Ok(key)
    }
}

/// Shortest round-trip decimal text; negative zero prints as `0`.
fn canonical_float<T: fmt::Display>(value: T, is_zero: bool) -> String {
    if is_zero {
        "0".to_string()
    } else {
        value.to_string()
    }
}

/// Decimal text with trailing fractional zeros removed: `(1500, 3)` -> `"1.5"`.
fn canonical_decimal(unscaled: i128, scale: u8) -> String {
    let digits = wide_integer_digits(unscaled.unsigned_abs());
    let scale = usize::from(scale);
    let (int_part, frac_part) = if digits.len() > scale {
        let (i, f) = digits.split_at(digits.len() - scale);
        (i.to_string(), f.to_string())
    } else {
        ("0".to_string(), format!("{}{}", "0".repeat(scale - digits.len()), digits))
    };
    let frac_part = frac_part.trim_end_matches('0');
    let sign = if unscaled < 0 { "-" } else { "" };
    if frac_part.is_empty() {
        if int_part == "0" {
            return "0".to_string();
        }
        format!("{}{}", sign, int_part)
    } else {
        format!("{}{}.{}", sign, int_part, frac_part)
    }
}

/// Decimal digits of a 128-bit magnitude. Values that fit in 64 bits print
/// natively; larger ones print as quotient/remainder chunks of 10^18 with the
/// remainder zero-padded.
pub fn wide_integer_digits(magnitude: u128) -> String {
    if let Ok(small) = u64::try_from(magnitude) {
        return small.to_string();
    }
    let quotient = magnitude / WIDE_CHUNK;
    let remainder = (magnitude % WIDE_CHUNK) as u64;
    format!(
        "{}{:0width$}",
        wide_integer_digits(quotient),
        remainder,
        width = WIDE_CHUNK_DIGITS
    )
}
