//! FILENAME: core/engine/src/sqlite.rs
//! PURPOSE: `QueryExecutor` backed by a SQLite connection.
//! CONTEXT: Declared column types are mapped onto `ScalarType`; columns without
//! a declared type (expressions) are treated as character columns, matching
//! SQLite's text affinity. Floating-point columns are always `Float8` since
//! SQLite stores every REAL as a double. The statement borrows the connection,
//! so the open cursor lives inside `execute` and each `fetch` steps it once.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::query::{QueryError, QueryExecutor, QueryResult};
use crate::row::Row;
use crate::schema::{ColumnDesc, Schema};
use crate::value::{date_to_days, ScalarType, ScalarValue};

pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        SqliteExecutor { conn }
    }

    pub fn open_in_memory() -> Result<Self, QueryError> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Opens an existing database read-only.
    pub fn open_read_only(path: &Path) -> Result<Self, QueryError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self::new(conn))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute<T, E, F>(&self, query: &str, visit: F) -> Result<T, E>
    where
        E: From<QueryError>,
        F: FnOnce(&mut QueryResult<'_>) -> Result<T, E>,
    {
        let mut stmt = self.conn.prepare(query).map_err(QueryError::from)?;
        let schema: Schema = stmt
            .columns()
            .iter()
            .map(|c| column_desc(c.name(), c.decl_type()))
            .collect::<Result<_, _>>()?;
        log::debug!(target: "SQLITE", "query opened with {} columns: {}", schema.len(), query);

        let columns = schema.clone();
        let mut rows = stmt.query([]).map_err(QueryError::from)?;
        let mut done = false;
        let stream = std::iter::from_fn(move || {
            if done {
                return None;
            }
            let next = match rows.next() {
                Ok(Some(row)) => Some(convert_row(&columns, row)),
                Ok(None) => None,
                Err(e) => Some(Err(QueryError::from(e))),
            };
            done = !matches!(next, Some(Ok(_)));
            next
        });
        let mut result = QueryResult::new(schema, Box::new(stream));
        visit(&mut result)
    }
}

fn convert_row(schema: &Schema, row: &rusqlite::Row<'_>) -> Result<Row, QueryError> {
    let mut values = Vec::with_capacity(schema.len());
    for (idx, desc) in schema.columns().iter().enumerate() {
        values.push(convert_value(desc, row.get_ref(idx)?)?);
    }
    Ok(Row::new(values))
}

// ============================================================================
// DECLARED TYPE MAPPING
// ============================================================================

fn column_desc(name: &str, decl_type: Option<&str>) -> Result<ColumnDesc, QueryError> {
    let decl = match decl_type {
        Some(d) => d.trim().to_ascii_uppercase(),
        None => return Ok(ColumnDesc::new(name, ScalarType::VarChar)),
    };
    let (base, args) = split_type_args(&decl);

    let mut desc = match base {
        "SMALLINT" | "INT2" | "TINYINT" => ColumnDesc::new(name, ScalarType::SmallInt),
        "INT" | "INT4" | "MEDIUMINT" => ColumnDesc::new(name, ScalarType::Int),
        "INTEGER" | "BIGINT" | "INT8" => ColumnDesc::new(name, ScalarType::BigInt),
        "REAL" | "FLOAT4" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" => {
            ColumnDesc::new(name, ScalarType::Float8)
        }
        // Without a declared precision the column holds whatever SQLite's
        // numeric affinity produced, fractional values included.
        "NUMERIC" | "DECIMAL" if args.is_empty() => ColumnDesc::new(name, ScalarType::Float8),
        "NUMERIC" | "DECIMAL" => ColumnDesc::numeric(
            name,
            args.first().copied().unwrap_or(38),
            args.get(1).copied().unwrap_or(0),
        ),
        "DATE" => ColumnDesc::new(name, ScalarType::Date),
        "TIMESTAMP" | "DATETIME" => ColumnDesc::new(name, ScalarType::Timestamp),
        "BOOLEAN" | "BOOL" => ColumnDesc::new(name, ScalarType::Boolean),
        "BLOB" | "VARBINARY" => ColumnDesc::new(name, ScalarType::VarBinary),
        "CHAR" | "CHARACTER" | "BPCHAR" => ColumnDesc {
            length: args.first().copied().map(u32::from).unwrap_or(1),
            ..ColumnDesc::new(name, ScalarType::BpChar)
        },
        "VARCHAR" | "CHARACTER VARYING" | "TEXT" | "CLOB" | "STRING" | "NVARCHAR" => {
            ColumnDesc::varchar(name, args.first().copied().map(u32::from).unwrap_or(0))
        }
        other => {
            return Err(QueryError::UnsupportedColumnType {
                column: name.to_string(),
                declared: other.to_string(),
            })
        }
    };
    desc.nullable = true;
    Ok(desc)
}

/// Splits `"DECIMAL(10, 2)"` into `("DECIMAL", [10, 2])`. Arguments that do not
/// fit a `u8` are clamped.
fn split_type_args(decl: &str) -> (&str, Vec<u8>) {
    match decl.find('(') {
        Some(open) => {
            let base = decl[..open].trim();
            let inner = decl[open + 1..].trim_end_matches(')');
            let args = inner
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .map(|a| a.min(u32::from(u8::MAX)) as u8)
                .collect();
            (base, args)
        }
        None => (decl, Vec::new()),
    }
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

fn conversion_error(desc: &ColumnDesc, value: &ValueRef<'_>) -> QueryError {
    QueryError::UnsupportedColumnType {
        column: desc.name.clone(),
        declared: format!("{} holding {:?}", desc.data_type, value.data_type()),
    }
}

fn convert_value(desc: &ColumnDesc, value: ValueRef<'_>) -> Result<ScalarValue, QueryError> {
    if let ValueRef::Null = value {
        return Ok(ScalarValue::Null);
    }
    let converted = match (desc.data_type, &value) {
        (ScalarType::SmallInt, ValueRef::Integer(i)) => {
            i16::try_from(*i).ok().map(ScalarValue::SmallInt)
        }
        (ScalarType::Int, ValueRef::Integer(i)) => i32::try_from(*i).ok().map(ScalarValue::Int),
        (ScalarType::BigInt, ValueRef::Integer(i)) => Some(ScalarValue::BigInt(*i)),
        (ScalarType::Float8, ValueRef::Real(f)) => Some(ScalarValue::Float8(*f)),
        (ScalarType::Float8, ValueRef::Integer(i)) => Some(ScalarValue::Float8(*i as f64)),
        (ScalarType::Float8, ValueRef::Text(t)) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(ScalarValue::Float8),
        (ScalarType::Numeric, ValueRef::Integer(i)) => 10i128
            .checked_pow(u32::from(desc.scale))
            .and_then(|m| i128::from(*i).checked_mul(m))
            .map(|unscaled| ScalarValue::Numeric { unscaled, scale: desc.scale }),
        // Shortest decimal text of the double; digits beyond the scale are an
        // error rather than a rounding.
        (ScalarType::Numeric, ValueRef::Real(f)) if f.is_finite() => {
            parse_decimal(&f.to_string(), desc.scale)
                .map(|unscaled| ScalarValue::Numeric { unscaled, scale: desc.scale })
        }
        (ScalarType::Numeric, ValueRef::Text(t)) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| parse_decimal(s, desc.scale))
            .map(|unscaled| ScalarValue::Numeric { unscaled, scale: desc.scale }),
        (ScalarType::Date, ValueRef::Text(t)) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .map(|d| ScalarValue::Date(date_to_days(d))),
        (ScalarType::Date, ValueRef::Integer(i)) => {
            i32::try_from(*i).ok().map(ScalarValue::Date)
        }
        (ScalarType::Timestamp, ValueRef::Text(t)) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| parse_timestamp(s.trim()))
            .map(|ts| ScalarValue::Timestamp(ts.and_utc().timestamp_micros())),
        (ScalarType::Timestamp, ValueRef::Integer(secs)) => {
            secs.checked_mul(1_000_000).map(ScalarValue::Timestamp)
        }
        (ScalarType::VarChar | ScalarType::BpChar, ValueRef::Text(t)) => {
            let s = String::from_utf8_lossy(t).into_owned();
            Some(if desc.data_type == ScalarType::BpChar {
                ScalarValue::BpChar(s)
            } else {
                ScalarValue::VarChar(s)
            })
        }
        (ScalarType::VarChar, ValueRef::Integer(i)) => Some(ScalarValue::VarChar(i.to_string())),
        (ScalarType::VarChar, ValueRef::Real(f)) => Some(ScalarValue::VarChar(f.to_string())),
        (ScalarType::Boolean, ValueRef::Integer(i)) => Some(ScalarValue::Boolean(*i != 0)),
        (ScalarType::Interval, ValueRef::Integer(i)) => Some(ScalarValue::Interval(*i)),
        (ScalarType::VarBinary, ValueRef::Blob(b)) => Some(ScalarValue::VarBinary(b.to_vec())),
        _ => None,
    };
    converted.ok_or_else(|| conversion_error(desc, &value))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parses `"-12.3"` at scale 2 into `-1230`. Extra fractional digits are rejected.
fn parse_decimal(s: &str, scale: u8) -> Option<i128> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let scale = usize::from(scale);
    if frac_part.len() > scale || (int_part.is_empty() && frac_part.is_empty()) {
        return None;
    }
    let mut text = String::with_capacity(int_part.len() + scale);
    text.push_str(if int_part.is_empty() { "0" } else { int_part });
    text.push_str(frac_part);
    text.push_str(&"0".repeat(scale - frac_part.len()));
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i128 = text.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
