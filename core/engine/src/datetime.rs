//! FILENAME: core/engine/src/datetime.rs
//! PURPOSE: Stateless date and duration helpers exposed next to the pivot transform.
//! CONTEXT: `last_day`, `format_duration` and `normalize_time` scalar functions.
//! The `ScalarValue` wrappers propagate nulls.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::value::{date_to_days, days_to_date, ScalarValue};

#[derive(Error, Debug, PartialEq)]
pub enum DateTimeError {
    #[error("base timestamp cannot be greater than input timestamp")]
    BaseAfterInput,

    #[error("interval must be a positive number of seconds, got {0}")]
    InvalidInterval(i64),

    #[error("value out of the supported date range")]
    OutOfRange,

    #[error("{function} does not accept a {found} argument")]
    ArgumentType { function: &'static str, found: String },
}

/// Last calendar day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Renders a number of seconds as `HH:MM:SS`. Hours are not wrapped at 24;
/// negative durations get a leading `-`.
pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total = seconds.unsigned_abs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, secs)
}

/// Snaps `input` down to the closest `base + k * interval` boundary.
/// Inputs less than one interval past `base` snap to `base`.
pub fn normalize_time(
    input: NaiveDateTime,
    base: NaiveDateTime,
    interval_secs: i64,
) -> Result<NaiveDateTime, DateTimeError> {
    if base > input {
        return Err(DateTimeError::BaseAfterInput);
    }
    if interval_secs <= 0 {
        return Err(DateTimeError::InvalidInterval(interval_secs));
    }
    let diff = (input - base)
        .num_microseconds()
        .ok_or(DateTimeError::OutOfRange)?;
    let interval = interval_secs
        .checked_mul(1_000_000)
        .ok_or(DateTimeError::OutOfRange)?;
    let multiple = diff / interval;
    base.checked_add_signed(Duration::microseconds(multiple * interval))
        .ok_or(DateTimeError::OutOfRange)
}

// ============================================================================
// SCALAR WRAPPERS
// ============================================================================

fn timestamp_of(micros: i64) -> Result<NaiveDateTime, DateTimeError> {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc())
        .ok_or(DateTimeError::OutOfRange)
}

fn argument_error(function: &'static str, value: &ScalarValue) -> DateTimeError {
    DateTimeError::ArgumentType {
        function,
        found: value
            .data_type()
            .map_or_else(|| "null".to_string(), |t| t.to_string()),
    }
}

/// `last_day(date | timestamp) -> date`.
pub fn last_day(value: &ScalarValue) -> Result<ScalarValue, DateTimeError> {
    let date = match value {
        ScalarValue::Null => return Ok(ScalarValue::Null),
        ScalarValue::Date(days) => days_to_date(*days).ok_or(DateTimeError::OutOfRange)?,
        ScalarValue::Timestamp(micros) => timestamp_of(*micros)?.date(),
        other => return Err(argument_error("last_day", other)),
    };
    Ok(ScalarValue::Date(date_to_days(last_day_of_month(date))))
}

/// `format_duration(int) -> varchar`.
pub fn format_duration_value(value: &ScalarValue) -> Result<ScalarValue, DateTimeError> {
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        v => v
            .as_i64()
            .map(|secs| ScalarValue::VarChar(format_duration(secs)))
            .ok_or_else(|| argument_error("format_duration", v)),
    }
}

/// `normalize_time(timestamp, timestamp, int) -> timestamp`. Any null argument
/// yields null.
pub fn normalize_time_value(
    input: &ScalarValue,
    base: &ScalarValue,
    interval: &ScalarValue,
) -> Result<ScalarValue, DateTimeError> {
    if input.is_null() || base.is_null() || interval.is_null() {
        return Ok(ScalarValue::Null);
    }
    let (input, base) = match (input, base) {
        (ScalarValue::Timestamp(i), ScalarValue::Timestamp(b)) => (timestamp_of(*i)?, timestamp_of(*b)?),
        (ScalarValue::Timestamp(_), other) | (other, _) => {
            return Err(argument_error("normalize_time", other))
        }
    };
    let interval = interval
        .as_i64()
        .ok_or_else(|| argument_error("normalize_time", interval))?;
    let normalized = normalize_time(input, base, interval)?;
    Ok(ScalarValue::Timestamp(normalized.and_utc().timestamp_micros()))
}
