//! Hour bucketing for login frequency counters

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Bucket key format, truncated to the hour
const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%d %H:00:00";

/// Time zone used to render hour buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HourBucketer {
    /// Process local time zone
    #[default]
    Local,
    /// Fixed UTC offset, e.g. `+00:00` or `+09:00`
    Fixed(FixedOffset),
}

impl HourBucketer {
    /// UTC bucketer
    pub fn utc() -> Self {
        HourBucketer::Fixed(Utc.fix())
    }

    /// Render the hour bucket for `unix_seconds`.
    ///
    /// Returns `None` when the timestamp is outside the range chrono can represent.
    pub fn bucket(&self, unix_seconds: i64) -> Option<String> {
        let instant = DateTime::<Utc>::from_timestamp(unix_seconds, 0)?;
        let key = match self {
            HourBucketer::Local => format_bucket(&instant, &Local),
            HourBucketer::Fixed(offset) => format_bucket(&instant, offset),
        };
        Some(key)
    }
}

impl fmt::Display for HourBucketer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HourBucketer::Local => f.write_str("local"),
            HourBucketer::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

/// Error returned when a time zone setting cannot be parsed
#[derive(Debug, thiserror::Error)]
#[error("invalid time zone '{0}': expected 'local', 'utc' or an offset like '+09:00'")]
pub struct InvalidTimeZone(pub String);

impl FromStr for HourBucketer {
    type Err = InvalidTimeZone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" => Ok(HourBucketer::Local),
            "utc" | "z" => Ok(HourBucketer::utc()),
            _ => FixedOffset::from_str(trimmed)
                .map(HourBucketer::Fixed)
                .map_err(|_| InvalidTimeZone(s.to_string())),
        }
    }
}

fn format_bucket<Tz: TimeZone>(instant: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    instant
        .with_timezone(tz)
        .format(HOUR_BUCKET_FORMAT)
        .to_string()
}

/// Outcome of reading the `timestamp` field of an event record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsedTimestamp {
    Absent,
    Seconds(i64),
    Malformed,
}

/// Interpret a raw JSON `timestamp` value as unix seconds.
///
/// `null` and `""` count as absent. Integers are taken as-is, floats are
/// truncated and strings must hold an integer.
pub(crate) fn parse_unix_seconds(raw: &Value) -> ParsedTimestamp {
    match raw {
        Value::Null => ParsedTimestamp::Absent,
        Value::String(s) if s.is_empty() => ParsedTimestamp::Absent,
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(seconds) => ParsedTimestamp::Seconds(seconds),
            Err(_) => ParsedTimestamp::Malformed,
        },
        Value::Number(n) => {
            if let Some(seconds) = n.as_i64() {
                return ParsedTimestamp::Seconds(seconds);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    ParsedTimestamp::Seconds(f.trunc() as i64)
                }
                _ => ParsedTimestamp::Malformed,
            }
        }
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => ParsedTimestamp::Malformed,
    }
}
