//! # Built-in Temporal Formats
//!
//! - `date`: `YYYY-MM-DD` ⇄ [`chrono::NaiveDate`]. The serializer also takes
//!   full date-times and keeps only the UTC date part, so a handler may put
//!   the same `DateTime<Utc>` into `date` and `date-time` fields.
//! - `date-time`: RFC 3339 ⇄ `DateTime<Utc>`. Serialized with millisecond
//!   precision and a `Z` suffix (`2020-12-20T07:28:19.213Z`).
//!
//! Structural checking of both formats is left to the schema validator,
//! which knows them natively, so neither entry carries a predicate.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use oapi_core::{FormatError, Payload};
use serde_json::Value;

use crate::registry::FormatEntry;

/// Name of the date format.
pub const DATE: &str = "date";

/// Name of the date-time format.
pub const DATE_TIME: &str = "date-time";

/// The `date` entry with both functions.
pub fn date() -> FormatEntry {
    FormatEntry::new(DATE)
        .deserialize(deserialize_date)
        .serialize(serialize_date)
}

/// The `date-time` entry with both functions.
pub fn date_time() -> FormatEntry {
    FormatEntry::new(DATE_TIME)
        .deserialize(deserialize_date_time)
        .serialize(serialize_date_time)
}

fn wire_str(wire: &Value) -> Result<&str, FormatError> {
    wire.as_str()
        .ok_or_else(|| FormatError::new(format!("expected a string, got {wire}")))
}

fn deserialize_date(wire: &Value) -> Result<Payload, FormatError> {
    let s = wire_str(wire)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Payload::domain)
        .map_err(|e| FormatError::new(format!("invalid date {s:?}: {e}")))
}

fn deserialize_date_time(wire: &Value) -> Result<Payload, FormatError> {
    let s = wire_str(wire)?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| Payload::domain(dt.with_timezone(&Utc)))
        .map_err(|e| FormatError::new(format!("invalid date-time {s:?}: {e}")))
}

/// Extract a UTC instant from the temporal domain types this module knows.
fn as_utc(domain: &Payload) -> Option<DateTime<Utc>> {
    if let Some(dt) = domain.downcast_ref::<DateTime<Utc>>() {
        return Some(*dt);
    }
    if let Some(dt) = domain.downcast_ref::<DateTime<FixedOffset>>() {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = domain.downcast_ref::<NaiveDateTime>() {
        return Some(naive.and_utc());
    }
    domain
        .downcast_ref::<NaiveDate>()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn unsupported(domain: &Payload, format: &str) -> FormatError {
    let kind = match domain {
        Payload::Domain(d) => d.type_name().to_string(),
        Payload::Array(_) => "array".to_string(),
        Payload::Object(_) => "object".to_string(),
        _ => "primitive".to_string(),
    };
    FormatError::new(format!("cannot serialize {kind} as {format}"))
}

fn serialize_date(domain: &Payload) -> Result<Value, FormatError> {
    if let Some(d) = domain.downcast_ref::<NaiveDate>() {
        return Ok(Value::String(d.format("%Y-%m-%d").to_string()));
    }
    as_utc(domain)
        .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| unsupported(domain, DATE))
}

fn serialize_date_time(domain: &Payload) -> Result<Value, FormatError> {
    as_utc(domain)
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .ok_or_else(|| unsupported(domain, DATE_TIME))
}
