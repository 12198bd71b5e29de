//! Type-aware literal coercion and encoding
//!
//! `coerce` normalizes a raw source value to the canonical destination
//! type; it is what gets bound when the store supports parameters.
//! `encode` renders the coerced value as an SQL literal for stores that
//! need literal embedding and for display. Neither ever fails: anything
//! ambiguous becomes `NULL` and a warning naming the column is logged.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use matql_ir::{CanonicalType, Value};
use tracing::warn;

const NULL: &str = "NULL";

/// Text left behind when an object was stringified without serialization
const STRINGIFIED_OBJECT: &str = "[object Object]";

const TRUTHY: &[&str] = &["true", "t", "1", "yes", "y", "on", "active", "enabled"];
const FALSY: &[&str] = &["false", "f", "0", "no", "n", "off", "inactive", "disabled"];

/// Epoch numbers at or above this magnitude are milliseconds
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %#z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %b %Y", "%d %B %Y", "%b %d %Y", "%B %d %Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Encode `value` as an SQL literal of type `ty`
pub fn encode(value: &Value, ty: &CanonicalType, column: &str) -> String {
    render(&coerce(value, ty, column))
}

/// Render an already-coerced value as an SQL literal
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => NULL.to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(_) => NULL.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => quote(&Value::Array(items.clone()).to_json().to_string()),
        Value::Json(json) => quote(&json.to_string()),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("'\\x{}'", hex)
        }
        Value::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => quote(&t.format("%H:%M:%S").to_string()),
        Value::Timestamp(ts) => quote(&ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::TimestampTz(ts) => quote(&ts.to_rfc3339()),
    }
}

/// Single-quote wrap with SQL-standard quote doubling
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\0', "").replace('\'', "''");
    format!("'{}'", escaped)
}

/// Normalize `value` to the shape `ty` stores
pub fn coerce(value: &Value, ty: &CanonicalType, column: &str) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    let coerced = match ty {
        CanonicalType::Integer => to_integer(value),
        CanonicalType::Numeric => to_numeric(value),
        CanonicalType::Text | CanonicalType::Varchar(_) => to_text(value),
        CanonicalType::Boolean => to_bool(value),
        CanonicalType::Date => parse_temporal(value).map(|t| Value::Date(t.date())),
        CanonicalType::Time => to_time(value),
        CanonicalType::Timestamp => parse_temporal(value).map(|t| Value::Timestamp(t.naive())),
        CanonicalType::TimestampTz => parse_temporal(value).map(|t| Value::TimestampTz(t.zoned())),
        CanonicalType::Json => to_json(value),
        CanonicalType::Bytes => to_bytes(value),
    };

    match coerced {
        Some(v) => v,
        None => {
            warn!(
                column = column,
                canonical_type = %ty,
                value_type = value.type_name(),
                "value cannot be encoded, storing NULL"
            );
            Value::Null
        }
    }
}

/// Free-text boolean vocabulary; `None` for anything ambiguous
pub fn parse_bool(s: &str) -> Option<bool> {
    let lowered = s.trim().to_ascii_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    // i64::MAX is not exactly representable; stay strictly inside the range
    (f.is_finite() && f.abs() < 9.2e18).then(|| f.round() as i64)
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Float(f) => float_to_i64(*f).map(Value::Int),
        Value::Bool(b) => Some(Value::Int(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
                .map(Value::Int)
        }
        _ => None,
    }
}

fn to_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Float(f) if f.is_finite() => Some(Value::Float(*f)),
        Value::Bool(b) => Some(Value::Int(*b as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::Int(i));
            }
            s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float)
        }
        _ => None,
    }
}

fn to_text(value: &Value) -> Option<Value> {
    let text = match value {
        Value::String(s) => s.replace('\0', ""),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(_) => return None,
        Value::Array(_) | Value::Json(_) => value.to_json().to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).replace('\0', ""),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S").to_string(),
        Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        Value::TimestampTz(ts) => ts.to_rfc3339(),
        Value::Null => return None,
    };
    Some(Value::String(text))
}

fn to_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Int(0) => Some(Value::Bool(false)),
        Value::Int(1) => Some(Value::Bool(true)),
        Value::Float(f) if *f == 0.0 => Some(Value::Bool(false)),
        Value::Float(f) if *f == 1.0 => Some(Value::Bool(true)),
        Value::String(s) => parse_bool(s).map(Value::Bool),
        _ => None,
    }
}

fn to_time(value: &Value) -> Option<Value> {
    match value {
        Value::Time(t) => Some(Value::Time(*t)),
        Value::String(s) => {
            let s = s.trim();
            TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
                .or_else(|| parse_temporal(value).and_then(|t| t.time()))
                .map(Value::Time)
        }
        _ => parse_temporal(value).and_then(|t| t.time()).map(Value::Time),
    }
}

fn to_json(value: &Value) -> Option<Value> {
    match value {
        Value::Json(json) => Some(Value::Json(json.clone())),
        Value::Array(_) | Value::Bool(_) | Value::Int(_) => Some(Value::Json(value.to_json())),
        Value::Float(f) if f.is_finite() => Some(Value::Json(value.to_json())),
        Value::String(s) if s.trim() == STRINGIFIED_OBJECT => None,
        Value::String(s) => {
            let trimmed = s.trim();
            let parsed = if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str::<serde_json::Value>(trimmed).ok()
            } else {
                None
            };
            Some(Value::Json(parsed.unwrap_or_else(|| serde_json::Value::String(s.clone()))))
        }
        Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::TimestampTz(_) => {
            to_text(value).map(|v| Value::Json(v.to_json()))
        }
        _ => None,
    }
}

fn to_bytes(value: &Value) -> Option<Value> {
    match value {
        Value::Bytes(bytes) => Some(Value::Bytes(bytes.clone())),
        Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
        _ => None,
    }
}

/// Result of best-effort temporal parsing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temporal {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl Temporal {
    /// Calendar date as written (wall clock of a zoned value)
    pub fn date(self) -> NaiveDate {
        match self {
            Temporal::Date(d) => d,
            Temporal::DateTime(dt) => dt.date(),
            Temporal::Zoned(z) => z.date_naive(),
        }
    }

    pub fn naive(self) -> NaiveDateTime {
        match self {
            Temporal::Date(d) => d.and_time(NaiveTime::MIN),
            Temporal::DateTime(dt) => dt,
            Temporal::Zoned(z) => z.naive_local(),
        }
    }

    /// Naive values are taken to be UTC
    pub fn zoned(self) -> DateTime<FixedOffset> {
        match self {
            Temporal::Zoned(z) => z,
            other => other.naive().and_utc().fixed_offset(),
        }
    }

    fn time(self) -> Option<NaiveTime> {
        match self {
            Temporal::Date(_) => None,
            other => Some(other.naive().time()),
        }
    }
}

/// Best-effort conversion of a value into a point in time.
///
/// Accepts native temporal values, epoch seconds or milliseconds, ISO-8601
/// and common textual dates, RFC 2822, and the JavaScript
/// `Date.prototype.toString` form (`Sun Nov 23 2025 00:00:00 GMT+0000 (...)`).
/// Zero dates (`0000-00-00`) yield `None`.
pub fn parse_temporal(value: &Value) -> Option<Temporal> {
    match value {
        Value::Date(d) => Some(Temporal::Date(*d)),
        Value::Timestamp(ts) => Some(Temporal::DateTime(*ts)),
        Value::TimestampTz(ts) => Some(Temporal::Zoned(*ts)),
        Value::Int(i) => from_epoch_int(*i),
        Value::Float(f) => from_epoch_float(*f),
        Value::String(s) => parse_temporal_str(s),
        _ => None,
    }
}

fn from_epoch_int(i: i64) -> Option<Temporal> {
    let dt = if i.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::<Utc>::from_timestamp_millis(i)?
    } else {
        DateTime::<Utc>::from_timestamp(i, 0)?
    };
    Some(Temporal::Zoned(dt.fixed_offset()))
}

fn from_epoch_float(f: f64) -> Option<Temporal> {
    if !f.is_finite() || f.abs() >= 1e16 {
        return None;
    }
    let millis = if f.abs() >= EPOCH_MILLIS_THRESHOLD as f64 { f } else { f * 1000.0 };
    let dt = DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)?;
    Some(Temporal::Zoned(dt.fixed_offset()))
}

fn parse_temporal_str(raw: &str) -> Option<Temporal> {
    let s = raw.trim();
    if s.is_empty() || s.starts_with("0000-00-00") {
        return None;
    }

    if let Ok(z) = DateTime::parse_from_rfc3339(s) {
        return Some(Temporal::Zoned(z));
    }
    if let Some(z) = ZONED_FORMATS.iter().find_map(|fmt| DateTime::parse_from_str(s, fmt).ok()) {
        return Some(Temporal::Zoned(z));
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(Temporal::DateTime(dt));
    }
    if let Some(d) = DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok()) {
        return Some(Temporal::Date(d));
    }
    if let Some(z) = parse_js_date(s) {
        return Some(Temporal::Zoned(z));
    }
    if let Ok(z) = DateTime::parse_from_rfc2822(s) {
        return Some(Temporal::Zoned(z));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch_int);
    }
    None
}

/// `Sun Nov 23 2025 00:00:00 GMT+0000 (Coordinated Universal Time)`
fn parse_js_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let head = s.split(" (").next()?.trim();
    if !head.contains("GMT") {
        return None;
    }
    DateTime::parse_from_str(head, "%a %b %d %Y %H:%M:%S GMT%z").ok()
}
