//! Core data types for the aggregation pipeline
//!
//! `EventRecord` is the unit of ingestion for both the historical snapshot and
//! the live subscription. Records are immutable once decoded; the pipeline only
//! copies them into or evicts them from the window buffer.

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Millisecond timestamps above this are unambiguous; between 1e9 and 1e12 the
/// value is read as seconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;
const SECONDS_THRESHOLD: i64 = 1_000_000_000;

/// Longest payload prefix echoed into logs when a message is rejected.
const LOG_PREFIX_LEN: usize = 120;

/// Coarse outcome classification of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Provisional,
    Success,
    Redirect,
    BadRequest,
    Error,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Provisional => "provisional",
            Category::Success => "success",
            Category::Redirect => "redirect",
            Category::BadRequest => "badRequest",
            Category::Error => "error",
        }
    }

    pub fn all() -> [Category; 5] {
        [
            Category::Provisional,
            Category::Success,
            Category::Redirect,
            Category::BadRequest,
            Category::Error,
        ]
    }
}

/// A single HTTP request-log event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Request identifier assigned by the producing service
    #[serde(rename = "req_id")]
    pub id: String,

    /// Milliseconds since the Unix epoch
    #[serde(deserialize_with = "deserialize_timestamp_ms")]
    pub timestamp: i64,

    pub status: i32,
    pub method: String,
    pub path: String,

    /// Processing duration in milliseconds
    #[serde(rename = "took", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    /// Opaque payload attached by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl EventRecord {
    /// Decode and validate one live message
    pub fn from_json(payload: &str) -> Result<Self, PayloadError> {
        let record: EventRecord = serde_json::from_str(payload)?;
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.method.trim().is_empty() {
            return Err(PayloadError::MissingField("method"));
        }
        if self.path.trim().is_empty() {
            return Err(PayloadError::MissingField("path"));
        }
        Ok(())
    }
}

/// Pre-aggregated hourly counts as served by the statistics endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPoint {
    /// Start of the hour, milliseconds since the Unix epoch
    pub date: i64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub redirect: u64,
    #[serde(default)]
    pub bad_request: u64,
    #[serde(default)]
    pub error: u64,
    #[serde(default)]
    pub provisional: u64,
}

/// Interpret a bare integer as either seconds or milliseconds since the epoch
pub fn normalize_epoch(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value
    } else if value >= SECONDS_THRESHOLD {
        value * 1000
    } else {
        value
    }
}

/// Short, char-boundary-safe prefix of a payload for log lines
pub fn log_prefix(payload: &str) -> &str {
    match payload.char_indices().nth(LOG_PREFIX_LEN) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}

pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn deserialize_timestamp_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Int(v) => Ok(normalize_epoch(v)),
        RawTimestamp::Float(v) => Ok(normalize_epoch(v as i64)),
        RawTimestamp::Text(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                return Ok(dt.timestamp_millis());
            }
            s.trim()
                .parse::<i64>()
                .map(normalize_epoch)
                .map_err(|_| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_millis_timestamp() {
        let json = r#"{"req_id":"a1","timestamp":1700000000123,"status":200,"method":"GET","path":"/"}"#;
        let record = EventRecord::from_json(json).unwrap();

        assert_eq!(record.id, "a1");
        assert_eq!(record.timestamp, 1_700_000_000_123);
        assert_eq!(record.duration_ms, None);
        assert!(record.data.is_none());
    }

    #[test]
    fn test_decode_seconds_timestamp() {
        let json = r#"{"req_id":"a2","timestamp":1700000000,"status":404,"method":"GET","path":"/x","took":12}"#;
        let record = EventRecord::from_json(json).unwrap();

        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.duration_ms, Some(12));
    }

    #[test]
    fn test_decode_rfc3339_and_numeric_string() {
        let json = r#"{"req_id":"a3","timestamp":"2023-11-14T22:13:20Z","status":200,"method":"POST","path":"/api"}"#;
        let record = EventRecord::from_json(json).unwrap();
        assert_eq!(record.timestamp, 1_700_000_000_000);

        let json = r#"{"req_id":"a4","timestamp":"1700000000","status":200,"method":"POST","path":"/api"}"#;
        let record = EventRecord::from_json(json).unwrap();
        assert_eq!(record.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_reject_malformed_payloads() {
        assert!(matches!(
            EventRecord::from_json("not json"),
            Err(PayloadError::Json(_))
        ));

        let bad_ts = r#"{"req_id":"a","timestamp":"yesterday","status":200,"method":"GET","path":"/"}"#;
        assert!(EventRecord::from_json(bad_ts).is_err());

        let no_method = r#"{"req_id":"a","timestamp":1,"status":200,"method":"","path":"/"}"#;
        assert!(matches!(
            EventRecord::from_json(no_method),
            Err(PayloadError::MissingField("method"))
        ));
    }

    #[test]
    fn test_opaque_data_is_kept() {
        let json = r#"{"req_id":"d","timestamp":5,"status":500,"method":"GET","path":"/","data":{"k":[1,2]}}"#;
        let record = EventRecord::from_json(json).unwrap();
        assert_eq!(record.data, Some(serde_json::json!({"k": [1, 2]})));
    }

    #[test]
    fn test_stats_point_defaults() {
        let point: StatsPoint = serde_json::from_str(r#"{"date":3600000,"error":2}"#).unwrap();
        assert_eq!(point.date, 3_600_000);
        assert_eq!(point.error, 2);
        assert_eq!(point.success, 0);
        assert_eq!(point.provisional, 0);
    }

    #[test]
    fn test_log_prefix_truncates() {
        let long = "x".repeat(500);
        assert_eq!(log_prefix(&long).len(), 120);
        assert_eq!(log_prefix("short"), "short");
    }
}
