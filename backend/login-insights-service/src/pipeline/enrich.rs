//! Per-record transformation: decode, aggregate, stamp, re-encode

use crate::insights::{AggregationError, AggregationStore, LoginFields};
use serde_json::{Map, Value};

/// Field added to every republished record
pub const PROCESSED_TIMESTAMP: &str = "processed_timestamp";

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("payload is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),

    #[error("failed to encode enriched record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result of enriching one payload
#[derive(Debug)]
pub struct Enriched {
    /// Re-encoded record including `processed_timestamp`
    pub payload: Vec<u8>,
    /// Set when the timestamp could not be bucketed; the record is still published
    pub malformed_timestamp: Option<AggregationError>,
}

/// Decode `payload`, fold it into `store` and stamp it with `processed_at`.
///
/// Every field other than `processed_timestamp` is passed through with its
/// original value and position.
pub fn enrich(
    store: &mut AggregationStore,
    payload: &[u8],
    processed_at: i64,
) -> Result<Enriched, EnrichError> {
    let value: Value = serde_json::from_slice(payload).map_err(EnrichError::Decode)?;
    let mut record = match value {
        Value::Object(record) => record,
        other => return Err(EnrichError::NotAnObject(json_kind(&other))),
    };

    let malformed_timestamp = store.record(&extract_fields(&record)).err();

    record.insert(PROCESSED_TIMESTAMP.to_string(), Value::from(processed_at));
    let payload = serde_json::to_vec(&record).map_err(EnrichError::Encode)?;

    Ok(Enriched {
        payload,
        malformed_timestamp,
    })
}

/// Pull the aggregation fields out of a decoded record.
/// Non-string values for the string fields count as absent.
pub fn extract_fields(record: &Map<String, Value>) -> LoginFields<'_> {
    LoginFields {
        locale: string_field(record, "locale"),
        device_type: string_field(record, "device_type"),
        app_version: string_field(record, "app_version"),
        timestamp: record.get("timestamp"),
    }
}

fn string_field<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
