//! The unit of work on the durable queue.
//!
//! Retries never mutate an envelope; the retry path always appends a new
//! one with `attempt + 1` and a future `not_before_ts`.

use serde_json::{Map, Value};

use super::backend::StreamEntry;

pub const MAX_LAST_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Stream position, assigned by the queue.
    pub message_id: String,
    pub payload: Map<String, Value>,
    pub delivery_id: Option<String>,
    /// 0 on first enqueue.
    pub attempt: u32,
    /// Earliest execution time (unix seconds); 0 means "now".
    pub not_before_ts: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeDecodeError {
    #[error("payload_json is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload_json is not an object")]
    NotAnObject,
}

fn truncate_error(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.len() <= MAX_LAST_ERROR_LEN {
        return trimmed.to_string();
    }
    let mut end = MAX_LAST_ERROR_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

/// Canonical JSON: compact separators, sorted keys (serde_json maps are
/// ordered), so identical payloads encode identically.
pub fn canonical_payload_json(payload: &Map<String, Value>) -> String {
    serde_json::to_string(&Value::Object(payload.clone())).expect("payload serializes")
}

/// Field encoding for `XADD`.
pub fn encode_fields(
    payload: &Map<String, Value>,
    delivery_id: Option<&str>,
    attempt: u32,
    not_before_ts: f64,
    enqueued_at: f64,
    last_error: Option<&str>,
) -> Vec<(String, String)> {
    let mut fields = vec![
        ("payload_json".to_string(), canonical_payload_json(payload)),
        (
            "delivery_id".to_string(),
            delivery_id.unwrap_or_default().to_string(),
        ),
        ("attempt".to_string(), attempt.to_string()),
        (
            "not_before_ts".to_string(),
            format!("{}", not_before_ts.max(0.0)),
        ),
        ("enqueued_at".to_string(), format!("{enqueued_at}")),
    ];
    if let Some(last_error) = last_error.filter(|msg| !msg.is_empty()) {
        fields.push(("last_error".to_string(), truncate_error(last_error)));
    }
    fields
}

pub fn decode_entry(entry: &StreamEntry) -> Result<Envelope, EnvelopeDecodeError> {
    let payload_raw = entry.field("payload_json").unwrap_or("{}");
    let payload: Value = serde_json::from_str(payload_raw)?;
    let Value::Object(payload) = payload else {
        return Err(EnvelopeDecodeError::NotAnObject);
    };

    let delivery_id = entry
        .field("delivery_id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let last_error = entry
        .field("last_error")
        .map(str::trim)
        .filter(|msg| !msg.is_empty())
        .map(str::to_string);

    Ok(Envelope {
        message_id: entry.id.clone(),
        payload,
        delivery_id,
        attempt: entry
            .field("attempt")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|attempt| attempt.max(0) as u32)
            .unwrap_or(0),
        not_before_ts: entry
            .field("not_before_ts")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|ts| ts.max(0.0))
            .unwrap_or(0.0),
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use serde_json::json;

    fn entry(fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id: "1-0".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn round_trip_encode_decode() {
        let payload = json!({"ticket_id": 123, "b": 1, "a": 2})
            .as_object()
            .unwrap()
            .clone();
        let fields = encode_fields(&payload, Some("d-1"), 2, 17.5, 100.0, Some("boom"));
        let entry = StreamEntry {
            id: "5-0".to_string(),
            fields: fields.into_iter().collect(),
        };
        let envelope = decode_entry(&entry).unwrap();
        assert_eq!(envelope.message_id, "5-0");
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.delivery_id.as_deref(), Some("d-1"));
        assert_eq!(envelope.attempt, 2);
        assert_eq!(envelope.not_before_ts, 17.5);
        assert_eq!(envelope.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let payload = json!({"z": 1, "a": 2}).as_object().unwrap().clone();
        assert_eq!(canonical_payload_json(&payload), r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn decode_defaults_for_missing_fields() {
        let envelope = decode_entry(&entry(&[("payload_json", "{}")])).unwrap();
        assert_eq!(envelope.attempt, 0);
        assert_eq!(envelope.not_before_ts, 0.0);
        assert!(envelope.delivery_id.is_none());
        assert!(envelope.last_error.is_none());
    }

    #[test]
    fn decode_clamps_negative_values() {
        let envelope = decode_entry(&entry(&[
            ("payload_json", "{}"),
            ("attempt", "-3"),
            ("not_before_ts", "-1.5"),
        ]))
        .unwrap();
        assert_eq!(envelope.attempt, 0);
        assert_eq!(envelope.not_before_ts, 0.0);
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        assert!(matches!(
            decode_entry(&entry(&[("payload_json", "[1,2]")])),
            Err(EnvelopeDecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_entry(&entry(&[("payload_json", "{oops")])),
            Err(EnvelopeDecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn last_error_is_bounded() {
        let long = "e".repeat(700);
        let payload = Map::new();
        let fields = encode_fields(&payload, None, 0, 0.0, 0.0, Some(&long));
        let last_error = fields
            .iter()
            .find(|(k, _)| k == "last_error")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(last_error.len(), MAX_LAST_ERROR_LEN);
    }
}
