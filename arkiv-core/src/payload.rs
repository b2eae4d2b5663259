//! Webhook payload parsing.
//!
//! A small tagged parser instead of duck-typing: prefer an explicit
//! `ticket_id`, fall back to `ticket.id`, reject booleans and non-positive
//! integers, and carry the remaining fields opaquely to the job envelope.

use serde_json::{Map, Value};

/// The request-id annotation the intake handler stuffs into the payload so
/// the pipeline can echo it into notes and history.
pub const REQUEST_ID_KEY: &str = "_request_id";

fn coerce_ticket_id(value: &Value) -> Option<u64> {
    match value {
        Value::Bool(_) | Value::Null => None,
        Value::Number(num) => num
            .as_i64()
            .filter(|id| *id > 0)
            .map(|id| id as u64),
        Value::String(text) => {
            let text = text.trim();
            let text = text.strip_prefix('+').unwrap_or(text);
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse::<u64>().ok().filter(|id| *id > 0)
        }
        _ => None,
    }
}

/// Extract the ticket id: top-level `ticket_id` first, then `ticket.id`,
/// then a scalar `ticket` value as a last resort.
pub fn extract_ticket_id(payload: &Map<String, Value>) -> Option<u64> {
    if let Some(tid) = payload.get("ticket_id").and_then(coerce_ticket_id) {
        return Some(tid);
    }
    match payload.get("ticket") {
        Some(Value::Object(ticket)) => ticket.get("id").and_then(coerce_ticket_id),
        Some(other) => coerce_ticket_id(other),
        None => None,
    }
}

/// `payload.user.login`, for current_agent username resolution.
pub fn payload_user_login(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("user")?
        .as_object()?
        .get("login")?
        .as_str()
        .map(str::trim)
        .filter(|login| !login.is_empty())
        .map(str::to_string)
}

pub fn payload_request_id(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get(REQUEST_ID_KEY)?
        .as_str()
        .map(str::trim)
        .filter(|rid| !rid.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn prefers_explicit_ticket_id() {
        let payload = map(json!({"ticket_id": 7, "ticket": {"id": 9}}));
        assert_eq!(extract_ticket_id(&payload), Some(7));
    }

    #[test]
    fn falls_back_to_nested_ticket_id() {
        let payload = map(json!({"ticket": {"id": 123}}));
        assert_eq!(extract_ticket_id(&payload), Some(123));
    }

    #[test]
    fn accepts_numeric_strings() {
        let payload = map(json!({"ticket_id": " +42 "}));
        assert_eq!(extract_ticket_id(&payload), Some(42));
    }

    #[test]
    fn rejects_booleans_zero_and_negatives() {
        for bad in [json!(true), json!(0), json!(-3), json!("abc"), json!("")] {
            let payload = map(json!({"ticket_id": bad}));
            assert_eq!(extract_ticket_id(&payload), None, "{payload:?}");
        }
    }

    #[test]
    fn scalar_ticket_value_is_a_last_resort() {
        let payload = map(json!({"ticket": "55"}));
        assert_eq!(extract_ticket_id(&payload), Some(55));
    }

    #[test]
    fn reads_user_login_and_request_id() {
        let payload = map(json!({
            "user": {"login": " agent2 "},
            REQUEST_ID_KEY: "req-1",
        }));
        assert_eq!(payload_user_login(&payload).as_deref(), Some("agent2"));
        assert_eq!(payload_request_id(&payload).as_deref(), Some("req-1"));
    }
}
