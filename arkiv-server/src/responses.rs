//! Consistent JSON error shapes: `{"detail": ..., "code": ..., "hint": ...}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub fn api_error(status: StatusCode, detail: &str, code: Option<&str>) -> Response {
    api_error_with_hint(status, detail, code, None)
}

pub fn api_error_with_hint(
    status: StatusCode,
    detail: &str,
    code: Option<&str>,
    hint: Option<&str>,
) -> Response {
    let mut content = json!({ "detail": detail });
    if let Some(code) = code {
        content["code"] = json!(code);
    }
    if let Some(hint) = hint {
        content["hint"] = json!(hint);
    }
    (status, Json(content)).into_response()
}
