use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub const SERVICE_NAME: &str = "arkiv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn healthz(State(state): State<AppState>) -> Response {
    let mut out = json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    });
    if !state.ctx.cfg.observability.healthz_omit_version {
        out["service"] = json!(SERVICE_NAME);
        out["version"] = json!(SERVICE_VERSION);
    }
    Json(out).into_response()
}
