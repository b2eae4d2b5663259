//! Queue and job inspection endpoints.

use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use arkiv_config::ExecutionBackend;
use arkiv_core::queue::{drain_dlq, queue_stats};

use crate::auth::verify_bearer;
use crate::responses::api_error;
use crate::state::AppState;

fn require_ops_bearer(state: &AppState, request: &Request) -> Option<Response> {
    let Some(token) = state.ctx.cfg.admin.bearer_token.as_ref().filter(|t| !t.is_empty())
    else {
        return Some(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ops_token_not_configured",
            Some("ops_token_not_configured"),
        ));
    };
    if !verify_bearer(request.headers(), token.expose()) {
        return Some(api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            Some("unauthorized"),
        ));
    }
    None
}

pub async fn get_queue_stats(State(state): State<AppState>) -> Response {
    if state.ctx.cfg.workflow.execution_backend != ExecutionBackend::RedisQueue {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            Some("queue_unavailable"),
        );
    }
    let Some(backend) = state.ctx.streams.as_ref() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            Some("queue_unavailable"),
        );
    };

    match queue_stats(backend.as_ref(), &state.ctx.cfg.workflow).await {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_unavailable",
            Some("queue_unavailable"),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub ticket_id: Option<u64>,
}

fn default_history_limit() -> usize {
    100
}

pub async fn get_job_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    request: Request,
) -> Response {
    if let Some(denied) = require_ops_bearer(&state, &request) {
        return denied;
    }

    match state
        .ctx
        .history
        .read(query.limit.clamp(1, 5000), query.ticket_id)
        .await
    {
        Ok(items) => Json(json!({
            "status": "ok",
            "count": items.len(),
            "items": items,
        }))
        .into_response(),
        Err(_) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "history_unavailable",
            Some("history_unavailable"),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DrainQuery {
    #[serde(default = "default_drain_limit")]
    pub limit: usize,
}

fn default_drain_limit() -> usize {
    100
}

pub async fn drain_queue_dlq(
    State(state): State<AppState>,
    Query(query): Query<DrainQuery>,
    request: Request,
) -> Response {
    if let Some(denied) = require_ops_bearer(&state, &request) {
        return denied;
    }
    let Some(backend) = state.ctx.streams.as_ref() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dlq_unavailable",
            Some("dlq_unavailable"),
        );
    };

    let limit = query.limit.clamp(1, 1000);
    match drain_dlq(
        backend.as_ref(),
        &state.ctx.cfg.workflow.queue_dlq_stream,
        limit,
    )
    .await
    {
        Ok(drained) => Json(json!({"status": "ok", "drained": drained})).into_response(),
        Err(_) => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dlq_unavailable",
            Some("dlq_unavailable"),
        ),
    }
}

pub async fn get_job_status(
    State(state): State<AppState>,
    Path(ticket_id): Path<u64>,
) -> Response {
    Json(json!({
        "ticket_id": ticket_id,
        "in_flight": state.ctx.pipeline.ticket_guard().is_in_flight(ticket_id),
        "shutting_down": state.ctx.shutdown.is_shutting_down(),
    }))
    .into_response()
}
