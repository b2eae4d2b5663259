//! Webhook intake: validate minimally, extract ticket and delivery ids,
//! dispatch, and answer 202 without waiting on the pipeline.

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use arkiv_core::payload::extract_ticket_id;

use crate::middleware::{DELIVERY_ID_HEADER, RequestId};
use crate::responses::api_error;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IngestQuery {
    #[serde(default)]
    pub dry_run: bool,
}

fn shutting_down() -> Response {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service is shutting down",
        Some("shutting_down"),
    )
}

fn invalid_payload() -> Response {
    api_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Payload must contain ticket.id or ticket_id (positive integer)",
        Some("invalid_payload"),
    )
}

fn parse_object(value: &Value) -> Option<(Map<String, Value>, u64)> {
    let object = value.as_object()?.clone();
    let ticket_id = extract_ticket_id(&object)?;
    Some((object, ticket_id))
}

async fn read_json_body(request: Request) -> Result<Value, Response> {
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "unreadable body", Some("bad_request")))?;
    serde_json::from_slice(&body)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid JSON body", Some("bad_request")))
}

pub async fn ingest(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    request: Request,
) -> Response {
    if state.ctx.shutdown.is_shutting_down() {
        return shutting_down();
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|rid| rid.0.clone());
    let delivery_id = request
        .headers()
        .get(DELIVERY_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let body = match read_json_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let Some((payload, ticket_id)) = parse_object(&body) else {
        return invalid_payload();
    };

    if query.dry_run {
        return (
            StatusCode::ACCEPTED,
            Json(json!({"status": "dry_run_accepted", "ticket_id": ticket_id})),
        )
            .into_response();
    }

    if let Err(err) = state.ctx.dispatch(delivery_id, payload, request_id).await {
        warn!(ticket_id, error = %err, "intake dispatch failed");
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dispatch_unavailable",
            Some("dispatch_unavailable"),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "ticket_id": ticket_id})),
    )
        .into_response()
}

pub async fn ingest_batch(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    request: Request,
) -> Response {
    if state.ctx.shutdown.is_shutting_down() {
        return shutting_down();
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|rid| rid.0.clone());

    let body = match read_json_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let Some(items) = body.as_array() else {
        return invalid_payload();
    };

    let mut payloads = Vec::with_capacity(items.len());
    for item in items {
        let Some((payload, _)) = parse_object(item) else {
            return invalid_payload();
        };
        payloads.push(payload);
    }

    if query.dry_run {
        return (
            StatusCode::ACCEPTED,
            Json(json!({"status": "dry_run_accepted", "count": payloads.len()})),
        )
            .into_response();
    }

    let mut accepted = 0usize;
    for payload in payloads {
        match state
            .ctx
            .dispatch(None, payload, request_id.clone())
            .await
        {
            Ok(_) => accepted += 1,
            Err(err) => {
                warn!(error = %err, "batch dispatch failed");
            }
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "count": accepted})),
    )
        .into_response()
}

/// Manual replay: no delivery id, so deduplication never suppresses it.
pub async fn retry_ticket(
    State(state): State<AppState>,
    axum::extract::Path(ticket_id): axum::extract::Path<u64>,
    request: Request,
) -> Response {
    if state.ctx.shutdown.is_shutting_down() {
        return shutting_down();
    }
    if ticket_id == 0 {
        return invalid_payload();
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|rid| rid.0.clone());

    let payload = json!({"ticket_id": ticket_id})
        .as_object()
        .expect("literal object")
        .clone();

    if let Err(err) = state.ctx.dispatch(None, payload, request_id).await {
        warn!(ticket_id, error = %err, "retry dispatch failed");
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dispatch_unavailable",
            Some("dispatch_unavailable"),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "ticket_id": ticket_id})),
    )
        .into_response()
}
