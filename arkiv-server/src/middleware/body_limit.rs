//! Body-size limit on `/ingest`, enforced while streaming so an oversized
//! body is rejected before any signature work. A client disconnect
//! mid-read is treated as an authentication failure downstream would
//! never be able to verify.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::StreamExt;

use crate::responses::api_error;
use crate::state::AppState;

fn too_large() -> Response {
    api_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        "request_too_large",
        Some("request_too_large"),
    )
}

pub async fn body_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let max_bytes = state.ctx.cfg.hardening.body_size_limit.max_bytes;
    if max_bytes == 0
        || request.method() != Method::POST
        || request.uri().path() != "/ingest"
    {
        return next.run(request).await;
    }

    // Declared length first; the streamed count below catches liars.
    if let Some(declared) = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        && declared > max_bytes
    {
        return too_large();
    }

    let (parts, body) = request.into_parts();
    let mut stream = body.into_data_stream();
    let mut buffered: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                if buffered.len() as u64 + chunk.len() as u64 > max_bytes {
                    return too_large();
                }
                buffered.extend_from_slice(&chunk);
            }
            Err(_) => {
                // Disconnect or transport fault mid-body.
                return api_error(StatusCode::FORBIDDEN, "forbidden", Some("forbidden"));
            }
        }
    }

    let request = Request::from_parts(parts, Body::from(Bytes::from(buffered)));
    next.run(request).await
}
