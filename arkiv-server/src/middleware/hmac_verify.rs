//! Webhook HMAC verification on `POST /ingest`.
//!
//! Accepts `X-Hub-Signature: sha1=<hex>` or `sha256=<hex>`, buffers the
//! body (already bounded by the body-size middleware), and compares in
//! constant time. Running without any webhook secret fails closed unless
//! both unsigned opt-ins are set.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::responses::api_error;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const DELIVERY_ID_HEADER: &str = "X-Zammad-Delivery";

/// Buffer cap when no body-size limit is configured.
const FALLBACK_BODY_CAP: usize = 32 * 1024 * 1024;

fn forbidden() -> Response {
    api_error(StatusCode::FORBIDDEN, "forbidden", Some("forbidden"))
}

fn service_misconfigured() -> Response {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "webhook_auth_not_configured",
        Some("webhook_auth_not_configured"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Sha1,
    Sha256,
}

/// Parse `sha1=<hex>` / `sha256=<hex>`; digest length must match the
/// algorithm exactly.
fn parse_signature(value: &str) -> Option<(Algorithm, Vec<u8>)> {
    let (algorithm, hex_digest) = value.trim().split_once('=')?;
    let algorithm = match algorithm.trim().to_ascii_lowercase().as_str() {
        "sha1" => Algorithm::Sha1,
        "sha256" => Algorithm::Sha256,
        _ => return None,
    };
    let digest = hex::decode(hex_digest.trim()).ok()?;
    let expected_len = match algorithm {
        Algorithm::Sha1 => 20,
        Algorithm::Sha256 => 32,
    };
    (digest.len() == expected_len).then_some((algorithm, digest))
}

fn verify(secret: &[u8], algorithm: Algorithm, body: &[u8], signature: &[u8]) -> bool {
    match algorithm {
        Algorithm::Sha1 => {
            let mut mac =
                <Hmac<Sha1> as Mac>::new_from_slice(secret).expect("hmac accepts any key length");
            mac.update(body);
            mac.verify_slice(signature).is_ok()
        }
        Algorithm::Sha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
                .expect("hmac accepts any key length");
            mac.update(body);
            mac.verify_slice(signature).is_ok()
        }
    }
}

pub async fn hmac_verify_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::POST || request.uri().path() != "/ingest" {
        return next.run(request).await;
    }

    let cfg = &state.ctx.cfg;
    let webhook = &cfg.hardening.webhook;

    if webhook.require_delivery_id {
        let delivery = request
            .headers()
            .get(DELIVERY_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if delivery.is_empty() {
            return api_error(
                StatusCode::BAD_REQUEST,
                "missing_delivery_id",
                Some("missing_delivery_id"),
            );
        }
    }

    let Some(secret) = cfg.webhook_secret() else {
        // Fail closed: running without webhook auth needs both opt-ins.
        if webhook.allow_unsigned && webhook.allow_unsigned_when_no_secret {
            return next.run(request).await;
        }
        return service_misconfigured();
    };

    let Some(signature_raw) = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        return forbidden();
    };
    let Some((algorithm, signature)) = parse_signature(&signature_raw) else {
        return forbidden();
    };

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, FALLBACK_BODY_CAP).await {
        Ok(bytes) => bytes,
        // Disconnect mid-read: the signature can never be verified.
        Err(_) => return forbidden(),
    };

    if !verify(secret.expose().as_bytes(), algorithm, &body_bytes, &signature) {
        return forbidden();
    }

    let request = Request::from_parts(parts, Body::from(Bytes::from(body_bytes)));
    next.run(request).await
}
