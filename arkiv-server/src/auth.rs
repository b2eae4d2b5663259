//! Bearer-token checks for the ops, admin, and metrics surfaces.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// True iff `Authorization: Bearer <token>` matches `expected`. Both sides
/// are run through an HMAC first so the comparison is constant-time in the
/// token bytes.
pub fn verify_bearer(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let Some(provided) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
    else {
        return false;
    };

    let tag = |input: &str| {
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(b"bearer-compare").expect("static key");
        mac.update(input.as_bytes());
        mac.finalize().into_bytes()
    };

    tag(expected) == tag(provided)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(
                axum::http::header::AUTHORIZATION,
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn accepts_matching_token_only() {
        assert!(verify_bearer(&headers(Some("Bearer s3cret")), "s3cret"));
        assert!(!verify_bearer(&headers(Some("Bearer wrong")), "s3cret"));
        assert!(!verify_bearer(&headers(Some("Basic s3cret")), "s3cret"));
        assert!(!verify_bearer(&headers(None), "s3cret"));
        assert!(!verify_bearer(&headers(Some("Bearer s3cret")), ""));
    }
}
