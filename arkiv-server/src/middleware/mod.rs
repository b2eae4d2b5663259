//! Middleware chain, outermost first: request-id tagging, rate limit,
//! body-size limit, webhook HMAC verification.

pub mod body_limit;
pub mod hmac_verify;
pub mod rate_limit;
pub mod request_id;

pub use body_limit::body_limit_middleware;
pub use hmac_verify::{DELIVERY_ID_HEADER, SIGNATURE_HEADER, hmac_verify_middleware};
pub use rate_limit::rate_limit_middleware;
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
