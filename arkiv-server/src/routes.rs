//! Router assembly. Middleware order (outermost first): request-id
//! tagging, rate limit, body-size limit, HMAC verification. HMAC sits
//! innermost so the body-size limit rejects oversized requests before any
//! signature work.

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, healthz, ingest, jobs, metrics};
use crate::middleware::{
    body_limit_middleware, hmac_verify_middleware, rate_limit_middleware, request_id_middleware,
};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let admin_api = Router::new()
        .route("/queue/stats", get(jobs::get_queue_stats))
        .route("/history", get(jobs::get_job_history))
        .route("/dlq/drain", post(jobs::drain_queue_dlq))
        .route("/retry/{ticket_id}", post(ingest::retry_ticket));

    let admin_router = Router::new()
        .route("/", get(admin::admin_dashboard))
        .nest("/api", admin_api)
        .layer(from_fn_with_state(state.clone(), admin::admin_gate));

    let mut app = Router::new()
        .route("/ingest", post(ingest::ingest))
        .route("/ingest/batch", post(ingest::ingest_batch))
        .route("/retry/{ticket_id}", post(ingest::retry_ticket))
        .route("/jobs/queue/stats", get(jobs::get_queue_stats))
        .route("/jobs/queue/dlq/drain", post(jobs::drain_queue_dlq))
        .route("/jobs/history", get(jobs::get_job_history))
        .route("/jobs/{ticket_id}", get(jobs::get_job_status))
        .route("/healthz", get(healthz::healthz))
        .nest("/admin", admin_router);

    if state.ctx.cfg.observability.metrics_enabled {
        app = app.route("/metrics", get(metrics::metrics));
    }

    app.layer(from_fn_with_state(state.clone(), hmac_verify_middleware))
        .layer(from_fn_with_state(state.clone(), body_limit_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
