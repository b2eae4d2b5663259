use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::auth::verify_bearer;
use crate::state::AppState;

pub async fn metrics(State(state): State<AppState>, request: Request) -> Response {
    if let Some(token) = state
        .ctx
        .cfg
        .observability
        .metrics_bearer_token
        .as_ref()
        .filter(|token| !token.is_empty())
        && !verify_bearer(request.headers(), token.expose())
    {
        return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
    }

    let (body, content_type) = state.ctx.metrics.render_text();
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}
