//! Admin dashboard (static HTML) and its token-guarded JSON API. The API
//! reuses the jobs handlers; this module only adds the gate and the page.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};

use crate::auth::verify_bearer;
use crate::responses::api_error;
use crate::state::AppState;

/// Gate for everything under `/admin`: 404 while disabled (the surface
/// stays invisible), 503 without a token, 401 on mismatch. The dashboard
/// page itself is served unauthenticated so the operator can enter the
/// token.
pub async fn admin_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let admin = &state.ctx.cfg.admin;
    if !admin.enabled {
        return api_error(StatusCode::NOT_FOUND, "admin_disabled", Some("admin_disabled"));
    }

    if request.uri().path() == "/admin" {
        return next.run(request).await;
    }

    let Some(token) = admin.bearer_token.as_ref().filter(|token| !token.is_empty()) else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin_token_not_configured",
            Some("admin_token_not_configured"),
        );
    };
    if !verify_bearer(request.headers(), token.expose()) {
        return api_error(StatusCode::UNAUTHORIZED, "unauthorized", Some("unauthorized"));
    }

    next.run(request).await
}

pub async fn admin_dashboard() -> Response {
    Html(DASHBOARD_HTML).into_response()
}

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>arkiv admin</title>
  <style>
    :root { --bg:#f4f6f9; --panel:#fff; --fg:#0f172a; --muted:#475569; --line:#dbe1ea; }
    * { box-sizing:border-box; }
    body { margin:0; padding:20px; font-family:ui-sans-serif,system-ui,sans-serif;
           color:var(--fg); background:var(--bg); }
    .wrap { max-width:1100px; margin:0 auto; display:grid; gap:14px; }
    .panel { background:var(--panel); border:1px solid var(--line); border-radius:12px; padding:14px; }
    h1 { margin:0 0 8px 0; font-size:24px; }
    h2 { margin:0 0 10px 0; font-size:16px; }
    .row { display:flex; gap:8px; flex-wrap:wrap; align-items:center; }
    input, button { border:1px solid var(--line); border-radius:8px; padding:8px 10px; font-size:14px; }
    input { min-width:220px; }
    button { background:#111827; color:#fff; cursor:pointer; }
    pre { margin:0; padding:10px; border:1px solid var(--line); background:#f8fafc;
          border-radius:8px; max-height:360px; overflow:auto; font-size:12px; }
    .status { color:var(--muted); font-size:13px; }
  </style>
</head>
<body>
  <div class="wrap">
    <div class="panel">
      <h1>arkiv admin</h1>
      <p class="status">Queue stats, history, retry and DLQ maintenance.</p>
      <div class="row">
        <input id="token" type="password" placeholder="Bearer token" />
        <button onclick="loadAll()">Refresh</button>
      </div>
    </div>
    <div class="panel"><h2>Queue Stats</h2><pre id="queue">-</pre></div>
    <div class="panel">
      <h2>History</h2>
      <div class="row">
        <input id="historyLimit" value="100" />
        <input id="historyTicket" placeholder="ticket_id (optional)" />
        <button onclick="loadHistory()">Load History</button>
      </div>
      <pre id="history">-</pre>
    </div>
    <div class="panel">
      <h2>Actions</h2>
      <div class="row">
        <input id="retryTicket" placeholder="ticket_id" />
        <button onclick="retryTicket()">Retry Ticket</button>
      </div>
      <div class="row">
        <input id="drainLimit" value="100" />
        <button onclick="drainDlq()">Drain DLQ</button>
      </div>
      <pre id="actions">-</pre>
    </div>
  </div>
  <script>
    function headers() {
      return { "Authorization": "Bearer " + document.getElementById("token").value };
    }
    async function call(method, path, target) {
      const el = document.getElementById(target);
      try {
        const res = await fetch(path, { method, headers: headers() });
        el.textContent = JSON.stringify(await res.json(), null, 2);
      } catch (err) {
        el.textContent = String(err);
      }
    }
    function loadAll() { call("GET", "/admin/api/queue/stats", "queue"); loadHistory(); }
    function loadHistory() {
      const limit = document.getElementById("historyLimit").value || "100";
      const ticket = document.getElementById("historyTicket").value;
      let path = "/admin/api/history?limit=" + encodeURIComponent(limit);
      if (ticket) path += "&ticket_id=" + encodeURIComponent(ticket);
      call("GET", path, "history");
    }
    function retryTicket() {
      const ticket = document.getElementById("retryTicket").value;
      if (ticket) call("POST", "/admin/api/retry/" + encodeURIComponent(ticket), "actions");
    }
    function drainDlq() {
      const limit = document.getElementById("drainLimit").value || "100";
      call("POST", "/admin/api/dlq/drain?limit=" + encodeURIComponent(limit), "actions");
    }
  </script>
</body>
</html>
"#;
