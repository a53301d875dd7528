use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::cors::CorsLayer;

use crate::{config::Settings, manager::ConnectionManager, store::SqliteStore, utils::now_ts};

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub store: SqliteStore,
    pub manager: ConnectionManager,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/health", get(api_health))
        .route("/api/events", get(api_events))
        .route("/api/progress", get(api_progress))
        .route("/api/reconnect", post(api_reconnect))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn serve_dashboard(settings: Settings, store: SqliteStore, manager: ConnectionManager) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .with_context(|| {
            format!(
                "dashboard addr parse {}:{}",
                settings.dashboard_host, settings.dashboard_port
            )
        })?;

    let app = router(DashboardState {
        settings,
        store,
        manager,
    });

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    Html(render_index_html(&st.settings.realtime_url, st.store.path()))
}

fn render_index_html(realtime_url: &str, sqlite_path: &str) -> String {
    let mut html = String::from(INDEX_HEAD);
    html.push_str(&format!(
        "<p class=\"meta\">endpoint <code>{}</code> &middot; journal <code>{}</code></p>\n",
        escape_html(realtime_url),
        escape_html(sqlite_path)
    ));
    html.push_str(INDEX_BODY);
    html
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const INDEX_HEAD: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>taskwire</title>
<style>
body { font-family: ui-monospace, monospace; margin: 2rem; background: #111; color: #ddd; }
.meta { color: #888; }
.state { font-size: 1.4rem; }
.connected { color: #6c6; } .reconnecting, .connecting { color: #dc6; }
.error, .timeout { color: #e66; } .disconnected { color: #999; }
table { border-collapse: collapse; margin-top: 1rem; }
td, th { padding: 0.2rem 0.8rem; border-bottom: 1px solid #333; text-align: left; }
button { margin-top: 1rem; }
</style>
</head>
<body>
<h1>taskwire</h1>
"#;

const INDEX_BODY: &str = r#"<div class="state" id="state">loading</div>
<pre id="metrics"></pre>
<button onclick="fetch('/api/reconnect', {method: 'POST'}).then(refresh)">reconnect</button>
<h2>tasks</h2>
<table id="progress"><tr><th>task</th><th>progress</th><th>stage</th><th>status</th><th>message</th></tr></table>
<h2>recent events</h2>
<table id="events"><tr><th>ts</th><th>task</th><th>kind</th><th>payload</th></tr></table>
<script>
function cell(v) { const td = document.createElement('td'); td.textContent = v == null ? '' : v; return td; }
function fill(id, rows, cols) {
  const t = document.getElementById(id);
  while (t.rows.length > 1) t.deleteRow(1);
  for (const r of rows) { const tr = t.insertRow(); for (const c of cols) tr.appendChild(cell(c(r))); }
}
async function refresh() {
  const s = await (await fetch('/api/status')).json();
  const el = document.getElementById('state');
  el.textContent = s.state + (s.current_task_id ? ' (' + s.current_task_id + ')' : '');
  el.className = 'state ' + s.state;
  document.getElementById('metrics').textContent = JSON.stringify(s.metrics, null, 2);
  fill('progress', await (await fetch('/api/progress')).json(),
    [r => r.task_id, r => r.progress, r => r.stage, r => r.status, r => r.message]);
  fill('events', await (await fetch('/api/events?limit=25')).json(),
    [r => new Date(r.ts * 1000).toISOString(), r => r.task_id, r => r.kind, r => JSON.stringify(r.payload)]);
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;

async fn api_status(State(st): State<DashboardState>) -> impl IntoResponse {
    let snap = st.manager.snapshot();
    Json(serde_json::json!({
        "ts": now_ts(),
        "url": st.settings.realtime_url,
        "state": snap.state,
        "metrics": snap.metrics,
        "current_task_id": snap.current_task_id,
        "connection_id": snap.connection_id,
        "queued": snap.queued,
        "active_timers": snap.active_timers,
        "subscribers": st.manager.subscriber_count(),
    }))
}

async fn api_health(State(st): State<DashboardState>) -> impl IntoResponse {
    let ts = now_ts();
    let health = st
        .store
        .fetch_runtime_statuses()
        .unwrap_or_else(|_| serde_json::json!({}));
    Json(serde_json::json!({ "ts": ts, "components": health }))
}

#[derive(Deserialize)]
struct EventsQ {
    limit: Option<usize>,
    task_id: Option<String>,
}

async fn api_events(State(st): State<DashboardState>, Query(q): Query<EventsQ>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(100);
    match st.store.fetch_recent_events(limit, q.task_id.as_deref()) {
        Ok(rows) => Json(JsonValue::Array(rows)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_progress(State(st): State<DashboardState>) -> impl IntoResponse {
    match st.store.fetch_task_progress() {
        Ok(rows) => Json(JsonValue::Array(rows)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_reconnect(State(st): State<DashboardState>) -> impl IntoResponse {
    let manager = st.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.reconnect().await {
            log::warn!("dashboard.reconnect_failed err={}", e);
        }
    });
    Json(serde_json::json!({"ok": true, "ts": now_ts()}))
}
