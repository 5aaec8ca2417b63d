//! The relay's plain-HTTP surface: health/status endpoints, the
//! rate-limited provisioning endpoint, and path-sanitized static serving
//! of the updater payload (spec.md §6 "HTTP endpoints").

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State as AxumState};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tokio::fs;

use crate::state::State;

const PROVISION_MAX_PER_WINDOW: u32 = 10;
const PROVISION_WINDOW: Duration = Duration::from_secs(15 * 60);
const PROVISION_BODY_CAP_BYTES: usize = 64 * 1024;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn require_admin(state: &State, headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = state.read().await.config.admin_token.clone();
    match bearer_token(headers) {
        Some(token) if crate::auth::constant_time_eq(token, &expected) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// `GET /health`: unauthenticated liveness probe (spec.md §6:
/// `{status,uptime,connectedAgents,connectedAdmins,pendingRequests,activeSessions}`).
pub async fn health(AxumState(state): AxumState<State>) -> impl IntoResponse {
    let guard = state.read().await;
    Json(json!({
        "status": "ok",
        "uptime": guard.started_at.elapsed().as_secs(),
        "connectedAgents": guard.agents.len(),
        "connectedAdmins": guard.admins.len(),
        "pendingRequests": guard.pending.len(),
        "activeSessions": guard.active.len(),
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    agents_online: usize,
    admins_online: usize,
    pending_requests: usize,
    active_sessions: usize,
    uptime_note: &'static str,
}

/// `GET /api/status`.
pub async fn status(
    AxumState(state): AxumState<State>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, &headers).await?;
    let guard = state.read().await;
    Ok(Json(StatusResponse {
        agents_online: guard.agents.len(),
        admins_online: guard.admins.len(),
        pending_requests: guard.pending.len(),
        active_sessions: guard.active.len(),
        uptime_note: "measured by the process supervisor, not the relay itself",
    }))
}

/// `GET /api/sessions`: the persisted session history.
pub async fn sessions(
    AxumState(state): AxumState<State>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, &headers).await?;
    let guard = state.read().await;
    Ok(Json(guard.session_log.entries().to_vec()))
}

#[derive(Serialize)]
struct StatsResponse {
    devices_registered: usize,
    devices_online: usize,
    sessions_completed: usize,
}

/// `GET /api/stats`.
pub async fn stats(
    AxumState(state): AxumState<State>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, &headers).await?;
    let guard = state.read().await;
    let devices_registered = guard.devices.all().count();
    Ok(Json(StatsResponse {
        devices_registered,
        devices_online: guard.agents.len(),
        sessions_completed: guard.session_log.entries().len(),
    }))
}

fn provisioning_allowed(state: &mut crate::state::ServerState, addr: std::net::IpAddr) -> bool {
    let now = Instant::now();
    let entry = state
        .provision_attempts
        .entry(addr)
        .or_insert((now, 0));
    if now.duration_since(entry.0) >= PROVISION_WINDOW {
        *entry = (now, 0);
    }
    entry.1 += 1;
    entry.1 <= PROVISION_MAX_PER_WINDOW
}

/// `POST /api/provision`: issue a one-time agent registration token for
/// auto-provisioning, without requiring the agent to already hold a
/// credential. Body is capped at 64 KiB and the route itself is
/// rate-limited per IP to 10 requests per 15 minutes (spec.md §6
/// "Provisioning").
pub async fn provision(
    AxumState(state): AxumState<State>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<impl IntoResponse, Response> {
    if body.len() > PROVISION_BODY_CAP_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE.into_response());
    }

    let mut guard = state.write().await;
    if !provisioning_allowed(&mut guard, addr.ip()) {
        return Err(Json(json!({
            "error": "RATE_LIMITED",
            "message": "too many provisioning requests from this address",
        }))
        .into_response());
    }
    let token = guard
        .agent_tokens
        .issue()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())?;
    drop(guard);

    Ok(Json(json!({ "agent_token": token })))
}

/// `GET /update/:file`: serve updater payloads from `data_dir/updates`,
/// rejecting any path component that would escape that directory.
pub async fn serve_update(Path(file): Path<String>, AxumState(state): AxumState<State>) -> Response {
    if file.contains('/') || file.contains('\\') || file == ".." || file.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let updates_dir = state.read().await.config.data_dir.join("updates");
    let candidate: PathBuf = updates_dir.join(&file);

    let Ok(canonical) = fs::canonicalize(&candidate).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(updates_dir_canonical) = fs::canonicalize(&updates_dir).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !canonical.starts_with(&updates_dir_canonical) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match fs::read(&canonical).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
