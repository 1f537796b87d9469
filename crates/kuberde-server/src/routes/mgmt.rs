//! The activity/wake interface (spec §4.1 item 4): `GET
//! /mgmt/agents/<id>` and `PUT /api/agents/<id>/scale-up`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use kuberde_types::{AgentIdentity, CoreError};

use crate::auth::authorize_agent_access;
use crate::state::AppState;
use crate::wake::{wake_agent, WakeBudget};

#[derive(Serialize)]
pub struct AgentStatus {
    pub online: bool,
    pub last_activity: Option<String>,
    pub has_active_session: bool,
    pub active_connections: u64,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, CoreError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| CoreError::Unauthorized("missing or malformed Authorization header".into()))
}

/// No auth requirement is spelled out beyond "(per-deployment policy)"
/// (spec §6): this is an internal endpoint the Operator calls, reached
/// only over the cluster-internal network in a real deployment. It
/// still requires a presentable identity string.
pub async fn get_agent_status(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let identity = match AgentIdentity::parse(&id) {
        Ok(i) => i,
        Err(e) => return CoreError::BadRequest(e.to_string()).into_response(),
    };

    let tunnel = state.registry.get(&identity).await;
    let online = tunnel.as_ref().is_some();
    let last_activity = tunnel.as_ref().map(|t| {
        chrono::DateTime::<chrono::Utc>::from_timestamp_millis(t.last_activity_millis())
            .unwrap_or_else(chrono::Utc::now)
            .to_rfc3339()
    });
    let active_connections = tunnel.as_ref().map(|t| t.active_connections()).unwrap_or(0);
    let has_active_session = state.active_sessions.get(&identity.tunnel_key()).map(|n| *n > 0).unwrap_or(false);

    Json(AgentStatus { online, last_activity, has_active_session, active_connections }).into_response()
}

/// Triggers the wake-up procedure (spec §4.1 item 4: "authenticated,
/// owner-only"). This path lives on the Server but the actual scale is
/// performed through the Kubernetes API exactly like any other wake
/// (it does not call back into the Operator process).
pub async fn scale_up(Path(id): Path<String>, headers: HeaderMap, State(state): State<AppState>) -> Response {
    let identity = match AgentIdentity::parse(&id) {
        Ok(i) => i,
        Err(e) => return CoreError::BadRequest(e.to_string()).into_response(),
    };

    let token = match bearer_token(&headers) {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    let claims = match state.jwks.validate(token).await {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = authorize_agent_access(&identity, &claims, state.config.tenancy_enabled) {
        return e.into_response();
    }

    let result = wake_agent(
        &state.kube,
        &state.config.namespace,
        &state.registry,
        &state.wake_locks,
        &state.metrics,
        &identity,
        WakeBudget::Http,
    )
    .await;

    match result {
        Ok(()) => (axum::http::StatusCode::ACCEPTED, "scale-up requested").into_response(),
        Err(e) => e.into_response(),
    }
}
