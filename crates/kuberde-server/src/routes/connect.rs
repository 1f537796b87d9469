//! `GET /connect/<AgentIdentity>` — the CLI/SSH user connection
//! endpoint (spec §4.1 item 2).

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use kuberde_tunnel::{bridge, ByteCounters, CountedStream};
use kuberde_types::{AgentIdentity, CoreError};

use crate::audit;
use crate::auth::authorize_agent_access;
use crate::state::AppState;
use crate::wake::{wake_agent, WakeBudget};

fn bearer_token(headers: &HeaderMap) -> Result<&str, CoreError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| CoreError::Unauthorized("missing or malformed Authorization header".into()))
}

pub async fn handler(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    match authorize(&id, &headers, &state).await {
        Ok((identity, principal, is_admin_cross_owner)) => {
            if is_admin_cross_owner {
                audit::admin_cross_owner_access("connect", &principal, &identity.user, &identity);
            }
            ws.on_upgrade(move |socket| serve(socket, identity, principal, state))
        }
        Err(e) => e.into_response(),
    }
}

async fn authorize(id: &str, headers: &HeaderMap, state: &AppState) -> Result<(AgentIdentity, String, bool), CoreError> {
    let identity = AgentIdentity::parse(id).map_err(|e| CoreError::BadRequest(e.to_string()))?;
    let token = bearer_token(headers)?;
    let claims = state.jwks.validate(token).await?;
    let cross_owner = authorize_agent_access(&identity, &claims, state.config.tenancy_enabled)?;
    Ok((identity, claims.preferred_username, cross_owner))
}

async fn serve(socket: axum::extract::ws::WebSocket, identity: AgentIdentity, principal: String, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    state.active_sessions.entry(identity.tunnel_key()).and_modify(|n| *n += 1).or_insert(1);
    state.metrics.user_connections_total.inc();
    audit::connection_opened(&session_id, &principal, &identity);

    let result = run(socket, &identity, &principal, &state).await;

    if let Some(n) = state.active_sessions.get_mut(&identity.tunnel_key()) {
        *n = n.saturating_sub(1);
    }
    if let Err(e) = result {
        tracing::warn!(identity = %identity, session_id, error = %e, "connect session ended with error");
    }
}

async fn run(
    socket: axum::extract::ws::WebSocket,
    identity: &AgentIdentity,
    principal: &str,
    state: &AppState,
) -> Result<(), CoreError> {
    let tunnel = match state.registry.get(identity).await {
        Some(t) => t,
        None => {
            wake_agent(
                &state.kube,
                &state.config.namespace,
                &state.registry,
                &state.wake_locks,
                &state.metrics,
                identity,
                WakeBudget::Cli,
            )
            .await?;
            state.registry.get(identity).await.ok_or_else(|| CoreError::BadGateway("agent unavailable after wake".into()))?
        }
    };

    let stream = tunnel.open_stream().await.map_err(|e| CoreError::BadGateway(format!("failed to open stream: {e}")))?;
    let counters = Arc::new(ByteCounters::default());
    let mut counted = CountedStream::new(stream, counters.clone(), tunnel.clone());
    let mut ws_stream = kuberde_tunnel::ServerWsStream::new(socket);

    let result = bridge::copy_bidirectional(&mut ws_stream, &mut counted).await;
    tunnel.stream_closed();

    let (bytes_in, bytes_out) = counters.snapshot();
    audit::connection_closed(&identity.tunnel_key(), principal, identity, bytes_in, bytes_out);

    result.map(|_| ()).map_err(|e| CoreError::BadGateway(format!("stream closed: {e}")))
}
