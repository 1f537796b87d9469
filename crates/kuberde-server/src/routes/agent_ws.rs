//! `GET /ws?id=<AgentIdentity>` — the agent tunnel endpoint (spec §4.1
//! item 1).

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use kuberde_types::{AgentIdentity, CoreError};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    id: String,
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, CoreError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| CoreError::Unauthorized("missing Authorization header".into()))?
        .to_str()
        .map_err(|_| CoreError::Unauthorized("Authorization header is not valid UTF-8".into()))?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoreError::Unauthorized("Authorization header is not a bearer token".into()))
}

pub async fn handler(
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    match prepare(&query, &headers, &state).await {
        Ok(identity) => ws.on_upgrade(move |socket| run_tunnel(socket, identity, state)),
        Err(e) => e.into_response(),
    }
}

/// Validates the request up front, before upgrading, so malformed/
/// unauthorized requests fail with a plain HTTP status (spec §4.1 item
/// 1: "Fails with Unauthorized on token problems, BadRequest on
/// missing id, Forbidden on mismatch").
async fn prepare(query: &WsQuery, headers: &HeaderMap, state: &AppState) -> Result<AgentIdentity, CoreError> {
    if query.id.is_empty() {
        return Err(CoreError::BadRequest("missing id query parameter".into()));
    }
    let identity = AgentIdentity::parse(&query.id).map_err(|e| CoreError::BadRequest(e.to_string()))?;

    let token = bearer_token(headers)?;
    let claims = state.jwks.validate(token).await?;

    if claims.preferred_username != identity.user {
        return Err(CoreError::Forbidden(format!(
            "token preferred_username '{}' does not match agent user '{}'",
            claims.preferred_username, identity.user
        )));
    }
    if state.config.tenancy_enabled && !identity.is_legacy() {
        if claims.tenant_id.as_deref() != identity.tenant.as_deref() {
            return Err(CoreError::Forbidden("token tenant_id does not match agent tenant".into()));
        }
    }

    Ok(identity)
}

async fn run_tunnel(socket: axum::extract::ws::WebSocket, identity: AgentIdentity, state: AppState) {
    let stream = kuberde_tunnel::ServerWsStream::new(socket);
    let (control, _inbound, connection_driver) = kuberde_tunnel::session::server_connection(stream);

    // The Server never accepts inbound streams on this connection (spec
    // §4.1: "Streams... are created by the Server ('dial') and accepted
    // by the Agent"), but the driver must still run continuously to
    // process frame acks and keep-alives — `_inbound` is dropped.
    let identity_for_driver = identity.clone();
    let driver = tokio::spawn(async move {
        connection_driver.await;
        tracing::debug!(identity = %identity_for_driver, "agent tunnel connection ended");
    });

    let tunnel = kuberde_tunnel::AgentTunnel::new(identity.clone(), control, driver);
    tracing::info!(identity = %identity, "agent tunnel established");
    state.registry.upsert(tunnel.clone()).await;
    state.metrics.active_tunnels.inc();

    // Suspend for the lifetime of the connection (spec §4.1 item 1).
    while !tunnel.is_closed() {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }

    state.metrics.active_tunnels.dec();
    state.registry.evict_if_same(&identity, &tunnel).await;
    tracing::info!(identity = %identity, "agent tunnel closed");
}
