//! HTTP reverse proxy (spec §4.1 item 3): any request whose `Host`
//! header ends with the configured agent-domain suffix is routed to
//! the matching agent's tunnel.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use kuberde_tunnel::{ByteCounters, CountedStream};
use kuberde_types::{AgentIdentity, CoreError};

use super::{auth_flow, proxy_http};
use crate::audit;
use crate::auth::authorize_agent_access;
use crate::state::AppState;
use crate::wake::{wake_agent, WakeBudget};

/// Generous but bounded: proxied IDE/asset bodies are typically small;
/// this guards against an agent or client streaming unbounded data
/// into memory on this single-shot (non-chunked) relay.
const MAX_PROXIED_BODY_BYTES: usize = 64 * 1024 * 1024;

fn agent_identity_from_host(host: &str, suffix: &str) -> Option<AgentIdentity> {
    let host = host.split(':').next().unwrap_or(host);
    let dotted_suffix = format!(".{}", suffix.trim_start_matches('.'));
    let prefix = host.strip_suffix(&dotted_suffix)?;
    AgentIdentity::parse(prefix).ok()
}

pub async fn handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let host = match request.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(h) => h.to_string(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let Some(identity) = agent_identity_from_host(&host, &state.config.agent_domain) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(token) = auth_flow::session_token(&state, request.headers()) else {
        let return_url = request.uri().to_string();
        return Redirect::to(&format!("/auth/login?return_url={}", urlencoding_minimal(&return_url))).into_response();
    };

    let claims = match state.jwks.validate(&token).await {
        Ok(c) => c,
        Err(_) => {
            let return_url = request.uri().to_string();
            return Redirect::to(&format!("/auth/login?return_url={}", urlencoding_minimal(&return_url))).into_response();
        }
    };

    let cross_owner = match authorize_agent_access(&identity, &claims, state.config.tenancy_enabled) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if cross_owner {
        audit::admin_cross_owner_access("proxy", &claims.preferred_username, &identity.user, &identity);
    }

    match proxy_request(&state, &identity, request).await {
        Ok(response) => {
            state.metrics.proxy_requests_total.inc();
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn proxy_request(state: &AppState, identity: &AgentIdentity, request: Request<Body>) -> Result<Response, CoreError> {
    wake_agent(
        &state.kube,
        &state.config.namespace,
        &state.registry,
        &state.wake_locks,
        &state.metrics,
        identity,
        WakeBudget::Http,
    )
    .await?;

    let tunnel = state.registry.get(identity).await.ok_or_else(|| CoreError::BadGateway("agent unavailable after wake".into()))?;
    let stream = tunnel.open_stream().await.map_err(|e| CoreError::BadGateway(format!("failed to open stream: {e}")))?;
    let counters = Arc::new(ByteCounters::default());
    let mut counted = CountedStream::new(stream, counters, tunnel.clone());

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_PROXIED_BODY_BYTES)
        .await
        .map_err(|e| CoreError::BadRequest(format!("failed to buffer request body: {e}")))?;
    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    proxy_http::write_request(&mut counted, &parts.method, path_and_query, &parts.headers, &body_bytes).await?;
    let raw = proxy_http::read_response(&mut counted).await?;
    tunnel.stream_closed();

    let mut builder = Response::builder().status(raw.status);
    for (name, value) in &raw.headers {
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.body(Body::from(raw.body)).map_err(|e| CoreError::Internal(anyhow::anyhow!(e)))
}

fn urlencoding_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identity_from_host_with_suffix() {
        let id = agent_identity_from_host("agent-acme-alice-code.agents.kuberde.local", "agents.kuberde.local").unwrap();
        assert_eq!(id.format(), "agent-acme-alice-code");
    }

    #[test]
    fn ignores_port_in_host_header() {
        let id = agent_identity_from_host("agent-acme-alice-code.agents.kuberde.local:443", "agents.kuberde.local").unwrap();
        assert_eq!(id.format(), "agent-acme-alice-code");
    }

    #[test]
    fn rejects_host_without_the_suffix() {
        assert!(agent_identity_from_host("example.com", "agents.kuberde.local").is_none());
    }
}
