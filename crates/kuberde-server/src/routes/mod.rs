//! HTTP surface (spec §6). `Router::new()` composition mirrors the
//! teacher's `server/src/main.rs` route table, generalized from a
//! single `/ws` + `/api/agents` pair into the full contract: agent
//! tunnel endpoint, CLI connect endpoint, HTTP reverse proxy fallback,
//! the internal activity/wake interface, health endpoints, and the
//! OIDC login flow.

pub mod agent_ws;
pub mod auth_flow;
pub mod connect;
pub mod health;
pub mod mgmt;
pub mod proxy;
mod proxy_http;

use axum::routing::{get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(agent_ws::handler))
        .route("/connect/{id}", get(connect::handler))
        .route("/mgmt/agents/{id}", get(mgmt::get_agent_status))
        .route("/api/agents/{id}/scale-up", put(mgmt::scale_up))
        .route("/healthz", get(health::healthz))
        .route("/livez", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/auth/login", get(auth_flow::login))
        .route("/auth/callback", get(auth_flow::callback))
        .route("/auth/logout", axum::routing::post(auth_flow::logout))
        // HTTP reverse proxy: any request whose Host matches the agent
        // domain suffix that isn't one of the routes above (spec §4.1
        // item 3). Registered last so the named routes win.
        .fallback(proxy::handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
