//! `GET /healthz`, `GET /readyz`, `GET /metrics` on a loopback port
//! (SPEC_FULL.md "Shared naming/health": mirrors the Relay Server's
//! health surface).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::metrics::Metrics;

#[derive(Clone)]
struct HealthState {
    client: kube::Client,
    metrics: Arc<Metrics>,
}

async fn healthz() -> &'static str {
    "ok"
}

/// OK once a Kubernetes client has been established; the operator has
/// no other external dependency to probe at startup.
async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    match state.client.apiserver_version().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

async fn metrics(State(state): State<HealthState>) -> String {
    state.metrics.encode()
}

pub fn spawn(port: u16, client: kube::Client, metrics: Arc<Metrics>) -> tokio::task::JoinHandle<()> {
    let state = HealthState { client, metrics };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state);

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, port, "failed to bind health check listener");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "health check server exited");
        }
    })
}
