//! Loopback liveness probe (SPEC_FULL.md "Shared naming/health"): the
//! Agent has no HTTP surface of its own (spec §4.3), but a production
//! sidecar image still needs something for the pod's liveness probe to
//! hit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Flips once the WebSocket tunnel to the Server is established, so the
/// probe reflects actual liveness rather than just "the process is up".
#[derive(Clone, Default)]
pub struct TunnelLiveness(Arc<AtomicBool>);

impl TunnelLiveness {
    pub fn mark_connected(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn healthz(State(liveness): State<TunnelLiveness>) -> (StatusCode, &'static str) {
    if liveness.0.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "tunnel not yet established")
    }
}

pub fn spawn(port: u16, liveness: TunnelLiveness) {
    tokio::spawn(async move {
        let app = Router::new().route("/healthz", get(healthz)).with_state(liveness);
        let addr = format!("127.0.0.1:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "health endpoint exited");
                }
            }
            Err(e) => tracing::error!(addr, error = %e, "failed to bind health endpoint"),
        }
    });
}
