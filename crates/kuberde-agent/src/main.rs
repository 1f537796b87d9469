//! # Agent
//!
//! Sustains an authenticated tunnel to the Relay Server and bridges
//! each accepted stream to a configured local TCP target (spec §4.3).
//!
//! ## Modules
//!
//! - [`config`] — environment-sourced startup configuration
//! - [`token`]  — OAuth2 client-credentials token fetch
//! - [`relay`]  — per-stream local dial and bidirectional copy
//! - [`health`] — loopback liveness probe

mod config;
mod health;
mod relay;
mod token;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::health::TunnelLiveness;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kuberde_agent=info".into()))
        .init();

    let config = Config::load();
    info!(agent_id = %config.agent_id, local_target = %config.local_target, "starting kuberde agent");

    let liveness = TunnelLiveness::default();
    health::spawn(config.health_check_port, liveness.clone());

    let access_token = token::fetch_access_token(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to obtain access token at startup: {e}"));

    run(&config, &access_token, &liveness).await;
}

/// One full tunnel lifetime: dial, drive the multiplexer, accept
/// streams. Returns when the connection drops; `main` does not
/// reconnect (spec §4.3 failure semantics: "If the WebSocket dial
/// fails: fatal", since pod restart is the recovery mechanism).
async fn run(config: &Config, access_token: &str, liveness: &TunnelLiveness) {
    let dial_url = config.dial_url();
    let request = tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(&dial_url)
        .header("Authorization", format!("Bearer {access_token}"))
        .body(())
        .unwrap_or_else(|e| panic!("failed to build WebSocket dial request: {e}"));

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .unwrap_or_else(|e| panic!("failed to dial relay server at {dial_url}: {e}"));

    info!("tunnel established");
    liveness.mark_connected();

    let io = kuberde_tunnel::AgentWsStream::new(ws_stream);
    // The Agent never dials on this connection (spec §4.1: streams are
    // opened by the Server), so `_control` goes unused; the driver must
    // still run continuously alongside the accept loop.
    let (_control, mut inbound, connection_driver) = kuberde_tunnel::session::agent_connection(io);
    tokio::spawn(connection_driver);

    while let Some(next) = inbound.accept().await {
        match next {
            Ok(stream) => {
                let local_target = config.local_target.clone();
                tokio::spawn(async move {
                    relay::handle_stream(stream, local_target).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "tunnel connection error, ending accept loop");
                break;
            }
        }
    }

    liveness.mark_disconnected();
    error!("tunnel closed");
}
