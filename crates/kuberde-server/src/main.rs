//! # Relay Server
//!
//! Terminates agent tunnels (one per `AgentIdentity`), terminates user
//! connections (CLI/SSH and HTTP reverse proxy), authorizes access
//! against OIDC-issued tokens, and drives on-demand scale-up of idle
//! agent Deployments through the Kubernetes API.
//!
//! ## Modules
//!
//! - [`config`] — environment-sourced startup configuration
//! - [`auth`]   — JWKS/bearer validation, OIDC login flow, authorization rule
//! - [`k8s`]    — typed Deployment reads/scale writes
//! - [`wake`]   — the on-demand wake procedure and its per-agent lock
//! - [`audit`]  — structured audit events
//! - [`db`]     — external database readiness dependency
//! - [`metrics`] — Prometheus registry and encoder
//! - [`state`]  — the shared `AppState`
//! - [`routes`] — the HTTP/WebSocket surface

mod audit;
mod auth;
mod config;
mod db;
mod k8s;
mod metrics;
mod routes;
mod state;
mod wake;

use std::sync::Arc;

use kuberde_tunnel::TunnelRegistry;
use tracing::{info, warn};

use crate::auth::{JwksCache, OidcClient};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kuberde_server=info".into()),
        )
        .init();

    let config = Arc::new(Config::load());
    info!(listen = %config.listen, namespace = %config.namespace, "starting kuberde relay server");

    let kube = kube::Client::try_default().await.expect("failed to build Kubernetes client from in-cluster or kubeconfig");

    let jwks = JwksCache::init(&config.keycloak_url, expected_issuer(&config))
        .await
        .expect("OIDC provider unreachable after startup retries");

    let oauth = OidcClient::discover(&config).await.expect("failed to discover OIDC endpoints");

    let state = AppState::new(
        config.clone(),
        TunnelRegistry::new(),
        jwks,
        kube,
        reqwest::Client::new(),
        Arc::new(Metrics::new()),
        oauth,
        db::default_handle(),
    );

    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    spawn_idp_health_watchdog(state.clone(), shutdown_tx.subscribe());

    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.listen));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server exited with an error");
}

/// The issuer check is skipped (`None`) when the IdP is reached over an
/// internal cluster-DNS alias that never matches the externally-issued
/// `iss` claim (spec §6).
fn expected_issuer(config: &Config) -> Option<String> {
    if config.keycloak_url == config.keycloak_public_url {
        Some(format!("{}/realms/{}", config.keycloak_url.trim_end_matches('/'), config.keycloak_realm))
    } else {
        None
    }
}

/// Polls the IdP's JWKS endpoint reachability independent of the
/// refresh cadence inside `JwksCache` itself, flipping `idp_healthy` so
/// `/readyz` reflects runtime IdP outages (spec §4.1: "IdP unreachable
/// at runtime: new connections rejected with 503").
fn spawn_idp_health_watchdog(state: AppState, mut shutdown: tokio::sync::watch::Receiver<()>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match state.jwks.healthy().await {
                        true => state.mark_idp_healthy(),
                        false => {
                            warn!("identity provider unreachable; marking readiness false");
                            state.mark_idp_unhealthy();
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("idp health watchdog shutting down");
                    return;
                }
            }
        }
    });
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(());
}
