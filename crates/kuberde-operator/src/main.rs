//! # Workspace Operator
//!
//! Reconciles `WorkspaceAgent` resources into pod deployments, keeps
//! them free of drift, maintains accurate status, and enforces the
//! idle-TTL scale-to-zero policy (spec §4.2).
//!
//! ## Modules
//!
//! - [`config`] — environment-sourced startup configuration
//! - [`error`] — operator error taxonomy and transient/permanent split
//! - [`naming`] — deterministic object naming and label selectors
//! - [`deployment`] — desired-deployment computation and drift detection
//! - [`reconcile`] — the primary `kube::runtime::Controller` loop
//! - [`status`] — status reconciliation loop
//! - [`activity`] — activity synchronization loop
//! - [`server_client`] — thin client for the Relay Server's `/mgmt` API
//! - [`ttl`] — idle-TTL scale-to-zero loop
//! - [`metrics`] — Prometheus operability surface
//! - [`health`] — loopback health/readiness/metrics endpoints

mod activity;
mod config;
mod deployment;
mod error;
mod health;
mod metrics;
mod naming;
mod reconcile;
mod server_client;
mod status;
mod ttl;

use std::sync::Arc;

use tracing::info;

use config::Config;
use metrics::Metrics;
use server_client::{ActivityProbe, ServerClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kuberde_operator=info".into()))
        .init();

    let config = Config::load();
    info!(server_api = %config.server_api, agent_image = %config.agent_image, "starting kuberde operator");

    let client = kube::Client::try_default().await.unwrap_or_else(|e| panic!("failed to build kubernetes client: {e}"));
    let metrics = Arc::new(Metrics::new());
    let probe: Arc<dyn ActivityProbe> = Arc::new(ServerClient::new(config.server_api.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());

    health::spawn(config.health_check_port, client.clone(), metrics.clone());
    let status_handle = status::spawn(client.clone(), probe.clone(), metrics.clone(), shutdown_rx.clone());
    let activity_handle = activity::spawn(client.clone(), probe.clone(), shutdown_rx.clone());
    let ttl_handle = ttl::spawn(client.clone(), metrics.clone(), shutdown_rx.clone());

    let reconcile_future = reconcile::run(client.clone(), metrics.clone(), config.agent_image.clone());

    tokio::select! {
        _ = reconcile_future => {
            info!("controller loop exited");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(status_handle, activity_handle, ttl_handle);
}

#[cfg(unix)]
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
