use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use kube::Client as KubeClient;
use tokio::sync::Mutex;

use kuberde_tunnel::TunnelRegistry;

use crate::auth::jwks::JwksCache;
use crate::config::Config;
use crate::db::DbHealth;
use crate::metrics::Metrics;
use crate::wake::WakeLocks;

/// Shared application state, cloned cheaply (an `Arc` bundle) and
/// passed to every handler — the single immutable *Context* value
/// spec §9 asks for in place of hidden globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: TunnelRegistry,
    pub jwks: JwksCache,
    pub kube: KubeClient,
    pub http: reqwest::Client,
    pub wake_locks: WakeLocks,
    pub metrics: Arc<Metrics>,
    /// Connections currently open per agent, used by `/mgmt` to report
    /// `hasActiveSession` independent of tunnel-level accounting.
    pub active_sessions: Arc<DashMap<String, u32>>,
    pub oauth: Arc<Mutex<crate::auth::oidc::OidcClient>>,
    pub db: Arc<dyn DbHealth>,
    /// Flips to `false` if the IdP becomes unreachable at runtime (spec
    /// §4.1 failure semantics: "new connections rejected with 503").
    idp_healthy: Arc<AtomicBool>,
}

impl AppState {
    pub fn mark_idp_unhealthy(&self) {
        self.idp_healthy.store(false, Ordering::SeqCst);
    }

    pub fn mark_idp_healthy(&self) {
        self.idp_healthy.store(true, Ordering::SeqCst);
    }

    pub fn idp_healthy(&self) -> bool {
        self.idp_healthy.load(Ordering::SeqCst)
    }

    pub fn new(
        config: Arc<Config>,
        registry: TunnelRegistry,
        jwks: JwksCache,
        kube: KubeClient,
        http: reqwest::Client,
        metrics: Arc<Metrics>,
        oauth: crate::auth::oidc::OidcClient,
        db: Arc<dyn DbHealth>,
    ) -> Self {
        Self {
            config,
            registry,
            jwks,
            kube,
            http,
            wake_locks: WakeLocks::new(),
            metrics,
            active_sessions: Arc::new(DashMap::new()),
            oauth: Arc::new(Mutex::new(oauth)),
            db,
            idp_healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}
