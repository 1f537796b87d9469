//! Prometheus-style operability surface for the Relay Server (SPEC_FULL.md
//! "Ambient stack: Metrics surface"). Not a scoped-out feature: Non-goals
//! excludes application CRUD/audit bookkeeping, not operability of the
//! core process itself.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub active_tunnels: IntGauge,
    pub wake_attempts_total: IntCounter,
    pub wake_timeouts_total: IntCounter,
    pub user_connections_total: IntCounter,
    pub proxy_requests_total: IntCounter,
    pub tunnel_evictions_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_tunnels = IntGauge::new("kuberde_active_tunnels", "Currently live agent tunnels").unwrap();
        let wake_attempts_total =
            IntCounter::new("kuberde_wake_attempts_total", "On-demand wake procedures initiated").unwrap();
        let wake_timeouts_total =
            IntCounter::new("kuberde_wake_timeouts_total", "On-demand wake procedures that timed out").unwrap();
        let user_connections_total =
            IntCounter::new("kuberde_user_connections_total", "CLI/SSH user connections opened").unwrap();
        let proxy_requests_total =
            IntCounter::new("kuberde_proxy_requests_total", "HTTP reverse-proxy requests served").unwrap();
        let tunnel_evictions_total =
            IntCounter::new("kuberde_tunnel_evictions_total", "Tunnels evicted by a fresher reconnect").unwrap();

        registry.register(Box::new(active_tunnels.clone())).unwrap();
        registry.register(Box::new(wake_attempts_total.clone())).unwrap();
        registry.register(Box::new(wake_timeouts_total.clone())).unwrap();
        registry.register(Box::new(user_connections_total.clone())).unwrap();
        registry.register(Box::new(proxy_requests_total.clone())).unwrap();
        registry.register(Box::new(tunnel_evictions_total.clone())).unwrap();

        Self {
            registry,
            active_tunnels,
            wake_attempts_total,
            wake_timeouts_total,
            user_connections_total,
            proxy_requests_total,
            tunnel_evictions_total,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf).expect("prometheus encoding never fails for valid metrics");
        String::from_utf8(buf).expect("prometheus text format is always valid utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
