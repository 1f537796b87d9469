//! Prometheus-style operability surface for the Workspace Operator
//! (mirrors the Relay Server's `metrics.rs`: ambient stack, not scoped
//! out by any Non-goal).

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub active_agents: IntGauge,
    pub reconcile_total: IntCounter,
    pub reconcile_failures_total: IntCounter,
    pub scale_downs_total: IntCounter,
    pub status_updates_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_agents = IntGauge::new("kuberde_operator_active_agents", "WorkspaceAgent resources currently watched").unwrap();
        let reconcile_total = IntCounter::new("kuberde_operator_reconcile_total", "Reconcile passes completed").unwrap();
        let reconcile_failures_total =
            IntCounter::new("kuberde_operator_reconcile_failures_total", "Reconcile passes that returned an error").unwrap();
        let scale_downs_total = IntCounter::new("kuberde_operator_scale_downs_total", "TTL-triggered scale-to-zero events").unwrap();
        let status_updates_total = IntCounterVec::new(
            Opts::new("kuberde_operator_status_updates_total", "Status subresource writes, labeled by resulting phase"),
            &["phase"],
        )
        .unwrap();

        registry.register(Box::new(active_agents.clone())).unwrap();
        registry.register(Box::new(reconcile_total.clone())).unwrap();
        registry.register(Box::new(reconcile_failures_total.clone())).unwrap();
        registry.register(Box::new(scale_downs_total.clone())).unwrap();
        registry.register(Box::new(status_updates_total.clone())).unwrap();

        Self { registry, active_agents, reconcile_total, reconcile_failures_total, scale_downs_total, status_updates_total }
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
