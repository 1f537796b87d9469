use std::env;

/// Workspace Operator configuration, read once at startup (spec §6
/// "Environment variables consumed by the core: Operator").
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Relay Server's internal management API, used by
    /// the status and activity-sync loops (`GET /mgmt/agents/<id>`).
    pub server_api: String,

    /// Image reference for the Agent sidecar container.
    pub agent_image: String,

    /// Namespace the operator itself runs in (distinct from the
    /// namespaces of the `WorkspaceAgent` resources it watches, which
    /// may span the whole cluster).
    pub operator_namespace: String,

    pub health_check_port: u16,
}

impl Config {
    pub fn load() -> Self {
        Self {
            server_api: env::var("KUBERDE_SERVER_API").unwrap_or_else(|_| "http://kuberde-server.kuberde.svc:8443".into()),
            agent_image: env::var("KUBERDE_AGENT_IMAGE").unwrap_or_else(|_| "kuberde/agent:latest".into()),
            operator_namespace: env::var("OPERATOR_NAMESPACE").unwrap_or_else(|_| "kuberde".into()),
            health_check_port: env::var("HEALTH_CHECK_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9090),
        }
    }
}
