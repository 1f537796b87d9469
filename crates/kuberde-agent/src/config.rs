use std::env;

/// Agent configuration, read once at startup (spec §4.3 "Startup", §6
/// "Environment variables consumed by the core: Agent").
#[derive(Debug, Clone)]
pub struct Config {
    /// Base WebSocket URL of the Relay Server, e.g. `wss://relay.example.com/ws`.
    pub server_url: String,

    /// This agent's `AgentIdentity` string, passed as the `id` query parameter.
    pub agent_id: String,

    /// `host:port` local service each accepted stream is bridged to.
    pub local_target: String,

    pub auth_client_id: String,
    pub auth_client_secret: String,
    pub auth_token_url: String,

    /// Loopback port the sidecar's own `/healthz` listens on (SPEC_FULL.md
    /// "Shared naming/health" module).
    pub health_check_port: u16,
}

impl Config {
    pub fn load() -> Self {
        Self {
            server_url: env::var("SERVER_URL").expect("SERVER_URL must be set"),
            agent_id: env::var("AGENT_ID").expect("AGENT_ID must be set"),
            local_target: env::var("LOCAL_TARGET").unwrap_or_else(|_| "localhost:80".into()),
            auth_client_id: env::var("AUTH_CLIENT_ID").expect("AUTH_CLIENT_ID must be set"),
            auth_client_secret: env::var("AUTH_CLIENT_SECRET").expect("AUTH_CLIENT_SECRET must be set"),
            auth_token_url: env::var("AUTH_TOKEN_URL").expect("AUTH_TOKEN_URL must be set"),
            health_check_port: env::var("HEALTH_CHECK_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9090),
        }
    }

    /// Builds the dial URL, e.g. `wss://relay.example.com/ws?id=agent-acme-alice-code`.
    pub fn dial_url(&self) -> String {
        let separator = if self.server_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}id={}", self.server_url, self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            server_url: "wss://relay.example.com/ws".into(),
            agent_id: "agent-acme-alice-code".into(),
            local_target: "localhost:8080".into(),
            auth_client_id: "agent-acme-alice-code".into(),
            auth_client_secret: "secret".into(),
            auth_token_url: "https://idp.example.com/token".into(),
            health_check_port: 9090,
        }
    }

    #[test]
    fn dial_url_appends_id_query_param() {
        assert_eq!(config().dial_url(), "wss://relay.example.com/ws?id=agent-acme-alice-code");
    }

    #[test]
    fn dial_url_uses_ampersand_when_server_url_already_has_a_query() {
        let mut c = config();
        c.server_url = "wss://relay.example.com/ws?token=abc".into();
        assert_eq!(c.dial_url(), "wss://relay.example.com/ws?token=abc&id=agent-acme-alice-code");
    }
}
