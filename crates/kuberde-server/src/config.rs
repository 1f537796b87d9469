use std::env;

/// Relay Server configuration, loaded once at startup (spec §6
/// "Environment variables consumed by the core"). Plain `env::var`
/// reads with documented defaults, matching
/// `agentsphere-platform/src/config.rs`'s `Config::load()` shape.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket listener binds to.
    pub listen: String,

    /// The public base URL users reach this Server at.
    pub public_url: String,

    /// Domain suffix stripped from `Host` to recover an `AgentIdentity`
    /// for the HTTP reverse proxy path (spec §4.1 item 3).
    pub agent_domain: String,

    /// Kubernetes namespace the Server's wake procedure operates in.
    pub namespace: String,

    /// Identity provider base URL (internal-facing; used for JWKS/token
    /// exchange traffic, which may skip the issuer check per spec §6).
    pub keycloak_url: String,

    /// Identity provider base URL as seen by end users (used to build
    /// the `/auth/login` redirect).
    pub keycloak_public_url: String,

    pub keycloak_realm: String,
    pub oidc_client_id: String,
    pub oidc_client_secret: String,

    /// Whether the `tenant` component of `AgentIdentity` is enforced
    /// against the token's `tenant_id` claim (spec §4.1 authorization
    /// rule).
    pub tenancy_enabled: bool,

    /// Cookie-signing key for the proxy's session cookie.
    pub cookie_signing_key: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            listen: env::var("KUBERDE_LISTEN").unwrap_or_else(|_| "0.0.0.0:8443".into()),
            public_url: env::var("KUBERDE_PUBLIC_URL").unwrap_or_else(|_| "https://relay.kuberde.local".into()),
            agent_domain: env::var("KUBERDE_AGENT_DOMAIN").unwrap_or_else(|_| "agents.kuberde.local".into()),
            namespace: env::var("KUBERDE_NAMESPACE").unwrap_or_else(|_| "kuberde".into()),
            keycloak_url: env::var("KEYCLOAK_URL").unwrap_or_else(|_| "http://keycloak.kuberde.svc:8080".into()),
            keycloak_public_url: env::var("KEYCLOAK_PUBLIC_URL").unwrap_or_else(|_| "https://auth.kuberde.local".into()),
            keycloak_realm: env::var("KEYCLOAK_REALM").unwrap_or_else(|_| "kuberde".into()),
            oidc_client_id: env::var("KEYCLOAK_CLIENT_ID").unwrap_or_else(|_| "kuberde-server".into()),
            oidc_client_secret: env::var("KEYCLOAK_CLIENT_SECRET").unwrap_or_default(),
            tenancy_enabled: env::var("KUBERDE_TENANCY_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            cookie_signing_key: env::var("KUBERDE_COOKIE_KEY")
                .unwrap_or_else(|_| "insecure-development-key-change-me-0000000000".into()),
        }
    }
}
