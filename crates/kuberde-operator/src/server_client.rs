//! Thin client for the Relay Server's internal management API, used by
//! the activity-sync loop (spec §4.2: "poll Relay Server's
//! `GET /mgmt/agents/<id>` ... to refresh `lastActivity`").

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{OperatorError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentActivity {
    pub online: bool,
    pub last_activity: Option<String>,
}

/// Abstracts the one call the activity-sync loop needs, so tests can
/// substitute a fake without standing up a real Relay Server.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    async fn agent_activity(&self, identity: &str) -> Result<AgentActivity>;
}

pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl ActivityProbe for ServerClient {
    async fn agent_activity(&self, identity: &str) -> Result<AgentActivity> {
        let url = format!("{}/mgmt/agents/{identity}", self.base_url.trim_end_matches('/'));
        let response = self.http.get(&url).send().await.map_err(|e| OperatorError::ServerApi(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OperatorError::ServerApi(format!("GET {url} returned {}", response.status())));
        }
        response.json::<AgentActivity>().await.map_err(|e| OperatorError::ServerApi(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(AgentActivity);

    #[async_trait]
    impl ActivityProbe for FakeProbe {
        async fn agent_activity(&self, _identity: &str) -> Result<AgentActivity> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fake_probe_returns_configured_activity() {
        let probe = FakeProbe(AgentActivity { online: true, last_activity: Some("2026-01-01T00:00:00Z".to_string()) });
        let activity = probe.agent_activity("agent-acme-alice-code").await.unwrap();
        assert!(activity.online);
    }
}
