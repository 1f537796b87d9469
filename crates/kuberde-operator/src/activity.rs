//! Activity synchronization loop (spec §4.2 "Activity synchronization",
//! separate loop, 30s cadence): refreshes `lastActivity` from the Relay
//! Server's view, monotonically, and never touches replicas.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::ResourceExt;

use kuberde_types::crd::RDEAgent;

use crate::server_client::ActivityProbe;

const ACTIVITY_LOOP_INTERVAL: Duration = Duration::from_secs(30);

/// `true` if `candidate` is strictly newer than `current` (or `current`
/// is absent/unparseable), so callers never rewind `lastActivity`.
pub fn is_newer(current: Option<&str>, candidate: &str) -> bool {
    let Ok(candidate_ts) = DateTime::parse_from_rfc3339(candidate) else { return false };
    match current.and_then(|c| DateTime::parse_from_rfc3339(c).ok()) {
        Some(current_ts) => candidate_ts > current_ts,
        None => true,
    }
}

async fn sync_one(client: &kube::Client, probe: &dyn ActivityProbe, namespace: &str, name: &str) -> crate::error::Result<()> {
    let activity = probe.agent_activity(name).await?;
    let Some(candidate) = activity.last_activity else { return Ok(()) };

    let api: Api<RDEAgent> = Api::namespaced(client.clone(), namespace);
    let agent = api.get(name).await?;
    let current = agent.status.as_ref().and_then(|s| s.last_activity.as_ref()).map(|t| t.0.to_rfc3339());

    if !is_newer(current.as_deref(), &candidate) {
        return Ok(());
    }

    let patch = serde_json::json!({ "status": { "lastActivity": candidate } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

pub fn spawn(client: kube::Client, probe: Arc<dyn ActivityProbe>, mut shutdown: tokio::sync::watch::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ACTIVITY_LOOP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let api: Api<RDEAgent> = Api::all(client.clone());
            let agents = match api.list(&ListParams::default()).await {
                Ok(list) => list.items,
                Err(e) => {
                    tracing::warn!(error = %e, "activity loop: failed to list WorkspaceAgent resources");
                    continue;
                }
            };

            for agent in agents {
                let Some(namespace) = agent.namespace() else { continue };
                let name = agent.name_any();
                if let Err(e) = sync_one(&client, probe.as_ref(), &namespace, &name).await {
                    tracing::warn!(namespace = %namespace, name = %name, error = %e, "activity sync failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_timestamp_wins() {
        assert!(is_newer(Some("2026-01-01T00:00:00Z"), "2026-01-01T00:00:01Z"));
    }

    #[test]
    fn older_timestamp_is_rejected() {
        assert!(!is_newer(Some("2026-01-01T00:00:01Z"), "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn equal_timestamp_is_not_newer() {
        assert!(!is_newer(Some("2026-01-01T00:00:00Z"), "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn absent_current_accepts_any_valid_candidate() {
        assert!(is_newer(None, "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn malformed_candidate_is_rejected() {
        assert!(!is_newer(None, "not-a-timestamp"));
    }
}
