//! TTL enforcement loop (spec §4.2 "TTL enforcement", 60s cadence):
//! the only actor allowed to scale a `WorkspaceAgent`'s deployment down
//! to zero.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::ResourceExt;

use kuberde_types::crd::RDEAgent;

use crate::metrics::Metrics;

const TTL_LOOP_INTERVAL: Duration = Duration::from_secs(60);

/// Parses a TTL string (spec §3: "idle TTL (duration or `0`=disabled)").
/// Accepts a bare integer as whole seconds, or a Go-style duration with
/// an `s`/`m`/`h` suffix (e.g. `"30s"`, `"15m"`, `"24h"`); `"0"` or an
/// empty string means "never expire".
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    if raw.is_empty() || raw == "0" {
        return None;
    }

    let seconds = match raw.strip_suffix('h') {
        Some(digits) => digits.parse::<u64>().ok()?.checked_mul(3600)?,
        None => match raw.strip_suffix('m') {
            Some(digits) => digits.parse::<u64>().ok()?.checked_mul(60)?,
            None => match raw.strip_suffix('s') {
                Some(digits) => digits.parse::<u64>().ok()?,
                None => raw.parse::<u64>().ok()?,
            },
        },
    };

    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Whether a `WorkspaceAgent` with the given TTL and last-activity
/// timestamp should be scaled to zero right now.
pub fn should_scale_down(ttl: Duration, last_activity: Option<&str>) -> bool {
    let Some(last_activity) = last_activity else { return false };
    let Ok(last_activity) = chrono::DateTime::parse_from_rfc3339(last_activity) else { return false };
    let idle = Utc::now().signed_duration_since(last_activity);
    idle.to_std().map(|idle| idle > ttl).unwrap_or(false)
}

async fn enforce_one(client: &kube::Client, namespace: &str, agent: &RDEAgent, metrics: &Metrics) -> crate::error::Result<()> {
    let Some(ttl) = parse_ttl(&agent.spec.ttl) else { return Ok(()) };
    let last_activity = agent.status.as_ref().and_then(|s| s.last_activity.as_ref()).map(|t| t.0.to_rfc3339());
    if !should_scale_down(ttl, last_activity.as_deref()) {
        return Ok(());
    }

    let name = agent.name_any();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let Some(deployment) = deployments.get_opt(&name).await? else { return Ok(()) };
    let current_replicas = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if current_replicas == 0 {
        return Ok(());
    }

    let patch = serde_json::json!({ "spec": { "replicas": 0 } });
    deployments.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    metrics.scale_downs_total.inc();
    tracing::info!(namespace = %namespace, name = %name, "ttl expired, scaled deployment to 0");
    Ok(())
}

pub fn spawn(client: kube::Client, metrics: Arc<Metrics>, mut shutdown: tokio::sync::watch::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TTL_LOOP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let api: Api<RDEAgent> = Api::all(client.clone());
            let agents = match api.list(&ListParams::default()).await {
                Ok(list) => list.items,
                Err(e) => {
                    tracing::warn!(error = %e, "ttl loop: failed to list WorkspaceAgent resources");
                    continue;
                }
            };

            for agent in &agents {
                let Some(namespace) = agent.namespace() else { continue };
                if let Err(e) = enforce_one(&client, &namespace, agent, &metrics).await {
                    tracing::warn!(namespace = %namespace, name = %agent.name_any(), error = %e, "ttl enforcement failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_never_parses_to_a_duration() {
        assert_eq!(parse_ttl("0"), None);
        assert_eq!(parse_ttl(""), None);
    }

    #[test]
    fn numeric_ttl_is_seconds() {
        assert_eq!(parse_ttl("1800"), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn suffixed_durations_parse() {
        assert_eq!(parse_ttl("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_ttl("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_ttl("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_ttl("24h"), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn no_last_activity_never_scales_down() {
        assert!(!should_scale_down(Duration::from_secs(60), None));
    }

    #[test]
    fn stale_activity_past_ttl_scales_down() {
        let stale = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        assert!(should_scale_down(Duration::from_secs(3600), Some(&stale)));
    }

    #[test]
    fn recent_activity_within_ttl_does_not_scale_down() {
        let recent = Utc::now().to_rfc3339();
        assert!(!should_scale_down(Duration::from_secs(3600), Some(&recent)));
    }
}
