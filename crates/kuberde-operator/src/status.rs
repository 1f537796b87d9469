//! Status reconciliation loop (spec §4.2 "Status reconciliation",
//! separate loop, 30s cadence, worker pool).

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::ResourceExt;
use tokio::sync::Semaphore;

use kuberde_types::crd::{RDEAgent, RDEAgentStatus, WorkspacePhase};

use crate::error::{OperatorError, Result};
use crate::metrics::Metrics;
use crate::naming;
use crate::server_client::ActivityProbe;

const STATUS_LOOP_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Worker pool size (spec §4.2): modest fleets get a small pool, larger
/// ones get more headroom so one slow deployment fetch doesn't stall a
/// whole 30s cycle.
fn worker_pool_size(agent_count: usize) -> usize {
    if agent_count <= 16 {
        4
    } else {
        8
    }
}

/// Computes `(phase, online)` from the deployment, the deployment's
/// pods, and the Server's online probe, following the table in spec
/// §4.2 top to bottom: the first matching row wins.
pub fn compute_phase(deployment: Option<&Deployment>, pods: &[Pod], server_online: bool) -> (WorkspacePhase, bool) {
    let Some(deployment) = deployment else {
        return (WorkspacePhase::Error, false);
    };

    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if desired == 0 {
        return (WorkspacePhase::ScaledDown, false);
    }

    let replica_failure = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "ReplicaFailure" && c.status == "True"))
        .unwrap_or(false);

    let Some(pod) = pods.first() else {
        return if replica_failure { (WorkspacePhase::Error, false) } else { (WorkspacePhase::Pending, false) };
    };

    let pod_phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("Pending");

    match pod_phase {
        "Failed" | "Succeeded" => (WorkspacePhase::Error, false),
        "Running" => {
            if server_online {
                (WorkspacePhase::Running, true)
            } else {
                (WorkspacePhase::Disconnected, false)
            }
        }
        _ => match waiting_reason(pod) {
            Some(reason) if is_error_waiting_reason(&reason) => (WorkspacePhase::Error, false),
            _ => (WorkspacePhase::Starting, false),
        },
    }
}

fn waiting_reason(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.clone()))
}

fn is_error_waiting_reason(reason: &str) -> bool {
    matches!(reason, "ImagePullBackOff" | "ErrImagePull" | "CrashLoopBackOff" | "CreateContainerConfigError")
}

async fn fetch_pods(client: &kube::Client, namespace: &str, identity: &str) -> Result<Vec<Pod>> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = naming::selector_labels(identity);
    let label_selector = selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
    let pods = api.list(&ListParams::default().labels(&label_selector)).await?;
    Ok(pods.items)
}

/// Runs the fetch/compute/merge/retry algorithm for one `WorkspaceAgent`
/// once (spec §4.2 status-update algorithm, steps 1-4).
pub async fn reconcile_one(client: &kube::Client, probe: &dyn ActivityProbe, namespace: &str, name: &str) -> Result<()> {
    let api: Api<RDEAgent> = Api::namespaced(client.clone(), namespace);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    let mut backoff = INITIAL_BACKOFF;
    for attempt in 0..MAX_RETRIES {
        let agent = api.get(name).await?;
        let deployment = deployments.get_opt(name).await?;
        let pods = fetch_pods(client, namespace, name).await.unwrap_or_default();

        let server_online = probe.agent_activity(name).await.map(|a| a.online).unwrap_or(false);
        let (phase, online) = compute_phase(deployment.as_ref(), &pods, server_online);

        let mut new_status = agent.status.clone().unwrap_or_default();
        new_status.phase = phase;
        new_status.online = online;
        new_status.pod_name = pods.first().map(|p| p.name_any());

        let patch = serde_json::json!({ "status": new_status });
        match api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ref e)) if e.code == 409 && attempt + 1 < MAX_RETRIES => {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            Err(e) => return Err(OperatorError::Kube(e)),
        }
    }
    Err(OperatorError::Conflict(format!("status update for {namespace}/{name} exhausted retries")))
}

/// Spawns the long-lived status reconciliation loop.
pub fn spawn(
    client: kube::Client,
    probe: Arc<dyn ActivityProbe>,
    metrics: Arc<Metrics>,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_LOOP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let api: Api<RDEAgent> = Api::all(client.clone());
            let agents = match api.list(&ListParams::default()).await {
                Ok(list) => list.items,
                Err(e) => {
                    tracing::warn!(error = %e, "status loop: failed to list WorkspaceAgent resources");
                    continue;
                }
            };
            metrics.active_agents.set(agents.len() as i64);

            let pool_size = worker_pool_size(agents.len());
            let semaphore = Arc::new(Semaphore::new(pool_size));
            let mut handles = Vec::with_capacity(agents.len());

            for agent in agents {
                let Some(namespace) = agent.namespace() else { continue };
                let name = agent.name_any();
                let client = client.clone();
                let probe = probe.clone();
                let metrics = metrics.clone();
                let semaphore = semaphore.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    if let Err(e) = reconcile_one(&client, probe.as_ref(), &namespace, &name).await {
                        tracing::warn!(namespace = %namespace, name = %name, error = %e, "status reconciliation failed");
                        metrics.reconcile_failures_total.inc();
                    } else {
                        metrics.reconcile_total.inc();
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus};

    fn deployment_with_replicas(replicas: i32) -> Deployment {
        Deployment { spec: Some(DeploymentSpec { replicas: Some(replicas), ..Default::default() }), ..Default::default() }
    }

    #[test]
    fn scaled_down_when_desired_is_zero() {
        let d = deployment_with_replicas(0);
        assert_eq!(compute_phase(Some(&d), &[], false), (WorkspacePhase::ScaledDown, false));
    }

    #[test]
    fn error_when_no_deployment_exists() {
        assert_eq!(compute_phase(None, &[], false), (WorkspacePhase::Error, false));
    }

    #[test]
    fn pending_when_desired_positive_and_no_pod() {
        let d = deployment_with_replicas(1);
        assert_eq!(compute_phase(Some(&d), &[], false), (WorkspacePhase::Pending, false));
    }

    #[test]
    fn running_when_pod_running_and_server_online() {
        let d = deployment_with_replicas(1);
        let mut pod = Pod::default();
        pod.status = Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() });
        assert_eq!(compute_phase(Some(&d), &[pod], true), (WorkspacePhase::Running, true));
    }

    #[test]
    fn disconnected_when_pod_running_and_server_offline() {
        let d = deployment_with_replicas(1);
        let mut pod = Pod::default();
        pod.status = Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() });
        assert_eq!(compute_phase(Some(&d), &[pod], false), (WorkspacePhase::Disconnected, false));
    }

    #[test]
    fn error_on_image_pull_backoff() {
        let d = deployment_with_replicas(1);
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting { reason: Some("ImagePullBackOff".to_string()), ..Default::default() }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(compute_phase(Some(&d), &[pod], false), (WorkspacePhase::Error, false));
    }

    #[test]
    fn starting_on_container_creating() {
        let d = deployment_with_replicas(1);
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting { reason: Some("ContainerCreating".to_string()), ..Default::default() }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(compute_phase(Some(&d), &[pod], false), (WorkspacePhase::Starting, false));
    }

    #[test]
    fn worker_pool_sizes_to_fleet() {
        assert_eq!(worker_pool_size(10), 4);
        assert_eq!(worker_pool_size(17), 8);
    }
}
