//! The Relay Server's only Kubernetes dependency: reading and bumping
//! the replica count of an agent's Deployment during on-demand wake
//! (spec §4.1 "On-demand wake"). Everything else about the Deployment
//! (containers, volumes, labels) is the Operator's concern; the Server
//! only ever touches `spec.replicas` and `status.readyReplicas`.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::Api;

use kuberde_types::CoreError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaState {
    pub desired: i32,
    pub ready: i32,
}

fn to_core_error(e: kube::Error) -> CoreError {
    match e {
        kube::Error::Api(ref api_err) if api_err.code == 409 => CoreError::Conflict(e.to_string()),
        kube::Error::Api(ref api_err) if api_err.code == 404 => {
            CoreError::BadGateway(format!("deployment not found: {e}"))
        }
        other => CoreError::ServiceUnavailable(other.to_string()),
    }
}

/// Reads `spec.replicas` (desired, defaulting to 0 when unset) and
/// `status.readyReplicas` (defaulting to 0) for the named Deployment.
pub async fn replica_state(client: &kube::Client, namespace: &str, deployment_name: &str) -> Result<ReplicaState, CoreError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = api.get(deployment_name).await.map_err(to_core_error)?;
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    Ok(ReplicaState { desired, ready })
}

/// Whether the Deployment's `ReplicaFailure` condition is `True`, which
/// distinguishes a quota-exceeded permanent failure from an ordinary
/// "still starting" `Pending` phase (spec §4.2 status table).
pub async fn has_replica_failure(client: &kube::Client, namespace: &str, deployment_name: &str) -> Result<bool, CoreError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = api.get(deployment_name).await.map_err(to_core_error)?;
    let failing = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "ReplicaFailure" && c.status == "True"))
        .unwrap_or(false);
    Ok(failing)
}

/// Patches `spec.replicas` via a merge patch, the minimal write the
/// Server ever performs — scaling back down is exclusively the
/// Operator's TTL loop's job (spec §4.2).
pub async fn scale_to(client: &kube::Client, namespace: &str, deployment_name: &str, replicas: i32) -> Result<(), CoreError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "spec": { "replicas": replicas } });
    api.patch(deployment_name, &PatchParams::default(), &Patch::Merge(&patch)).await.map_err(to_core_error)?;
    Ok(())
}
