//! Primary reconcile loop (spec §4.2 "Reconcile contract" steps 1-5),
//! driven by `kube::runtime::Controller`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements, Secret};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::{controller::Action, watcher::Config as WatcherConfig, Controller};
use kube::ResourceExt;
use tracing::{error, info, warn};

use kuberde_types::crd::{RDEAgent, WorkspacePhase};

use crate::deployment;
use crate::error::{OperatorError, Result};
use crate::metrics::Metrics;
use crate::naming;

pub struct Context {
    pub client: kube::Client,
    pub metrics: Arc<Metrics>,
    pub agent_image: String,
}

pub async fn reconcile(agent: Arc<RDEAgent>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = agent.namespace().ok_or_else(|| OperatorError::InvalidResource("WorkspaceAgent has no namespace".into()))?;
    let identity = agent.name_any();

    reconcile_deployment(&ctx.client, &namespace, &agent, &identity, &ctx.agent_image).await?;
    reconcile_credentials_secret(&ctx.client, &namespace, &agent, &identity).await?;
    reconcile_legacy_storage(&ctx.client, &namespace, &agent, &identity).await?;
    stamp_activity_on_external_touch(&ctx.client, &namespace, &agent, &identity).await?;

    ctx.metrics.reconcile_total.inc();
    Ok(Action::await_change())
}

pub fn error_policy(_agent: Arc<RDEAgent>, err: &OperatorError, ctx: Arc<Context>) -> Action {
    error!(error = %err, "reconcile failed");
    ctx.metrics.reconcile_failures_total.inc();
    if err.is_transient() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(60))
    }
}

async fn reconcile_deployment(client: &kube::Client, namespace: &str, agent: &RDEAgent, identity: &str, agent_image: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = naming::deployment_name(identity);

    let existing = deployments.get_opt(&name).await?;
    let replicas = deployment::desired_replicas(existing.as_ref());
    let desired = deployment::build_desired(agent, identity, agent_image, replicas);

    match existing {
        None => {
            deployments.create(&PostParams::default(), &desired).await?;
            info!(namespace, name = %identity, "created deployment");
        }
        Some(current) => {
            if deployment::needs_update(&current, &desired) {
                let patch = serde_json::json!({
                    "metadata": { "labels": desired.metadata.labels },
                    "spec": desired.spec,
                });
                deployments.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
                info!(namespace, name = %identity, "updated drifted deployment");
            }
        }
    }
    Ok(())
}

async fn reconcile_credentials_secret(client: &kube::Client, namespace: &str, agent: &RDEAgent, identity: &str) -> Result<()> {
    let Some(keys) = &agent.spec.ssh_public_keys else { return Ok(()) };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = naming::credentials_secret_name(identity);
    let joined = keys.join("\n");

    let mut data = BTreeMap::new();
    data.insert("PUBLIC_KEY".to_string(), k8s_openapi::ByteString(joined.into_bytes()));

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![agent.controller_owner_ref(&()).expect("namespaced resource has an owner ref")]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    match secrets.get_opt(&name).await? {
        None => {
            secrets.create(&PostParams::default(), &secret).await?;
        }
        Some(_) => {
            let patch = serde_json::json!({ "data": secret.data });
            secrets.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        }
    }
    Ok(())
}

async fn reconcile_legacy_storage(client: &kube::Client, namespace: &str, agent: &RDEAgent, identity: &str) -> Result<()> {
    if agent.spec.pvc_name.is_some() {
        return Ok(());
    }
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);

    for entry in &agent.spec.storage {
        let name = naming::legacy_pvc_name(identity, &entry.name);
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(entry.size.clone()));

        match pvcs.get_opt(&name).await? {
            None => {
                let pvc = PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.to_string()),
                        owner_references: Some(vec![agent.controller_owner_ref(&()).expect("namespaced resource has an owner ref")]),
                        ..Default::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        storage_class_name: entry.storage_class.clone(),
                        resources: Some(ResourceRequirements { requests: Some(requests), ..Default::default() }),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                pvcs.create(&PostParams::default(), &pvc).await?;
                info!(namespace, pvc = %name, "created legacy storage pvc");
            }
            Some(existing) => {
                let current_size = existing
                    .spec
                    .as_ref()
                    .and_then(|s| s.resources.as_ref())
                    .and_then(|r| r.requests.as_ref())
                    .and_then(|r| r.get("storage"))
                    .map(|q| q.0.clone());
                if current_size.as_deref() != Some(entry.size.as_str()) {
                    let patch = serde_json::json!({ "spec": { "resources": { "requests": { "storage": entry.size } } } });
                    if let Err(e) = pvcs.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await {
                        warn!(namespace, pvc = %name, error = %e, "pvc resize rejected (expansion may be disallowed by storage class)");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Spec §4.2 step 5: if the resource was `ScaledDown` and is being
/// reconciled again (an external writer touched it, e.g. a wake-up
/// bumped replicas back up), stamp `lastActivity = now` so the TTL
/// clock restarts from this touch rather than the old idle timestamp.
async fn stamp_activity_on_external_touch(client: &kube::Client, namespace: &str, agent: &RDEAgent, identity: &str) -> Result<()> {
    let was_scaled_down = agent.status.as_ref().map(|s| s.phase == WorkspacePhase::ScaledDown).unwrap_or(false);
    if !was_scaled_down {
        return Ok(());
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = naming::deployment_name(identity);
    let Some(current) = deployments.get_opt(&name).await? else { return Ok(()) };
    let replicas = current.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if replicas == 0 {
        return Ok(());
    }

    let api: Api<RDEAgent> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": { "lastActivity": Time(chrono::Utc::now()) } });
    api.patch_status(identity, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// Runs the Controller-driven watch/reconcile loop until shutdown.
pub async fn run(client: kube::Client, metrics: Arc<Metrics>, agent_image: String) {
    let crds: Api<RDEAgent> = Api::all(client.clone());
    let ctx = Arc::new(Context { client: client.clone(), metrics, agent_image });

    Controller::new(crds, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "controller stream error");
            }
        })
        .await;
}
