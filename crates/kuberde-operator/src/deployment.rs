//! Desired-deployment computation and drift detection (spec §4.2
//! reconcile steps 1-3).

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements as K8sResourceRequirements, SecretKeySelector, Toleration as K8sToleration, Volume,
    VolumeMount as K8sVolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use kuberde_types::crd::{ContainerSpec, RDEAgent, RDEAgentSpec};

use crate::naming;

const AGENT_CONTAINER_NAME: &str = "kuberde-agent";
const WORKLOAD_CONTAINER_NAME: &str = "workload";
const SHARED_PVC_VOLUME_NAME: &str = "kuberde-workspace";
const SSH_VOLUME_NAME_ENV: &str = "SSH_PUBLIC_KEY";

/// Builds the full `Deployment` object for one `WorkspaceAgent` (spec
/// §4.2 reconcile step 1). `agent_image` is the operator-wide Agent
/// sidecar image (`KUBERDE_AGENT_IMAGE`); everything else comes from
/// `agent.spec`.
pub fn build_desired(agent: &RDEAgent, identity: &str, agent_image: &str, replicas: i32) -> Deployment {
    let spec = &agent.spec;
    let labels = naming::selector_labels(identity);
    let name = naming::deployment_name(identity);

    let mut volumes = Vec::new();
    let mut workload_volume_mounts: Vec<K8sVolumeMount> = spec
        .volume_mounts
        .iter()
        .map(|m| K8sVolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    if let Some(pvc_name) = &spec.pvc_name {
        volumes.push(Volume {
            name: SHARED_PVC_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        workload_volume_mounts.push(K8sVolumeMount {
            name: SHARED_PVC_VOLUME_NAME.to_string(),
            mount_path: "/workspace".to_string(),
            ..Default::default()
        });
    } else {
        for entry in &spec.storage {
            let volume_name = format!("storage-{}", entry.name);
            volumes.push(Volume {
                name: volume_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: naming::legacy_pvc_name(identity, &entry.name),
                    ..Default::default()
                }),
                ..Default::default()
            });
            workload_volume_mounts.push(K8sVolumeMount {
                name: volume_name,
                mount_path: entry.mount_path.clone(),
                ..Default::default()
            });
        }
    }

    let mut agent_env = vec![
        env_var("SERVER_URL", &spec.server_url),
        env_var("AGENT_ID", identity),
        env_var("LOCAL_TARGET", &spec.local_target),
        env_var("AUTH_TOKEN_URL", auth_token_url(spec)),
        env_var_from_secret("AUTH_CLIENT_ID", &spec.auth_secret, "client_id"),
        env_var_from_secret("AUTH_CLIENT_SECRET", &spec.auth_secret, "client_secret"),
    ];

    let mut workload_env: Vec<EnvVar> = spec.workload_container.env.iter().map(|(k, v)| env_var(k, v)).collect();
    if spec.ssh_public_keys.is_some() {
        let secret_name = naming::credentials_secret_name(identity);
        workload_env.push(env_var_from_secret(SSH_VOLUME_NAME_ENV, &secret_name, "PUBLIC_KEY"));
        agent_env.push(env_var_from_secret(SSH_VOLUME_NAME_ENV, &secret_name, "PUBLIC_KEY"));
    }

    let agent_container = Container {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(agent_image.to_string()),
        env: Some(agent_env),
        ..Default::default()
    };

    let workload_container = build_workload_container(&spec.workload_container, workload_env, workload_volume_mounts);

    let pod_spec = PodSpec {
        containers: vec![agent_container, workload_container],
        volumes: if volumes.is_empty() { None } else { Some(volumes) },
        node_selector: if spec.node_selector.is_empty() { None } else { Some(spec.node_selector.clone().into_iter().collect()) },
        tolerations: to_k8s_tolerations(&spec.tolerations),
        ..Default::default()
    };

    let owner_ref = agent.controller_owner_ref(&()).expect("WorkspaceAgent has namespace/uid set by the API server");

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: agent.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_workload_container(spec: &ContainerSpec, env: Vec<EnvVar>, volume_mounts: Vec<K8sVolumeMount>) -> Container {
    Container {
        name: WORKLOAD_CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        command: if spec.command.is_empty() { None } else { Some(spec.command.clone()) },
        args: if spec.args.is_empty() { None } else { Some(spec.args.clone()) },
        env: if env.is_empty() { None } else { Some(env) },
        ports: if spec.ports.is_empty() {
            None
        } else {
            Some(spec.ports.iter().map(|p| ContainerPort { container_port: *p as i32, ..Default::default() }).collect())
        },
        resources: spec.resources.as_ref().map(|r| K8sResourceRequirements {
            requests: non_empty_quantities(&r.requests),
            limits: non_empty_quantities(&r.limits),
            ..Default::default()
        }),
        volume_mounts: if volume_mounts.is_empty() { None } else { Some(volume_mounts) },
        ..Default::default()
    }
}

fn non_empty_quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        None
    } else {
        Some(map.iter().map(|(k, v)| (k.clone(), Quantity(v.clone()))).collect())
    }
}

fn to_k8s_tolerations(tolerations: &[kuberde_types::crd::Toleration]) -> Option<Vec<K8sToleration>> {
    if tolerations.is_empty() {
        return None;
    }
    Some(
        tolerations
            .iter()
            .map(|t| K8sToleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                ..Default::default()
            })
            .collect(),
    )
}

fn auth_token_url(spec: &RDEAgentSpec) -> &str {
    &spec.auth_token_url
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

fn env_var_from_secret(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector { name: Some(secret_name.to_string()), key: key.to_string(), optional: Some(false) }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired replicas (spec §4.2 reconcile step 2): `1` normally,
/// preserving `0` if the existing deployment is already scaled down —
/// TTL enforcement wins until an external actor bumps `lastActivity`,
/// which only the activity-sync loop and the CRUD layer do, never this
/// function.
pub fn desired_replicas(existing: Option<&Deployment>) -> i32 {
    match existing.and_then(|d| d.spec.as_ref()).and_then(|s| s.replicas) {
        Some(0) => 0,
        _ => 1,
    }
}

/// Deep-equality check over the fixed subset of fields spec §4.2 step 3
/// names, with `None`/empty normalized to the same value so that, e.g.,
/// an API server that echoes back `volumes: []` instead of omitting the
/// field never looks like drift.
pub fn needs_update(existing: &Deployment, desired: &Deployment) -> bool {
    let existing_spec = existing.spec.as_ref();
    let desired_spec = desired.spec.as_ref();

    if existing_spec.and_then(|s| s.replicas) != desired_spec.and_then(|s| s.replicas) {
        return true;
    }
    if existing_spec.map(|s| &s.selector) != desired_spec.map(|s| &s.selector) {
        return true;
    }

    let existing_template = existing_spec.map(|s| &s.template);
    let desired_template = desired_spec.map(|s| &s.template);
    if normalize_labels(existing_template) != normalize_labels(desired_template) {
        return true;
    }

    let existing_pod = existing_template.and_then(|t| t.spec.as_ref());
    let desired_pod = desired_template.and_then(|t| t.spec.as_ref());

    if normalize_containers(existing_pod) != normalize_containers(desired_pod) {
        return true;
    }
    if normalize_map(existing_pod.and_then(|p| p.node_selector.as_ref())) != normalize_map(desired_pod.and_then(|p| p.node_selector.as_ref())) {
        return true;
    }
    if normalize_vec(existing_pod.and_then(|p| p.tolerations.as_ref())) != normalize_vec(desired_pod.and_then(|p| p.tolerations.as_ref())) {
        return true;
    }
    if normalize_vec(existing_pod.and_then(|p| p.volumes.as_ref())) != normalize_vec(desired_pod.and_then(|p| p.volumes.as_ref())) {
        return true;
    }

    false
}

fn normalize_labels(template: Option<&PodTemplateSpec>) -> BTreeMap<String, String> {
    template.and_then(|t| t.metadata.as_ref()).and_then(|m| m.labels.clone()).unwrap_or_default()
}

fn normalize_map(map: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    map.cloned().unwrap_or_default()
}

fn normalize_vec<T: Clone>(vec: Option<&Vec<T>>) -> Vec<T> {
    vec.cloned().unwrap_or_default()
}

/// Compares the per-container fields spec §4.2 step 3 names (image,
/// env, command, args, ports, volumeMounts — pull policy is not
/// modeled by `ContainerSpec` and is intentionally left at the cluster
/// default everywhere, so it never participates in drift).
fn normalize_containers(pod: Option<&PodSpec>) -> Vec<(String, Option<String>, Vec<EnvVar>, Vec<String>, Vec<String>, Vec<ContainerPort>, Vec<K8sVolumeMount>)> {
    pod.map(|p| {
        p.containers
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    c.image.clone(),
                    c.env.clone().unwrap_or_default(),
                    c.command.clone().unwrap_or_default(),
                    c.args.clone().unwrap_or_default(),
                    c.ports.clone().unwrap_or_default(),
                    c.volume_mounts.clone().unwrap_or_default(),
                )
            })
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuberde_types::crd::{RDEAgentSpec, ContainerSpec};

    fn sample_agent() -> RDEAgent {
        let mut agent = RDEAgent::new(
            "agent-acme-alice-code",
            RDEAgentSpec {
                server_url: "wss://relay.example.com/ws".to_string(),
                auth_secret: "agent-acme-alice-code-credentials".to_string(),
                auth_token_url: "https://idp.example.com/token".to_string(),
                local_target: "localhost:8080".to_string(),
                workload_container: ContainerSpec {
                    image: "code-server:latest".to_string(),
                    command: vec![],
                    args: vec![],
                    env: Default::default(),
                    ports: vec![8080],
                    resources: None,
                    security_context: None,
                },
                owner: Some("alice".to_string()),
                ttl: "0".to_string(),
                pvc_name: None,
                storage: vec![],
                ssh_public_keys: None,
                node_selector: Default::default(),
                tolerations: vec![],
                volume_mounts: vec![],
            },
        );
        agent.meta_mut().namespace = Some("kuberde".to_string());
        agent.meta_mut().uid = Some("11111111-1111-1111-1111-111111111111".to_string());
        agent
    }

    #[test]
    fn desired_replicas_defaults_to_one() {
        assert_eq!(desired_replicas(None), 1);
    }

    #[test]
    fn desired_replicas_preserves_existing_zero() {
        let mut existing = Deployment::default();
        existing.spec = Some(DeploymentSpec { replicas: Some(0), selector: LabelSelector::default(), template: PodTemplateSpec::default(), ..Default::default() });
        assert_eq!(desired_replicas(Some(&existing)), 0);
    }

    #[test]
    fn reconciling_unchanged_desired_twice_needs_no_update() {
        let agent = sample_agent();
        let first = build_desired(&agent, "agent-acme-alice-code", "kuberde/agent:latest", 1);
        let second = build_desired(&agent, "agent-acme-alice-code", "kuberde/agent:latest", 1);
        assert!(!needs_update(&first, &second));
    }

    #[test]
    fn image_drift_is_detected() {
        let agent = sample_agent();
        let desired = build_desired(&agent, "agent-acme-alice-code", "kuberde/agent:latest", 1);
        let mut drifted = desired.clone();
        drifted.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[1].image = Some("evil:latest".to_string());
        assert!(needs_update(&drifted, &desired));
    }

    #[test]
    fn replica_count_drift_is_detected() {
        let agent = sample_agent();
        let desired = build_desired(&agent, "agent-acme-alice-code", "kuberde/agent:latest", 1);
        let scaled_down = build_desired(&agent, "agent-acme-alice-code", "kuberde/agent:latest", 0);
        assert!(needs_update(&scaled_down, &desired));
    }
}
