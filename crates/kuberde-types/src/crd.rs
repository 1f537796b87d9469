//! `WorkspaceAgent` custom resource: `kuberde.io/v1beta1`, kind `RDEAgent`.
//!
//! The parser is the single source of truth for defaults and validity
//! (spec §9's "unstructured map-of-map CRD access" redesign flag): every
//! field is a typed, `schemars`-validated value, and nested container
//! shape is rejected at deserialization time rather than tolerated as a
//! dynamic map.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of one workspace agent.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kuberde.io",
    version = "v1beta1",
    kind = "RDEAgent",
    plural = "rdeagents",
    singular = "rdeagent",
    shortname = "rde",
    namespaced,
    status = "RDEAgentStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RDEAgentSpec {
    /// The Relay Server's tunnel URL, e.g. `wss://relay.example.com/ws`.
    pub server_url: String,

    /// Name of the secret holding `client_id`/`client_secret` for the
    /// Agent's OAuth2 client-credentials token request.
    pub auth_secret: String,

    /// OAuth2 token endpoint the Agent exchanges client credentials at.
    pub auth_token_url: String,

    /// `host:port` the Agent bridges accepted streams to.
    #[serde(default = "default_local_target")]
    pub local_target: String,

    /// The workload container sharing the pod with the Agent sidecar.
    pub workload_container: ContainerSpec,

    /// Optional owner username, informational — ownership is actually
    /// enforced by the `user` component of the CRD's own name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Idle TTL. `"0"` (the default) disables scale-down.
    #[serde(default = "default_ttl")]
    pub ttl: String,

    /// Shared PVC name, mounted by every service of the same workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,

    /// Legacy per-service storage entries, superseded by `pvc_name`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage: Vec<StorageEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMountSpec>,
}

fn default_local_target() -> String {
    "localhost:80".to_string()
}

fn default_ttl() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub name: String,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountSpec {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Observed state, written only through the status subresource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RDEAgentStatus {
    #[serde(default)]
    pub phase: WorkspacePhase,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// RFC3339 timestamp. Monotonic: never rewound by a status update
    /// that observes a stale value (spec §3 invariant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<Time>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub debug: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum WorkspacePhase {
    #[default]
    Pending,
    Starting,
    Running,
    Disconnected,
    ScaledDown,
    Error,
}

impl std::fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkspacePhase::Pending => "Pending",
            WorkspacePhase::Starting => "Starting",
            WorkspacePhase::Running => "Running",
            WorkspacePhase::Disconnected => "Disconnected",
            WorkspacePhase::ScaledDown => "ScaledDown",
            WorkspacePhase::Error => "Error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply_at_parse_time() {
        let yaml = r#"
serverUrl: wss://relay.example.com/ws
authSecret: acme-alice-code-credentials
authTokenUrl: https://idp.example.com/token
workloadContainer:
  image: code-server:latest
"#;
        let spec: RDEAgentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.local_target, "localhost:80");
        assert_eq!(spec.ttl, "0");
        assert!(spec.pvc_name.is_none());
        assert!(spec.storage.is_empty());
    }

    #[test]
    fn rejects_missing_required_field() {
        let yaml = r#"
authSecret: acme-alice-code-credentials
authTokenUrl: https://idp.example.com/token
workloadContainer:
  image: code-server:latest
"#;
        let result: Result<RDEAgentSpec, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn status_phase_defaults_to_pending() {
        let status = RDEAgentStatus::default();
        assert_eq!(status.phase, WorkspacePhase::Pending);
        assert!(!status.online);
    }
}
