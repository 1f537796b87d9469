//! Deterministic naming and label-selector helpers (spec §4.2 reconcile
//! step 1: `label selector {app: kuberde-agent, instance: sha256(AgentIdentity)[:16]}`).

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

pub const APP_LABEL: &str = "kuberde-agent";

/// The first 16 hex characters of the SHA-256 digest of an
/// `AgentIdentity`'s canonical form — short enough to stay well under
/// Kubernetes label-value length limits while collision-safe for any
/// realistic agent population.
pub fn instance_label(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn selector_labels(identity: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), APP_LABEL.to_string());
    labels.insert("instance".to_string(), instance_label(identity));
    labels
}

/// Name of the deployment/service objects owned by one `WorkspaceAgent`.
/// The CRD's own name already is the canonical `AgentIdentity` string
/// (spec §3: "used as both the workspace's CRD name and the logical
/// tunnel key"), so owned objects reuse it directly.
pub fn deployment_name(identity: &str) -> String {
    identity.to_string()
}

pub fn credentials_secret_name(identity: &str) -> String {
    format!("{identity}-credentials")
}

pub fn legacy_pvc_name(identity: &str, storage_entry_name: &str) -> String {
    format!("kuberde-agent-{identity}-{storage_entry_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_label_is_sixteen_hex_chars() {
        let label = instance_label("agent-acme-alice-code");
        assert_eq!(label.len(), 16);
        assert!(label.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn instance_label_is_deterministic() {
        assert_eq!(instance_label("agent-acme-alice-code"), instance_label("agent-acme-alice-code"));
    }

    #[test]
    fn distinct_identities_yield_distinct_labels() {
        assert_ne!(instance_label("agent-acme-alice-code"), instance_label("agent-acme-bob-code"));
    }

    #[test]
    fn credentials_secret_name_is_suffixed() {
        assert_eq!(credentials_secret_name("agent-acme-alice-code"), "agent-acme-alice-code-credentials");
    }
}
