//! `AgentIdentity` — the structured name identifying one workspace agent
//! and its tunnel slot.
//!
//! Grammar (bit-exact, spec §6):
//!
//! - v2: `agent-<tenant>-<user>-<name>`
//! - legacy (read-only, accepted during migration): `<user>-<name>`
//!
//! Each field matches `[a-z0-9-]{1,}` and no field is empty. The first
//! dash after `agent-` separates `tenant`; the next separates `user`;
//! everything remaining is `name` (so `name` may itself contain dashes).

use std::fmt;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

fn valid_field_charset(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,
    #[error("identity '{0}' does not match the agent-<tenant>-<user>-<name> or <user>-<name> grammar")]
    Malformed(String),
    #[error("identity field contains characters outside [a-z0-9-]: '{0}'")]
    InvalidCharset(String),
}

/// A parsed agent name. Exactly one of `tenant` is `Some` (v2 form) or
/// `None` (legacy form, read-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct AgentIdentity {
    pub tenant: Option<String>,
    pub user: String,
    pub name: String,
}

impl AgentIdentity {
    /// Parses either the v2 `agent-<tenant>-<user>-<name>` form or the
    /// legacy `<user>-<name>` form. Never guesses: malformed input is
    /// rejected rather than coerced.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }

        if let Some(rest) = s.strip_prefix("agent-") {
            let mut parts = rest.splitn(3, '-');
            let tenant = parts.next().filter(|p| !p.is_empty());
            let user = parts.next().filter(|p| !p.is_empty());
            let name = parts.next().filter(|p| !p.is_empty());
            let (tenant, user, name) = match (tenant, user, name) {
                (Some(t), Some(u), Some(n)) => (t, u, n),
                _ => return Err(IdentityError::Malformed(s.to_string())),
            };
            for field in [tenant, user, name] {
                if !valid_field_charset(field) {
                    return Err(IdentityError::InvalidCharset(field.to_string()));
                }
            }
            return Ok(Self {
                tenant: Some(tenant.to_string()),
                user: user.to_string(),
                name: name.to_string(),
            });
        }

        // Legacy form: <user>-<name>, no tenant.
        let mut parts = s.splitn(2, '-');
        let user = parts.next().filter(|p| !p.is_empty());
        let name = parts.next().filter(|p| !p.is_empty());
        let (user, name) = match (user, name) {
            (Some(u), Some(n)) => (u, n),
            _ => return Err(IdentityError::Malformed(s.to_string())),
        };
        for field in [user, name] {
            if !valid_field_charset(field) {
                return Err(IdentityError::InvalidCharset(field.to_string()));
            }
        }
        warn_legacy_once(s);
        Ok(Self {
            tenant: None,
            user: user.to_string(),
            name: name.to_string(),
        })
    }

    pub fn is_legacy(&self) -> bool {
        self.tenant.is_none()
    }

    /// The canonical form. Write paths emit only this (§9): legacy
    /// identities never round-trip to their original two-field spelling
    /// once reformatted by this crate.
    pub fn format(&self) -> String {
        match &self.tenant {
            Some(tenant) => format!("agent-{tenant}-{}-{}", self.user, self.name),
            None => format!("{}-{}", self.user, self.name),
        }
    }

    /// The key used in the tunnel registry and as the CRD name. Legacy
    /// and v2 identities that name the same logical agent must collide
    /// on this key; since legacy identities carry no tenant, they are
    /// keyed under a synthetic tenant-less bucket distinguishable from
    /// any real v2 identity (a real tenant can never be the literal
    /// string `"-legacy"` because `-` is rejected as a field value).
    pub fn tunnel_key(&self) -> String {
        match &self.tenant {
            Some(tenant) => format!("agent-{tenant}-{}-{}", self.user, self.name),
            None => format!("agent--legacy-{}-{}", self.user, self.name),
        }
    }

    /// §4.1's authorization rule, minus the admin-role bypass (callers
    /// check that separately, since it doesn't depend on the identity).
    pub fn matches_owner(&self, username: &str, tenant_id: Option<&str>, tenancy_enabled: bool) -> bool {
        if self.user != username {
            return false;
        }
        if self.is_legacy() {
            // tenant_id is ignored for legacy identities per spec §6.
            return true;
        }
        if !tenancy_enabled {
            return true;
        }
        match (&self.tenant, tenant_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

fn legacy_seen() -> &'static Mutex<std::collections::HashSet<String>> {
    static SEEN: OnceLock<Mutex<std::collections::HashSet<String>>> = OnceLock::new();
    SEEN.get_or_init(|| Mutex::new(std::collections::HashSet::new()))
}

fn warn_legacy_once(raw: &str) {
    let mut seen = legacy_seen().lock().unwrap_or_else(|e| e.into_inner());
    if seen.insert(raw.to_string()) {
        tracing::warn!(identity = raw, "accepted legacy agent identity form; write paths emit only the v2 form");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v2_form() {
        let id = AgentIdentity::parse("agent-acme-alice-code").unwrap();
        assert_eq!(id.tenant.as_deref(), Some("acme"));
        assert_eq!(id.user, "alice");
        assert_eq!(id.name, "code");
        assert!(!id.is_legacy());
    }

    #[test]
    fn name_may_contain_dashes() {
        let id = AgentIdentity::parse("agent-acme-alice-code-server-1").unwrap();
        assert_eq!(id.name, "code-server-1");
    }

    #[test]
    fn parses_legacy_form() {
        let id = AgentIdentity::parse("alice-code").unwrap();
        assert_eq!(id.tenant, None);
        assert_eq!(id.user, "alice");
        assert_eq!(id.name, "code");
        assert!(id.is_legacy());
    }

    #[test]
    fn legacy_name_may_contain_dashes() {
        let id = AgentIdentity::parse("alice-code-server-1").unwrap();
        assert_eq!(id.name, "code-server-1");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(AgentIdentity::parse(""), Err(IdentityError::Empty));
    }

    #[test]
    fn rejects_malformed_v2_missing_field() {
        assert!(matches!(
            AgentIdentity::parse("agent-acme-alice"),
            Err(IdentityError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_malformed_legacy_single_field() {
        assert!(matches!(AgentIdentity::parse("alice"), Err(IdentityError::Malformed(_))));
    }

    #[test]
    fn rejects_uppercase_and_invalid_chars() {
        assert!(AgentIdentity::parse("agent-Acme-alice-code").is_err());
        assert!(AgentIdentity::parse("agent-acme-alice-c0de_1").is_err());
    }

    #[test]
    fn round_trips_canonical_form() {
        for s in ["agent-acme-alice-code", "agent-acme-bob-jupyter-lab"] {
            let id = AgentIdentity::parse(s).unwrap();
            assert_eq!(id.format(), s);
        }
    }

    #[test]
    fn exactly_one_of_legacy_or_v2() {
        let v2 = AgentIdentity::parse("agent-acme-alice-code").unwrap();
        let legacy = AgentIdentity::parse("alice-code").unwrap();
        assert!(!v2.is_legacy() && v2.tenant.is_some());
        assert!(legacy.is_legacy() && legacy.tenant.is_none());
    }

    #[test]
    fn owner_match_v2_with_tenancy() {
        let id = AgentIdentity::parse("agent-acme-alice-code").unwrap();
        assert!(id.matches_owner("alice", Some("acme"), true));
        assert!(!id.matches_owner("alice", Some("other-tenant"), true));
        assert!(!id.matches_owner("bob", Some("acme"), true));
        // tenancy disabled: tenant is not checked
        assert!(id.matches_owner("alice", Some("other-tenant"), false));
    }

    #[test]
    fn owner_match_legacy_ignores_tenant() {
        let id = AgentIdentity::parse("alice-code").unwrap();
        assert!(id.matches_owner("alice", Some("anything"), true));
        assert!(id.matches_owner("alice", None, true));
        assert!(!id.matches_owner("bob", None, true));
    }

    #[test]
    fn tunnel_key_stable_and_distinct_from_v2() {
        let legacy = AgentIdentity::parse("alice-code").unwrap();
        let v2 = AgentIdentity::parse("agent-alice-alice-code").unwrap();
        assert_ne!(legacy.tunnel_key(), v2.tunnel_key());
    }
}
