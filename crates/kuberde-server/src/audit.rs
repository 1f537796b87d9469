//! Audit event emission (SPEC_FULL.md "Supplemented features: Audit
//! event emission"; spec §3 `UserConnection` persisted audit record,
//! §4.1 "Admin access... is recorded as an audit event carrying the
//! target owner's username", §8 scenario 6).
//!
//! The core does not persist application state (spec §1 Non-goals), so
//! these are structured `tracing` events on the `audit` target rather
//! than database writes; the out-of-scope application layer is
//! expected to subscribe to that target.

use kuberde_types::AgentIdentity;

/// A non-owner (admin) access to `identity`, owned by `target_owner`.
pub fn admin_cross_owner_access(action: &str, principal: &str, target_owner: &str, identity: &AgentIdentity) {
    tracing::info!(
        target: "audit",
        action = format!("admin_{action}"),
        principal,
        target_owner,
        agent_identity = %identity,
        "admin accessed an agent they do not own",
    );
}

/// A `UserConnection` opened against `identity`.
pub fn connection_opened(session_id: &str, principal: &str, identity: &AgentIdentity) {
    tracing::info!(
        target: "audit",
        action = "connection_open",
        session_id,
        principal,
        agent_identity = %identity,
    );
}

/// A `UserConnection` closed, with final byte counters.
pub fn connection_closed(session_id: &str, principal: &str, identity: &AgentIdentity, bytes_in: u64, bytes_out: u64) {
    tracing::info!(
        target: "audit",
        action = "connection_close",
        session_id,
        principal,
        agent_identity = %identity,
        bytes_in,
        bytes_out,
    );
}
