//! `AgentTunnel` and `TunnelRegistry` — the Server-side runtime tunnel
//! map (spec §3, §5, §9's "Registry" redesign flag).
//!
//! Replaces the "shared mutable map protected by a single lock" pattern
//! with a named abstraction offering `upsert`/`evict`/`get`/`list` and
//! internal locking, so the "at most one tunnel per identity" invariant
//! (spec §8) is enforced at a single call site and consumers never hold
//! the lock across I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use kuberde_types::AgentIdentity;

use crate::session::Control;

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// One live, authenticated multiplexed connection from an agent.
pub struct AgentTunnel {
    pub identity: AgentIdentity,
    pub control: Control,
    pub created_at: i64,
    active_connections: AtomicU64,
    last_activity_millis: AtomicI64,
    driver: JoinHandle<()>,
}

impl AgentTunnel {
    pub fn new(identity: AgentIdentity, control: Control, driver: JoinHandle<()>) -> Arc<Self> {
        let now = now_millis();
        Arc::new(Self {
            identity,
            control,
            created_at: now,
            active_connections: AtomicU64::new(0),
            last_activity_millis: AtomicI64::new(now),
            driver,
        })
    }

    /// Opens a new stream on this tunnel (the Server's "dial"). Bumps
    /// the active-connection counter; callers must call
    /// [`AgentTunnel::stream_closed`] when the stream ends.
    pub async fn open_stream(&self) -> Result<yamux::Stream, yamux::ConnectionError> {
        let stream = self.control.open_stream().await?;
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        self.touch();
        Ok(stream)
    }

    pub fn stream_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Lock-free activity stamp, callable from the hot byte-copy path.
    pub fn touch(&self) {
        self.last_activity_millis.store(now_millis(), Ordering::SeqCst);
    }

    pub fn last_activity_millis(&self) -> i64 {
        self.last_activity_millis.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }

    fn close(&self) {
        self.driver.abort();
    }
}

/// The Server-side registry of live tunnels, keyed by
/// [`AgentIdentity::tunnel_key`].
#[derive(Default, Clone)]
pub struct TunnelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<AgentTunnel>>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh tunnel, evicting and closing any prior tunnel
    /// for the same identity first. This is the single call site that
    /// enforces "≤1 tunnel per identity" (spec §8): eviction and
    /// insertion happen under the same write-lock acquisition so no
    /// other task can observe two tunnels for one key.
    pub async fn upsert(&self, tunnel: Arc<AgentTunnel>) {
        let key = tunnel.identity.tunnel_key();
        let mut map = self.inner.write().await;
        if let Some(old) = map.remove(&key) {
            tracing::info!(identity = %old.identity, "evicting previous tunnel on reconnect");
            old.close();
        }
        map.insert(key, tunnel);
    }

    pub async fn evict(&self, identity: &AgentIdentity) {
        let mut map = self.inner.write().await;
        if let Some(tunnel) = map.remove(&identity.tunnel_key()) {
            tunnel.close();
        }
    }

    /// Removes the entry only if it still points at `expected` (avoids
    /// a just-reconnected tunnel being evicted by a stale cleanup task
    /// for the connection that preceded it).
    pub async fn evict_if_same(&self, identity: &AgentIdentity, expected: &Arc<AgentTunnel>) {
        let mut map = self.inner.write().await;
        if let Some(current) = map.get(&identity.tunnel_key()) {
            if Arc::ptr_eq(current, expected) {
                map.remove(&identity.tunnel_key());
            }
        }
    }

    /// Returns a cloned `Arc` so callers never hold the registry lock
    /// across I/O (spec §9).
    pub async fn get(&self, identity: &AgentIdentity) -> Option<Arc<AgentTunnel>> {
        let map = self.inner.read().await;
        map.get(&identity.tunnel_key()).filter(|t| !t.is_closed()).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<AgentTunnel>> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;
    use kuberde_types::AgentIdentity;

    /// Builds one real, connected tunnel (a Server-mode `Connection`
    /// over one half of an in-memory duplex pipe, an Agent-mode
    /// `Connection` driven on the other half) so registry tests exercise
    /// the real `Control`/driver plumbing rather than a stand-in.
    async fn real_tunnel(identity: AgentIdentity) -> Arc<AgentTunnel> {
        let (server_io, agent_io) = tokio::io::duplex(64 * 1024);
        let (control, _server_inbound, server_driver) = session::server_connection(server_io);
        let driver = tokio::spawn(server_driver);

        let (_agent_control, mut agent_inbound, agent_driver) = session::agent_connection(agent_io);
        tokio::spawn(agent_driver);
        tokio::spawn(async move { while agent_inbound.accept().await.is_some() {} });

        AgentTunnel::new(identity, control, driver)
    }

    #[tokio::test]
    async fn upsert_evicts_previous_tunnel_for_same_identity() {
        let registry = TunnelRegistry::new();
        let id = AgentIdentity::parse("agent-acme-alice-code").unwrap();

        let first = real_tunnel(id.clone()).await;
        registry.upsert(first.clone()).await;
        assert_eq!(registry.len().await, 1);

        let second = real_tunnel(id.clone()).await;
        registry.upsert(second.clone()).await;

        assert_eq!(registry.len().await, 1, "at most one tunnel per identity");
        // give the aborted driver task a moment to actually stop
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(first.is_closed(), "old tunnel must be closed on eviction");

        let current = registry.get(&id).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn evict_removes_and_closes() {
        let registry = TunnelRegistry::new();
        let id = AgentIdentity::parse("agent-acme-bob-jupyter").unwrap();
        let tunnel = real_tunnel(id.clone()).await;
        registry.upsert(tunnel.clone()).await;

        registry.evict(&id).await;

        assert!(registry.get(&id).await.is_none());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(tunnel.is_closed());
    }

    #[tokio::test]
    async fn get_filters_out_closed_tunnels() {
        let registry = TunnelRegistry::new();
        let id = AgentIdentity::parse("bob-code").unwrap();
        let tunnel = real_tunnel(id.clone()).await;
        registry.upsert(tunnel.clone()).await;
        tunnel.close();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn list_returns_all_entries() {
        let registry = TunnelRegistry::new();
        let a = AgentIdentity::parse("agent-acme-alice-code").unwrap();
        let b = AgentIdentity::parse("agent-acme-bob-code").unwrap();
        registry.upsert(real_tunnel(a).await).await;
        registry.upsert(real_tunnel(b).await).await;

        assert_eq!(registry.list().await.len(), 2);
    }
}
