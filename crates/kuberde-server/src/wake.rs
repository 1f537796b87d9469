//! On-demand wake (spec §4.1 "On-demand wake", §5 "Per-agent wake
//! lock", §8's concurrent-wake invariant: "at most one issues a
//! replicas-bump to Kubernetes; the others wait on the same outcome").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use kuberde_tunnel::TunnelRegistry;
use kuberde_types::{AgentIdentity, CoreError};

use crate::k8s;
use crate::metrics::Metrics;

const REPLICA_POLL_INTERVAL: Duration = Duration::from_secs(1);
const TUNNEL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const TUNNEL_WAIT_BOUND: Duration = Duration::from_secs(15);

/// How long the caller is willing to wait for `ready_replicas >= 1`
/// (spec §4.1: "30s for HTTP requests, 60s for CLI/SSH").
#[derive(Debug, Clone, Copy)]
pub enum WakeBudget {
    Http,
    Cli,
}

impl WakeBudget {
    fn replica_ready_bound(self) -> Duration {
        match self {
            WakeBudget::Http => Duration::from_secs(30),
            WakeBudget::Cli => Duration::from_secs(60),
        }
    }
}

/// `AgentIdentity -> in-progress wake` map under a mutex per identity:
/// the lock itself *is* the in-progress flag (spec §5). A waker holds
/// the per-identity `Mutex` across the scale-up write and the
/// ready-replica poll; a concurrent waker blocks on the same `Mutex`
/// and, once it acquires it, finds the deployment already scaled (or
/// the attempt having failed) rather than issuing a second bump.
#[derive(Clone, Default)]
pub struct WakeLocks {
    locks: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl WakeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Runs the full §4.1 wake procedure. Returns `Ok(())` once a tunnel
/// for `identity` exists and is usable, or a `CoreError::BadGateway`
/// describing which stage timed out.
pub async fn wake_agent(
    kube: &kube::Client,
    namespace: &str,
    registry: &TunnelRegistry,
    wake_locks: &WakeLocks,
    metrics: &Metrics,
    identity: &AgentIdentity,
    budget: WakeBudget,
) -> Result<(), CoreError> {
    metrics.wake_attempts_total.inc();
    let deployment_name = identity.format();

    // Step 1: if a live tunnel already exists, nothing to do.
    if registry.get(identity).await.is_some() {
        return Ok(());
    }

    let state = k8s::replica_state(kube, namespace, &deployment_name).await?;

    if state.desired == 0 {
        // Steps 2-3 under the per-agent lock.
        let lock = wake_locks.lock_for(&identity.tunnel_key());
        let _guard = lock.lock().await;

        // Re-check: another waker may have already bumped and the
        // deployment may already be ready by the time this task got
        // the lock, in which case no second bump is issued.
        let rechecked = k8s::replica_state(kube, namespace, &deployment_name).await?;
        if rechecked.desired == 0 {
            k8s::scale_to(kube, namespace, &deployment_name, 1).await?;
            tracing::info!(identity = %identity, "wake: scaled deployment to 1 replica");
        }

        if let Err(e) = wait_ready(kube, namespace, &deployment_name, budget.replica_ready_bound()).await {
            metrics.wake_timeouts_total.inc();
            return Err(e);
        }
    } else if state.ready < 1 {
        // Already bumped by some external actor but not yet ready.
        wait_ready(kube, namespace, &deployment_name, budget.replica_ready_bound()).await.map_err(|e| {
            metrics.wake_timeouts_total.inc();
            e
        })?;
    }

    // Step 4: poll the tunnel map.
    wait_tunnel(registry, identity, TUNNEL_WAIT_BOUND).await.map_err(|e| {
        metrics.wake_timeouts_total.inc();
        e
    })
}

async fn wait_ready(client: &kube::Client, namespace: &str, deployment_name: &str, bound: Duration) -> Result<(), CoreError> {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if k8s::has_replica_failure(client, namespace, deployment_name).await? {
            return Err(CoreError::BadGateway(format!("deployment {deployment_name} has ReplicaFailure")));
        }
        let state = k8s::replica_state(client, namespace, deployment_name).await?;
        if state.ready >= 1 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::BadGateway(format!(
                "timed out waiting for deployment {deployment_name} to become ready"
            )));
        }
        tokio::time::sleep(REPLICA_POLL_INTERVAL.min(deadline.saturating_duration_since(tokio::time::Instant::now()))).await;
    }
}

async fn wait_tunnel(registry: &TunnelRegistry, identity: &AgentIdentity, bound: Duration) -> Result<(), CoreError> {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if registry.get(identity).await.is_some() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::BadGateway(format!("agent {identity} did not reconnect after wake")));
        }
        tokio::time::sleep(TUNNEL_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_for_returns_the_same_handle_for_the_same_key() {
        let locks = WakeLocks::new();
        let a = locks.lock_for("agent-acme-alice-code");
        let b = locks.lock_for("agent-acme-alice-code");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_wakers_serialize_on_the_same_lock() {
        let locks = WakeLocks::new();
        let lock = locks.lock_for("agent-acme-alice-code");
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let lock2 = lock.clone();
        let order2 = order.clone();
        let first = tokio::spawn(async move {
            let _g = lock2.lock().await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            order2.lock().unwrap().push(1);
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = tokio::spawn(async move {
            let _g = lock.lock().await;
            order.lock().unwrap().push(2);
        });

        first.await.unwrap();
        second.await.unwrap();
    }
}
