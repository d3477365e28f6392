//! Single campaign attempt and the leadership-loss signal

use crate::common::{Error, Result};
use crate::store::{CasOutcome, CoordinationStore, LeaseId};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Fires exactly once, when the lease backing our leadership can no longer
/// be renewed (expiry, partition, resignation). Dropping it stops renewal.
#[derive(Debug)]
pub struct LeadershipLost {
    rx: oneshot::Receiver<()>,
}

impl LeadershipLost {
    /// Wait until leadership is gone
    pub async fn wait(self) {
        // a dropped sender means the listener is gone too
        let _ = self.rx.await;
    }
}

pub struct LeaderElection {
    store: Arc<dyn CoordinationStore>,
    leader_key: String,
    node_id: String,
    ttl_secs: i64,
    lease: Mutex<Option<LeaseId>>,
}

impl LeaderElection {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        leader_key: impl Into<String>,
        node_id: impl Into<String>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            leader_key: leader_key.into(),
            node_id: node_id.into(),
            ttl_secs,
            lease: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Try once to become leader.
    ///
    /// Returns [`Error::NotLeader`] with the current holder when someone
    /// else owns the leader key; the caller decides when to retry.
    pub async fn campaign(&self) -> Result<LeadershipLost> {
        let lease = self.store.grant_lease(self.ttl_secs).await?;

        let outcome = self
            .store
            .put_if_absent(&self.leader_key, &self.node_id, lease)
            .await;
        match outcome {
            Ok(CasOutcome::Acquired) => {}
            Ok(CasOutcome::Held(current)) => {
                self.release_unused(lease).await;
                return Err(Error::NotLeader(current));
            }
            Err(e) => {
                self.release_unused(lease).await;
                return Err(e);
            }
        }

        let mut keepalive = match self.store.keep_alive(lease).await {
            Ok(stream) => stream,
            Err(e) => {
                // the key goes with the lease
                self.release_unused(lease).await;
                return Err(e);
            }
        };
        *self.lease.lock().await = Some(lease);

        let (mut tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    renewed = keepalive.recv() => {
                        if renewed.is_none() {
                            break;
                        }
                    }
                    _ = tx.closed() => return,
                }
            }
            tracing::warn!(target: "election", lease, "lease keep-alive ended");
            let _ = tx.send(());
        });

        tracing::info!(target: "election", node = %self.node_id, lease, "acquired leadership");
        Ok(LeadershipLost { rx })
    }

    /// Point-in-time read of the leader key. Diagnostic only: the pushed
    /// [`LeadershipLost`] signal is the authoritative source.
    pub async fn is_leader(&self) -> bool {
        match self.store.get(&self.leader_key).await {
            Ok(Some(holder)) => holder == self.node_id,
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(target: "election", "leader lookup failed: {}", e);
                false
            }
        }
    }

    /// Current leader identity, if any
    pub async fn current_leader(&self) -> Result<Option<String>> {
        self.store.get(&self.leader_key).await
    }

    /// Lease held since the last successful campaign
    pub async fn lease(&self) -> Option<LeaseId> {
        *self.lease.lock().await
    }

    /// Give up leadership by revoking our lease
    pub async fn resign(&self) -> Result<()> {
        let Some(lease) = self.lease.lock().await.take() else {
            return Ok(());
        };
        tracing::info!(target: "election", node = %self.node_id, lease, "resigning");
        self.store.revoke_lease(lease).await
    }

    async fn release_unused(&self, lease: LeaseId) {
        if let Err(e) = self.store.revoke_lease(lease).await {
            tracing::debug!(target: "election", lease, "failed to revoke unused lease: {}", e);
        }
    }
}
