//! Campaign loop: keeps trying to lead and pushes every transition

use super::LeaderElection;
use crate::common::{wait_for_stop, Error, StopReceiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Campaign until stopped. `true` is pushed on every win and `false` on
/// every loss, so consumers see edges only. On stop, a held leadership is
/// resigned before returning.
pub async fn run_campaign_loop(
    election: Arc<LeaderElection>,
    leader_tx: mpsc::Sender<bool>,
    mut stop: StopReceiver,
    retry_delay: Duration,
) {
    loop {
        let attempt = tokio::select! {
            res = election.campaign() => res,
            _ = wait_for_stop(&mut stop) => break,
        };

        match attempt {
            Ok(lost) => {
                tracing::info!(target: "election", node = %election.node_id(), "became leader");
                if leader_tx.send(true).await.is_err() {
                    resign(&election).await;
                    return;
                }

                tokio::select! {
                    _ = lost.wait() => {
                        tracing::warn!(target: "election", node = %election.node_id(), "lost leadership");
                        if leader_tx.send(false).await.is_err() {
                            return;
                        }
                    }
                    _ = wait_for_stop(&mut stop) => {
                        resign(&election).await;
                        let _ = leader_tx.send(false).await;
                        return;
                    }
                }
            }
            Err(Error::NotLeader(current)) => {
                tracing::info!(target: "election", "current leader is: {}", current);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(target: "election", "campaign failed, retrying: {}", e);
            }
            Err(e) => {
                tracing::error!(target: "election", "campaign failed: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = wait_for_stop(&mut stop) => break,
        }
    }
}

async fn resign(election: &LeaderElection) {
    if let Err(e) = election.resign().await {
        tracing::warn!(target: "election", "failed to resign: {}", e);
    }
}
