//! Leader/follower state machine and its event loop

use crate::app::ledger::{Confirmation, LedgerSnapshot, LedgerState};
use crate::app::operation::{batch_digest, content_hash, split_digest, Operation};
use crate::common::{batch_key, batch_prefix, parse_batch_counter, wait_for_stop, AppConfig, Result, StopReceiver};
use crate::p2p::{DistTransport, InboundMessage, TransactionDistributed};
use crate::store::{CoordinationStore, WatchEvent, WatchStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;

/// Everything the event loop waits on
pub struct AppEvents {
    pub stop: StopReceiver,
    /// Edge-triggered leadership transitions
    pub leadership: mpsc::Receiver<bool>,
    pub distributed: mpsc::Receiver<TransactionDistributed>,
    pub inbound: mpsc::Receiver<InboundMessage>,
    /// Published batches; `None` when the watch could not be established
    pub watch: Option<WatchStream>,
}

pub struct Application {
    store: Arc<dyn CoordinationStore>,
    transport: Arc<dyn DistTransport>,
    config: AppConfig,
    state: Mutex<LedgerState>,
}

impl Application {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        transport: Arc<dyn DistTransport>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Submit an operation. Returns its ID when accepted, `None` when this
    /// node is not the leader (the operation is dropped, not queued).
    pub async fn add_op(&self, op: Operation) -> Result<Option<String>> {
        let tx = op.to_transaction()?;
        {
            let mut state = self.state.lock().await;
            if !state.is_leader {
                tracing::debug!(target: "application", "not leader, dropping operation");
                return Ok(None);
            }
            state.track(tx.id.clone(), op);
        }

        let id = tx.id.clone();
        self.transport.distribute_tx(tx);
        Ok(Some(id))
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.is_leader
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Serialize every state transition through one loop until stopped.
    /// A closed input channel only disables its branch.
    pub async fn run(&self, mut events: AppEvents) {
        let period = self.config.tick_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut leadership_open = true;
        let mut distributed_open = true;
        let mut inbound_open = true;
        let mut watch_open = events.watch.is_some();

        loop {
            tokio::select! {
                biased;

                _ = wait_for_stop(&mut events.stop) => break,
                update = events.leadership.recv(), if leadership_open => match update {
                    Some(is_leader) => self.handle_leadership(is_leader).await,
                    None => leadership_open = false,
                },
                confirmation = events.distributed.recv(), if distributed_open => match confirmation {
                    Some(confirmation) => self.handle_distributed(confirmation).await,
                    None => distributed_open = false,
                },
                message = events.inbound.recv(), if inbound_open => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => inbound_open = false,
                },
                event = next_watch_event(&mut events.watch), if watch_open => match event {
                    Some(event) => self.handle_watch_event(event).await,
                    None => {
                        tracing::warn!(target: "application", "store watch ended");
                        watch_open = false;
                    }
                },
                _ = ticker.tick() => self.handle_tick().await,
            }
        }

        tracing::info!(target: "application", "application loop stopped");
    }

    pub async fn handle_leadership(&self, is_leader: bool) {
        let mut state = self.state.lock().await;
        if state.is_leader == is_leader {
            tracing::debug!(target: "application", is_leader, "leadership unchanged");
            return;
        }
        state.is_leader = is_leader;
        if is_leader {
            let store_next = self.published_next().await;
            let counter = state.rebase_counter(store_next);
            tracing::info!(target: "application", next_batch = counter, "acting as leader");
        } else {
            tracing::info!(target: "application", "acting as follower");
        }
    }

    /// Quorum confirmation from the transport. Commits a batch as soon as
    /// enough confirmations accumulated.
    pub async fn handle_distributed(&self, confirmation: TransactionDistributed) {
        let mut state = self.state.lock().await;
        match state.confirm(&confirmation.id) {
            Confirmation::Accepted => {
                tracing::info!(target: "application", id = %confirmation.id, "tx confirmed");
                self.publish_ready_batches(&mut state).await;
            }
            Confirmation::NotLeader => {
                tracing::debug!(target: "application", id = %confirmation.id, "not leader, ignoring confirmation");
            }
            Confirmation::Unknown => {
                tracing::debug!(target: "application", id = %confirmation.id, "confirmation for unknown tx");
            }
            Confirmation::Duplicate => {
                tracing::debug!(target: "application", id = %confirmation.id, "duplicate confirmation");
            }
        }
    }

    pub async fn handle_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::AddTx {
                from_node,
                id,
                payload,
            } => {
                if content_hash(&payload) != id {
                    tracing::debug!(target: "application", %from_node, %id, "tx id does not match payload");
                    return;
                }
                let op = match Operation::decode(&payload) {
                    Ok(op) => op,
                    Err(e) => {
                        tracing::debug!(target: "application", %from_node, %id, "malformed tx: {}", e);
                        return;
                    }
                };

                let acks = {
                    let mut state = self.state.lock().await;
                    if state.is_leader {
                        tracing::warn!(target: "application", %from_node, "leader received AddTx, ignoring");
                        return;
                    }
                    state.receive(id, op, from_node);
                    state.reconcile()
                };
                self.send_acks(acks);
            }
            InboundMessage::AckBatch { from_node, hash } => {
                let mut state = self.state.lock().await;
                if !state.is_leader {
                    tracing::debug!(target: "application", %from_node, "follower ignoring AckBatch");
                    return;
                }
                let total = state.note_batch_ack();
                tracing::info!(target: "application", %from_node, batch = %hash, total, "batch acknowledged");
            }
        }
    }

    /// Follower side of the store watch: apply published batches whose
    /// transactions are all known locally.
    pub async fn handle_watch_event(&self, event: WatchEvent) {
        let (key, digest) = match event {
            WatchEvent::Put { key, value } => (key, value),
            WatchEvent::Delete { key } => {
                tracing::debug!(target: "application", %key, "batch key deleted");
                return;
            }
        };
        let Some(counter) = parse_batch_counter(&self.config.hashes_key, &key) else {
            tracing::debug!(target: "application", %key, "ignoring non-batch key");
            return;
        };

        let acks = {
            let mut state = self.state.lock().await;
            if state.is_leader {
                // the leader published it itself
                return;
            }
            if !state.queue_published(counter, split_digest(&digest)) {
                return;
            }
            let acks = state.reconcile();
            let snapshot = state.snapshot();
            if !snapshot.missing.is_empty() {
                tracing::info!(
                    target: "application",
                    batch = counter,
                    missing = snapshot.missing.len(),
                    "waiting for transactions of published batch"
                );
            }
            acks
        };
        self.send_acks(acks);
    }

    /// Periodic housekeeping: retry a stuck publish, optionally generate a
    /// timestamp operation.
    pub async fn handle_tick(&self) {
        let generate = {
            let mut state = self.state.lock().await;
            if !state.is_leader {
                return;
            }
            if state.publish_pending() {
                tracing::info!(target: "application", "retrying pending batch publish");
                self.publish_ready_batches(&mut state).await;
            }
            self.config.generate_ops
        };

        if generate {
            let op = Operation::print_timestamp(chrono::Utc::now().timestamp());
            if let Err(e) = self.add_op(op).await {
                tracing::error!(target: "application", "failed to generate operation: {}", e);
            }
        }
    }

    /// One past the highest batch counter present in the store
    async fn published_next(&self) -> Option<u64> {
        let prefix = batch_prefix(&self.config.hashes_key);
        match self.store.get_prefix(&prefix).await {
            Ok(entries) => Some(
                entries
                    .iter()
                    .filter_map(|(key, _)| parse_batch_counter(&self.config.hashes_key, key))
                    .map(|counter| counter + 1)
                    .max()
                    .unwrap_or(0),
            ),
            Err(e) => {
                tracing::error!(target: "application", "failed to read published batches: {}", e);
                None
            }
        }
    }

    async fn publish_ready_batches(&self, state: &mut LedgerState) {
        if !state.counter_synced() && state.next_batch(self.config.batch_size).is_some() {
            let Some(store_next) = self.published_next().await else {
                state.set_publish_pending(true);
                return;
            };
            state.rebase_counter(Some(store_next));
        }
        while let Some(members) = state.next_batch(self.config.batch_size) {
            let key = batch_key(&self.config.hashes_key, state.batch_counter());
            let digest = batch_digest(&members);

            // held under the ledger lock so commits never interleave
            if let Err(e) = self.store.put(&key, &digest).await {
                tracing::error!(target: "application", %key, "failed to put batch digest: {}", e);
                state.set_publish_pending(true);
                return;
            }

            state.commit_batch(&members);
            tracing::info!(target: "application", %key, digest = %digest, "published batch");
        }
    }

    fn send_acks(&self, acks: Vec<(String, String)>) {
        for (peer, digest) in acks {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.ack_batch(&peer, &digest).await {
                    tracing::warn!(target: "application", %peer, "failed to ack batch: {}", e);
                }
            });
        }
    }
}

async fn next_watch_event(watch: &mut Option<WatchStream>) -> Option<WatchEvent> {
    match watch {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}
