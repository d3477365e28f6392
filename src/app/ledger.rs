//! State guarded by the application lock
//!
//! Pure bookkeeping, no I/O: the [`Application`](super::Application) decides
//! when to publish and only then calls [`LedgerState::commit_batch`].

use crate::app::operation::{batch_digest, Operation};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Received transactions survive this many applied batches without being
/// included in one
const RECEIVED_RETENTION_BATCHES: u64 = 8;
/// Hard cap on received transactions; the oldest go first
const MAX_RECEIVED: usize = 65_536;

/// Outcome of a quorum confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accepted,
    /// Followers do not commit
    NotLeader,
    /// Not in flight: stale, committed already or never ours
    Unknown,
    /// Already acknowledged since the last commit
    Duplicate,
}

/// A transaction shared by the leader, waiting for its batch
#[derive(Debug, Clone)]
struct Received {
    op: Operation,
    from_node: String,
    // batch counter when it arrived
    at_batch: u64,
}

/// A published batch a follower has not applied yet
#[derive(Debug, Clone)]
struct PublishedBatch {
    counter: u64,
    ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub(crate) is_leader: bool,
    in_flight: HashMap<String, Operation>,
    acked: Vec<String>,
    confirmed: Vec<Operation>,
    batch_counter: u64,
    // one past the highest batch seen in the store, applied or not
    seen_next: u64,
    // the store was consulted since the last promotion
    counter_synced: bool,
    publish_pending: bool,
    // follower side
    received: HashMap<String, Received>,
    published: VecDeque<PublishedBatch>,
    missing: BTreeSet<String>,
    acks_received: u64,
}

impl LedgerState {
    pub fn batch_counter(&self) -> u64 {
        self.batch_counter
    }

    pub fn publish_pending(&self) -> bool {
        self.publish_pending
    }

    pub fn set_publish_pending(&mut self, pending: bool) {
        self.publish_pending = pending;
    }

    pub fn counter_synced(&self) -> bool {
        self.counter_synced
    }

    /// Move the counter past every batch known to exist, so a new leader
    /// never reuses a published key. `store_next` is one past the highest
    /// counter found in the store, if it could be read. Returns the counter
    /// in effect.
    pub fn rebase_counter(&mut self, store_next: Option<u64>) -> u64 {
        self.counter_synced = store_next.is_some();
        let next = self.seen_next.max(store_next.unwrap_or(0));
        if next > self.batch_counter {
            self.batch_counter = next;
        }
        self.batch_counter
    }

    /// Register an operation handed to the transport
    pub fn track(&mut self, id: String, op: Operation) {
        self.in_flight.insert(id, op);
    }

    pub fn confirm(&mut self, id: &str) -> Confirmation {
        if !self.is_leader {
            return Confirmation::NotLeader;
        }
        if !self.in_flight.contains_key(id) {
            return Confirmation::Unknown;
        }
        if self.acked.iter().any(|acked| acked == id) {
            return Confirmation::Duplicate;
        }
        self.acked.push(id.to_string());
        Confirmation::Accepted
    }

    /// Members of the next batch, in confirmation order, once enough
    /// confirmations arrived
    pub fn next_batch(&self, batch_size: usize) -> Option<Vec<String>> {
        if batch_size == 0 || self.acked.len() < batch_size {
            return None;
        }
        Some(self.acked[..batch_size].to_vec())
    }

    /// Apply a successfully published batch
    pub fn commit_batch(&mut self, members: &[String]) {
        self.acked.retain(|id| !members.contains(id));
        for id in members {
            if let Some(op) = self.in_flight.remove(id) {
                self.confirmed.push(op);
            }
        }
        self.batch_counter += 1;
        self.publish_pending = false;
    }

    pub fn note_batch_ack(&mut self) -> u64 {
        self.acks_received += 1;
        self.acks_received
    }

    /// Follower: remember a transaction shared by `from_node`
    pub fn receive(&mut self, id: String, op: Operation, from_node: String) {
        if self.received.len() >= MAX_RECEIVED && !self.received.contains_key(&id) {
            let oldest = self
                .received
                .iter()
                .min_by_key(|(_, r)| r.at_batch)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                tracing::warn!(target: "application", id = %oldest, "received set full, evicting");
                self.received.remove(&oldest);
            }
        }
        self.received.insert(
            id,
            Received {
                op,
                from_node,
                at_batch: self.batch_counter,
            },
        );
    }

    /// Follower: queue a batch seen in the store. Batches already applied
    /// are ignored.
    pub fn queue_published(&mut self, counter: u64, ids: Vec<String>) -> bool {
        self.seen_next = self.seen_next.max(counter + 1);
        if counter < self.batch_counter
            || self.published.iter().any(|batch| batch.counter == counter)
        {
            return false;
        }
        let at = self
            .published
            .iter()
            .position(|batch| batch.counter > counter)
            .unwrap_or(self.published.len());
        self.published.insert(at, PublishedBatch { counter, ids });
        true
    }

    /// Follower: apply queued batches in order while every member is known
    /// locally. Returns `(peer, digest)` acknowledgements to send.
    pub fn reconcile(&mut self) -> Vec<(String, String)> {
        let mut acks = Vec::new();
        let applied_from = self.batch_counter;

        while let Some(batch) = self.published.front() {
            let missing: Vec<String> = batch
                .ids
                .iter()
                .filter(|id| !self.received.contains_key(*id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                self.missing.extend(missing);
                break;
            }

            let Some(batch) = self.published.pop_front() else {
                break;
            };
            let mut origin = None;
            for id in &batch.ids {
                self.missing.remove(id);
                if let Some(received) = self.received.remove(id) {
                    self.confirmed.push(received.op);
                    origin = Some(received.from_node);
                }
            }
            self.batch_counter = batch.counter + 1;
            if let Some(peer) = origin {
                acks.push((peer, batch_digest(&batch.ids)));
            }
        }

        if self.batch_counter > applied_from {
            self.prune_received();
        }
        acks
    }

    /// Drop transactions that outlived several applied batches without
    /// being part of one
    fn prune_received(&mut self) {
        let floor = self
            .batch_counter
            .saturating_sub(RECEIVED_RETENTION_BATCHES);
        let before = self.received.len();
        self.received.retain(|_, r| r.at_batch >= floor);
        let pruned = before - self.received.len();
        if pruned > 0 {
            tracing::debug!(target: "application", pruned, "dropped stale received transactions");
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut in_flight: Vec<String> = self.in_flight.keys().cloned().collect();
        in_flight.sort();
        LedgerSnapshot {
            is_leader: self.is_leader,
            in_flight,
            acked: self.acked.clone(),
            confirmed: self.confirmed.clone(),
            batch_counter: self.batch_counter,
            publish_pending: self.publish_pending,
            received: self.received.len(),
            waiting_batches: self.published.len(),
            missing: self.missing.iter().cloned().collect(),
            acks_received: self.acks_received,
        }
    }
}

/// Point-in-time copy of the ledger for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub is_leader: bool,
    pub in_flight: Vec<String>,
    pub acked: Vec<String>,
    pub confirmed: Vec<Operation>,
    pub batch_counter: u64,
    pub publish_pending: bool,
    pub received: usize,
    pub waiting_batches: usize,
    pub missing: Vec<String>,
    pub acks_received: u64,
}
