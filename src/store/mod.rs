//! Coordination store abstraction
//!
//! The node needs only a narrow slice of etcd: plain puts for batch
//! digests, leases with keep-alive for leadership, one compare-and-set for
//! the leader key and prefix watches for followers. [`EtcdStore`] talks to a
//! real cluster, [`MemoryStore`] keeps everything in process for tests.

pub mod etcd;
pub mod memory;

use crate::common::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

pub type LeaseId = i64;

/// Remaining TTL reported on every successful renewal. The stream closes
/// once the lease can no longer be renewed.
pub type KeepAliveStream = mpsc::Receiver<i64>;

/// Events under a watched prefix. The stream closes when the watch ends.
pub type WatchStream = mpsc::Receiver<WatchEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
        }
    }
}

/// Result of the `version(key) == 0` compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// Key was absent and now holds our value
    Acquired,
    /// Key already existed; carries its current value
    Held(String),
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Every key under `prefix` with its value, in key order
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId>;

    /// Start renewing `lease` in the background
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream>;

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;

    /// Atomically write `key = value` bound to `lease` if the key does not
    /// exist yet, otherwise report who holds it.
    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<CasOutcome>;

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;
}
