//! In-memory coordination store
//!
//! Mimics the subset of etcd semantics the node relies on: versioned keys,
//! leases that drop their keys on expiry, prefix watches. Leases never time
//! out on their own; tests expire them explicitly with
//! [`MemoryStore::expire_lease`]. Failures can be injected for puts or for
//! every call.

use super::{CasOutcome, CoordinationStore, KeepAliveStream, LeaseId, WatchEvent, WatchStream};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, Mutex};

const WATCH_BUFFER: usize = 1024;

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: i64,
    keepers: Vec<mpsc::Sender<i64>>,
}

#[derive(Default)]
struct Inner {
    kv: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: LeaseId,
    watchers: Vec<(String, mpsc::Sender<WatchEvent>)>,
    history: Vec<(String, String)>,
    fail_puts: bool,
    offline: bool,
}

impl Inner {
    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(Error::Store("store unavailable".into()));
        }
        Ok(())
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|(prefix, tx)| {
            if !event.key().starts_with(prefix.as_str()) {
                return !tx.is_closed();
            }
            tx.try_send(event.clone()).is_ok()
        });
    }

    fn write(&mut self, key: &str, value: &str, lease: Option<LeaseId>) {
        self.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        self.history.push((key.to_string(), value.to_string()));
        self.notify(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn drop_lease(&mut self, lease: LeaseId) -> bool {
        if self.leases.remove(&lease).is_none() {
            return false;
        }
        let bound: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease))
            .map(|(key, _)| key.clone())
            .collect();
        for key in bound {
            self.kv.remove(&key);
            self.notify(WatchEvent::Delete { key });
        }
        true
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire a lease as if its TTL ran out: keep-alive streams close and
    /// keys bound to it are deleted. Returns false for unknown leases.
    pub async fn expire_lease(&self, lease: LeaseId) -> bool {
        self.inner.lock().await.drop_lease(lease)
    }

    /// Make every subsequent `put` fail (or succeed again)
    pub async fn set_fail_puts(&self, fail: bool) {
        self.inner.lock().await.fail_puts = fail;
    }

    /// Make every call fail, as during a partition from the cluster
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    /// Every successful write in order, lease-bound ones included
    pub async fn history(&self) -> Vec<(String, String)> {
        self.inner.lock().await.history.clone()
    }

    /// Leases currently alive
    pub async fn live_leases(&self) -> Vec<LeaseId> {
        self.inner.lock().await.leases.keys().copied().collect()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        if inner.fail_puts {
            return Err(Error::Store(format!("put {} rejected", key)));
        }
        inner.write(key, value, None);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner.kv.get(key).map(|entry| entry.value.clone()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let inner = self.inner.lock().await;
        inner.check_online()?;
        Ok(inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner.leases.insert(
            id,
            Lease {
                ttl: ttl_secs,
                keepers: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        let state = inner.leases.get_mut(&lease).ok_or(Error::LeaseLost(lease))?;
        let (tx, rx) = mpsc::channel(1);
        // first renewal succeeds immediately, like etcd's initial response
        let _ = tx.try_send(state.ttl);
        state.keepers.push(tx);
        Ok(rx)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        inner.drop_lease(lease);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        if let Some(entry) = inner.kv.get(key) {
            return Ok(CasOutcome::Held(entry.value.clone()));
        }
        if !inner.leases.contains_key(&lease) {
            return Err(Error::LeaseLost(lease));
        }
        inner.write(key, value, Some(lease));
        Ok(CasOutcome::Acquired)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        inner.watchers.push((prefix.to_string(), tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_if_absent_first_wins() {
        let store = MemoryStore::new();
        let l1 = store.grant_lease(10).await.unwrap();
        let l2 = store.grant_lease(10).await.unwrap();

        assert_eq!(
            store.put_if_absent("/leader", "a", l1).await.unwrap(),
            CasOutcome::Acquired
        );
        assert_eq!(
            store.put_if_absent("/leader", "b", l2).await.unwrap(),
            CasOutcome::Held("a".into())
        );
    }

    #[tokio::test]
    async fn test_expiry_drops_bound_keys_and_closes_keepalive() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(10).await.unwrap();
        store.put_if_absent("/leader", "a", lease).await.unwrap();
        let mut keepalive = store.keep_alive(lease).await.unwrap();
        assert_eq!(keepalive.recv().await, Some(10));

        assert!(store.expire_lease(lease).await);
        assert_eq!(keepalive.recv().await, None);
        assert_eq!(store.get("/leader").await.unwrap(), None);
        assert!(!store.expire_lease(lease).await);
    }

    #[tokio::test]
    async fn test_watch_prefix() {
        let store = MemoryStore::new();
        let mut watch = store.watch_prefix("/maroon/hashes/").await.unwrap();

        store.put("/maroon/other", "x").await.unwrap();
        store.put("/maroon/hashes/0", "a,b,c").await.unwrap();

        assert_eq!(
            watch.recv().await,
            Some(WatchEvent::Put {
                key: "/maroon/hashes/0".into(),
                value: "a,b,c".into()
            })
        );
        assert!(watch.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_prefix() {
        let store = MemoryStore::new();
        store.put("/maroon/hashes/1", "d,e,f").await.unwrap();
        store.put("/maroon/hashes/0", "a,b,c").await.unwrap();
        store.put("/maroon/leader", "maroon-0").await.unwrap();
        store.put("/maroon/hashesx", "other").await.unwrap();

        assert_eq!(
            store.get_prefix("/maroon/hashes/").await.unwrap(),
            vec![
                ("/maroon/hashes/0".to_string(), "a,b,c".to_string()),
                ("/maroon/hashes/1".to_string(), "d,e,f".to_string()),
            ]
        );
        assert!(store.get_prefix("/nothing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.set_fail_puts(true).await;
        assert!(store.put("/k", "v").await.is_err());
        store.set_fail_puts(false).await;
        store.put("/k", "v").await.unwrap();

        store.set_offline(true).await;
        assert!(store.grant_lease(10).await.is_err());
        assert!(store.get("/k").await.is_err());
    }
}
