//! etcd-backed coordination store

use super::{CasOutcome, CoordinationStore, KeepAliveStream, LeaseId, WatchEvent, WatchStream};
use crate::common::Result;
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, PutOptions, Txn, TxnOp,
    TxnOpResponse, WatchOptions,
};
use std::time::Duration;
use tokio::sync::mpsc;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const WATCH_BUFFER: usize = 256;

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let client = Client::connect(endpoints, Some(options)).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).into_owned()))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    String::from_utf8_lossy(kv.value()).into_owned(),
                )
            })
            .collect())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        let mut client = self.client.clone();
        let resp = client.lease_grant(ttl_secs, None).await?;
        Ok(resp.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let mut client = self.client.clone();
        let (mut keeper, mut responses) = client.lease_keep_alive(lease).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                if let Err(e) = keeper.keep_alive().await {
                    tracing::warn!(target: "election", lease, "keep-alive request failed: {}", e);
                    return;
                }
                let ttl = match responses.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => resp.ttl(),
                    Ok(Some(_)) => {
                        tracing::warn!(target: "election", lease, "lease expired");
                        return;
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(target: "election", lease, "keep-alive stream failed: {}", e);
                        return;
                    }
                };
                if tx.send(ttl).await.is_err() {
                    return;
                }
                // renew well before expiry
                let period = Duration::from_secs((ttl / 3).max(1) as u64);
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = tx.closed() => return,
                }
            }
        });

        Ok(rx)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<CasOutcome> {
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await?;
        if resp.succeeded() {
            return Ok(CasOutcome::Acquired);
        }

        let current = resp
            .op_responses()
            .into_iter()
            .find_map(|op| match op {
                TxnOpResponse::Get(get) => get
                    .kvs()
                    .first()
                    .map(|kv| String::from_utf8_lossy(kv.value()).into_owned()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(CasOutcome::Held(current))
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut client = self.client.clone();
        let (mut watcher, mut stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                let resp = tokio::select! {
                    msg = stream.message() => msg,
                    _ = tx.closed() => break,
                };
                let resp = match resp {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(target: "application", %prefix, "watch failed: {}", e);
                        break;
                    }
                };
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = String::from_utf8_lossy(kv.key()).into_owned();
                    let event = match event.event_type() {
                        EventType::Put => WatchEvent::Put {
                            key,
                            value: String::from_utf8_lossy(kv.value()).into_owned(),
                        },
                        EventType::Delete => WatchEvent::Delete { key },
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                if resp.canceled() {
                    break;
                }
            }
            if let Err(e) = watcher.cancel().await {
                tracing::debug!(target: "application", %prefix, "watch cancel: {}", e);
            }
        });

        Ok(rx)
    }
}
