//! Outbound side of the peer transport and its lifecycle
//!
//! `distribute_tx` only enqueues. A single dispatcher drains the queue and
//! fans each transaction out to every known peer concurrently, bounded by a
//! semaphore. The transport never retries failed calls.

use crate::common::{wait_for_stop, Error, P2pConfig, Result, StopReceiver, StopSender};
use crate::p2p::{
    InboundMessage, P2pGrpcService, QuorumLatch, QuorumPolicy, Transaction, TransactionDistributed,
};
use crate::proto::p2p_service_client::P2pServiceClient;
use crate::proto::{AckBatchRequest, AddTxRequest};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 1024;

/// What the application core talks to
#[async_trait]
pub trait DistTransport: Send + Sync {
    /// Hand a transaction to the peers; never blocks
    fn distribute_tx(&self, tx: Transaction);

    /// Tell `peer` that this node holds every transaction of batch `hash`
    async fn ack_batch(&self, peer: &str, hash: &str) -> Result<bool>;
}

/// Receiving ends owned by whoever drives the node
pub struct TransportChannels {
    pub distributed: mpsc::Receiver<TransactionDistributed>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Connection churn caused by one `update_hosts` call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostsDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl HostsDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct P2pTransport {
    bind_addr: SocketAddr,
    advertise_addr: Option<String>,
    local_addr: OnceLock<SocketAddr>,
    quorum: QuorumPolicy,
    // key: host:port
    peers: RwLock<HashMap<String, P2pServiceClient<Channel>>>,
    send_permits: Arc<Semaphore>,
    outbound_tx: mpsc::UnboundedSender<Transaction>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Transaction>>>,
    distributed_tx: mpsc::Sender<TransactionDistributed>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    stop: StopSender,
}

impl P2pTransport {
    /// The returned channels are the only consumers of confirmations and
    /// inbound messages.
    pub fn new(config: &P2pConfig) -> (Arc<Self>, TransportChannels) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (distributed_tx, distributed) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop, _) = crate::common::stop_channel();

        let transport = Arc::new(Self {
            bind_addr: config.bind_addr,
            advertise_addr: config.advertise_addr.clone(),
            local_addr: OnceLock::new(),
            quorum: config.quorum,
            peers: RwLock::new(HashMap::new()),
            send_permits: Arc::new(Semaphore::new(config.max_concurrent_sends.max(1))),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            distributed_tx,
            inbound_tx,
            stop,
        });
        (
            transport,
            TransportChannels {
                distributed,
                inbound,
            },
        )
    }

    /// Identity other nodes see in `from_node`
    pub fn node_addr(&self) -> String {
        if let Some(addr) = &self.advertise_addr {
            return addr.clone();
        }
        self.local_addr
            .get()
            .copied()
            .unwrap_or(self.bind_addr)
            .to_string()
    }

    /// Open clients for new hosts, drop removed ones, leave the rest alone.
    /// Our own address is never treated as a peer.
    pub async fn update_hosts(&self, hosts: &[String]) -> HostsDiff {
        let me = self.node_addr();
        if self.advertise_addr.is_none() && !hosts.is_empty() {
            tracing::warn!(
                target: "network",
                node = %me,
                "no advertise address, peers naming this node by host are treated as remote"
            );
        }
        let wanted: HashSet<&str> = hosts
            .iter()
            .map(String::as_str)
            .filter(|host| *host != me)
            .collect();

        let mut peers = self.peers.write().await;
        let mut diff = HostsDiff::default();

        let stale: Vec<String> = peers
            .keys()
            .filter(|host| !wanted.contains(host.as_str()))
            .cloned()
            .collect();
        for host in stale {
            // the channel closes once in-flight calls release their clones
            peers.remove(&host);
            tracing::info!(target: "network", %host, "closed peer connection");
            diff.removed.push(host);
        }

        for host in hosts {
            if !wanted.contains(host.as_str()) || peers.contains_key(host) {
                continue;
            }
            match connect_lazy(host) {
                Ok(client) => {
                    tracing::info!(target: "network", %host, "added peer");
                    peers.insert(host.clone(), client);
                    diff.added.push(host.clone());
                }
                Err(e) => {
                    tracing::error!(target: "network", %host, "invalid peer address: {}", e);
                }
            }
        }

        diff
    }

    /// Currently known peers
    pub async fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.peers.read().await.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Bind the peer service and start the outbound dispatcher. Returns the
    /// bound address (useful with port 0).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let outbound = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("transport already started".into()))?;

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        tracing::info!(target: "network", %local, node = %self.node_addr(), "p2p service listening");

        let service = P2pGrpcService::new(self.inbound_tx.clone());
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let res = tonic::transport::Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    wait_for_stop(&mut stop).await
                })
                .await;
            if let Err(e) = res {
                tracing::error!(target: "network", "p2p server error: {}", e);
            }
        });

        let dispatcher = self.clone();
        let stop = self.stop.subscribe();
        tokio::spawn(async move { dispatcher.serve_outbound(outbound, stop).await });

        Ok(local)
    }

    /// Graceful stop: the server drains and the dispatcher exits at its next
    /// wait point. Calls already in flight are not interrupted.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    async fn serve_outbound(
        self: Arc<Self>,
        mut queue: mpsc::UnboundedReceiver<Transaction>,
        mut stop: StopReceiver,
    ) {
        loop {
            let tx = tokio::select! {
                tx = queue.recv() => match tx {
                    Some(tx) => tx,
                    None => break,
                },
                _ = wait_for_stop(&mut stop) => break,
            };
            self.fan_out(tx).await;
        }
        tracing::debug!(target: "network", "outbound dispatcher stopped");
    }

    async fn fan_out(&self, tx: Transaction) {
        // clone the clients so no lock is held across the calls
        let peers: Vec<(String, P2pServiceClient<Channel>)> = self
            .peers
            .read()
            .await
            .iter()
            .map(|(host, client)| (host.clone(), client.clone()))
            .collect();

        let threshold = self.quorum.threshold(peers.len());
        if peers.len() < threshold {
            tracing::warn!(
                target: "network",
                id = %tx.id,
                peers = peers.len(),
                threshold,
                "not enough peers to ever reach quorum"
            );
        }

        let latch = Arc::new(QuorumLatch::new(threshold));
        let from_node = self.node_addr();

        for (host, mut client) in peers {
            let Ok(permit) = self.send_permits.clone().acquire_owned().await else {
                return;
            };
            let latch = latch.clone();
            let distributed = self.distributed_tx.clone();
            let request = AddTxRequest {
                from_node: from_node.clone(),
                id: tx.id.clone(),
                payload: tx.tx_data.clone(),
            };

            tokio::spawn(async move {
                let _permit = permit;
                let id = request.id.clone();
                match client.add_tx(request).await {
                    Ok(resp) => {
                        tracing::debug!(
                            target: "network",
                            %host,
                            %id,
                            accepted = resp.into_inner().accepted,
                            "AddTx delivered"
                        );
                        if latch.ack() {
                            tracing::debug!(target: "network", %id, "transaction distributed");
                            if distributed.send(TransactionDistributed { id }).await.is_err() {
                                tracing::debug!(target: "network", "confirmation consumer is gone");
                            }
                        }
                    }
                    Err(status) => {
                        tracing::error!(target: "network", %host, %id, "failed to send AddTx: {}", status);
                    }
                }
            });
        }
    }
}

#[async_trait]
impl DistTransport for P2pTransport {
    fn distribute_tx(&self, tx: Transaction) {
        if let Err(e) = self.outbound_tx.send(tx) {
            tracing::warn!(target: "network", id = %e.0.id, "transport stopped, dropping transaction");
        }
    }

    async fn ack_batch(&self, peer: &str, hash: &str) -> Result<bool> {
        let client = self.peers.read().await.get(peer).cloned();
        let mut client = client.ok_or_else(|| Error::UnknownPeer(peer.to_string()))?;
        let resp = client
            .ack_batch(AckBatchRequest {
                from_node: self.node_addr(),
                hash: hash.to_string(),
            })
            .await?;
        Ok(resp.into_inner().accepted)
    }
}

fn connect_lazy(host: &str) -> Result<P2pServiceClient<Channel>> {
    let uri = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    let channel = Endpoint::from_shared(uri)?
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(RPC_TIMEOUT)
        .connect_lazy();
    Ok(P2pServiceClient::new(channel))
}
