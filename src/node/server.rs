//! Maroon node server

use crate::app::{AppEvents, Application};
use crate::common::{batch_prefix, stop_channel, wait_for_stop, Config, Result, StopSender};
use crate::election::{run_campaign_loop, LeaderElection};
use crate::node::http::{create_router, NodeState};
use crate::p2p::P2pTransport;
use crate::store::{CoordinationStore, EtcdStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct MaroonNode {
    config: Config,
}

/// A running node. Dropping it does not stop anything; call
/// [`NodeHandle::shutdown`].
pub struct NodeHandle {
    pub app: Arc<Application>,
    pub transport: Arc<P2pTransport>,
    pub election: Arc<LeaderElection>,
    pub p2p_addr: SocketAddr,
    pub http_addr: Option<SocketAddr>,
    stop: StopSender,
    tasks: Vec<JoinHandle<()>>,
}

impl MaroonNode {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Connect to etcd and run until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let store = EtcdStore::connect(&self.config.etcd_endpoints).await?;
        let handle = self.start(Arc::new(store)).await?;

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown requested");
        handle.shutdown().await;
        Ok(())
    }

    /// Start every component against `store` and return immediately
    pub async fn start(self, store: Arc<dyn CoordinationStore>) -> Result<NodeHandle> {
        let config = self.config;
        tracing::info!("Starting maroon node: {}", config.node_id);
        tracing::info!("  etcd: {}", config.etcd_endpoints.join(","));
        tracing::info!("  p2p: {}", config.p2p.bind_addr);
        tracing::info!("  peers: {}", config.p2p.peers.join(","));
        tracing::info!("  batch size: {}", config.app.batch_size);

        let (stop, stop_rx) = stop_channel();
        let mut tasks = Vec::new();

        let (transport, channels) = P2pTransport::new(&config.p2p);
        let p2p_addr = transport.start().await?;
        transport.update_hosts(&config.p2p.peers).await;

        let watch = match store
            .watch_prefix(&batch_prefix(&config.app.hashes_key))
            .await
        {
            Ok(watch) => Some(watch),
            Err(e) => {
                tracing::error!("failed to watch published batches: {}", e);
                None
            }
        };

        let app = Arc::new(Application::new(
            store.clone(),
            transport.clone(),
            config.app.clone(),
        ));
        let (leader_tx, leader_rx) = mpsc::channel(8);
        let events = AppEvents {
            stop: stop_rx.clone(),
            leadership: leader_rx,
            distributed: channels.distributed,
            inbound: channels.inbound,
            watch,
        };
        let runner = app.clone();
        tasks.push(tokio::spawn(async move { runner.run(events).await }));

        let election = Arc::new(LeaderElection::new(
            store,
            config.election.leader_key.clone(),
            config.node_id.clone(),
            config.election.lease_ttl_secs,
        ));
        tasks.push(tokio::spawn(run_campaign_loop(
            election.clone(),
            leader_tx,
            stop_rx.clone(),
            config.election.retry_delay(),
        )));

        let mut http_addr = None;
        if let Some(addr) = config.http_addr {
            let router = create_router(NodeState {
                node_id: config.node_id.clone(),
                app: app.clone(),
                transport: transport.clone(),
                election: election.clone(),
            });
            let listener = tokio::net::TcpListener::bind(addr).await?;
            http_addr = Some(listener.local_addr()?);
            let mut stop = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                let res = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { wait_for_stop(&mut stop).await })
                    .await;
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }));
        }

        tracing::info!("✓ Node ready (p2p {})", p2p_addr);

        Ok(NodeHandle {
            app,
            transport,
            election,
            p2p_addr,
            http_addr,
            stop,
            tasks,
        })
    }
}

impl NodeHandle {
    /// Stop every loop, resign leadership and wait for the tasks
    pub async fn shutdown(self) {
        self.stop.send_replace(true);
        self.transport.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("node task failed: {}", e);
            }
        }
        tracing::info!("Node stopped");
    }
}
