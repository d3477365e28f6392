//! Maroon node binary

use clap::{Parser, Subcommand};
use maroon::{Config, MaroonNode};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "maroon")]
#[command(about = "maroon replication node with etcd leader election")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long, env = "POD_NAME")]
        id: Option<String>,

        /// etcd endpoints (comma-separated)
        #[arg(long, env = "ETCD_ENDPOINTS", value_delimiter = ',')]
        etcd: Vec<String>,

        /// Bind address for the peer gRPC service
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Address peers use to reach this node
        #[arg(long)]
        advertise: Option<String>,

        /// Peers (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Bind address for the admin HTTP API
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Submit a timestamp operation every tick while leader
        #[arg(long)]
        generate_ops: bool,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            etcd,
            bind,
            advertise,
            peers,
            http,
            generate_ops,
            log_level,
        } => {
            // file and environment first, CLI has priority
            let mut config = Config::load(config.as_deref())?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if !etcd.is_empty() {
                config.etcd_endpoints = etcd;
            }
            if let Some(bind) = bind {
                config.p2p.bind_addr = bind;
            }
            if advertise.is_some() {
                config.p2p.advertise_addr = advertise;
            }
            if !peers.is_empty() {
                config.p2p.peers = peers;
            }
            if http.is_some() {
                config.http_addr = http;
            }
            if generate_ops {
                config.app.generate_ops = true;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            MaroonNode::new(config).serve().await?;
        }
    }

    Ok(())
}
