//! Configuration for a maroon node
//!
//! Values come from (lowest to highest priority) built-in defaults, an
//! optional TOML file, `MAROON__*` environment variables and finally CLI
//! flags applied by the binary.

use crate::common::{Error, Result};
use crate::p2p::QuorumPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier, also written under the leader key)
    #[serde(default)]
    pub node_id: String,

    /// etcd endpoints
    #[serde(default)]
    pub etcd_endpoints: Vec<String>,

    #[serde(default)]
    pub p2p: P2pConfig,

    #[serde(default)]
    pub election: ElectionConfig,

    #[serde(default)]
    pub app: AppConfig,

    /// Bind address for the admin HTTP API (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_addr: Option<SocketAddr>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            etcd_endpoints: Vec::new(),
            p2p: P2pConfig::default(),
            election: ElectionConfig::default(),
            app: AppConfig::default(),
            http_addr: None,
            log_level: default_log_level(),
        }
    }
}

/// Peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Bind address for the peer gRPC service
    #[serde(default = "default_p2p_bind")]
    pub bind_addr: SocketAddr,

    /// Address other nodes use to reach this one (defaults to bind_addr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,

    /// Initial peer list (`host:port`), updatable at runtime
    #[serde(default)]
    pub peers: Vec<String>,

    /// Acknowledgements needed before a transaction counts as distributed
    #[serde(default)]
    pub quorum: QuorumPolicy,

    /// Upper bound on concurrent outbound AddTx calls
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

fn default_p2p_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_max_concurrent_sends() -> usize {
    64
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_p2p_bind(),
            advertise_addr: None,
            peers: Vec::new(),
            quorum: QuorumPolicy::default(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(default = "default_leader_key")]
    pub leader_key: String,

    /// Lease TTL granted by etcd
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: i64,

    /// Fixed delay between campaign attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_leader_key() -> String {
    "/maroon/leader".to_string()
}
fn default_lease_ttl() -> i64 {
    10
}
fn default_retry_delay() -> u64 {
    1000
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            leader_key: default_leader_key(),
            lease_ttl_secs: default_lease_ttl(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ElectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Application core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prefix under which batch digests are published
    #[serde(default = "default_hashes_key")]
    pub hashes_key: String,

    /// Confirmations per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Period of the housekeeping tick (pending publish retry, generator)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Submit a timestamp operation on every tick while leader
    #[serde(default)]
    pub generate_ops: bool,
}

fn default_hashes_key() -> String {
    "/maroon/hashes".to_string()
}
fn default_batch_size() -> usize {
    3
}
fn default_tick_interval() -> u64 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hashes_key: default_hashes_key(),
            batch_size: default_batch_size(),
            tick_interval_ms: default_tick_interval(),
            generate_ops: false,
        }
    }
}

impl AppConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Config {
    /// Load configuration from serde defaults, an optional TOML file and
    /// `MAROON__*` environment variables (nested with `__`, e.g.
    /// `MAROON__APP__BATCH_SIZE`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("MAROON")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("etcd_endpoints")
                    .with_list_parse_key("p2p.peers")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject configurations the node cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::InvalidConfig("node_id must not be empty".into()));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one etcd endpoint is required".into(),
            ));
        }
        if self.app.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if self.app.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if self.election.lease_ttl_secs <= 0 {
            return Err(Error::InvalidConfig(
                "lease_ttl_secs must be positive".into(),
            ));
        }
        if let QuorumPolicy::Fixed(0) = self.p2p.quorum {
            return Err(Error::InvalidConfig("quorum must be positive".into()));
        }
        // peers name us by host; without it we would count ourselves
        if !self.p2p.peers.is_empty() && self.p2p.advertise_addr.is_none() {
            return Err(Error::InvalidConfig(
                "advertise_addr is required when peers are configured".into(),
            ));
        }
        if self.p2p.max_concurrent_sends == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_sends must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        Config {
            node_id: "maroon-0".into(),
            etcd_endpoints: vec!["http://localhost:2379".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.election.leader_key, "/maroon/leader");
        assert_eq!(config.election.lease_ttl_secs, 10);
        assert_eq!(config.app.hashes_key, "/maroon/hashes");
        assert_eq!(config.app.batch_size, 3);
        assert_eq!(config.p2p.quorum, QuorumPolicy::Fixed(2));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.node_id = " ".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.etcd_endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.app.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.p2p.quorum = QuorumPolicy::Fixed(0);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.app.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peers_require_advertise_addr() {
        let mut config = valid();
        config.p2p.peers = vec!["maroon-0:8080".into(), "maroon-1:8080".into()];
        match config.validate() {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("advertise_addr")),
            other => panic!("unexpected validation result: {:?}", other),
        }

        config.p2p.advertise_addr = Some("maroon-0:8080".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "maroon-1"
etcd_endpoints = ["http://etcd-0:2379", "http://etcd-1:2379"]

[p2p]
bind_addr = "127.0.0.1:9090"
peers = ["maroon-0:8080", "maroon-2:8080"]
quorum = "majority"

[app]
batch_size = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.node_id, "maroon-1");
        assert_eq!(config.etcd_endpoints.len(), 2);
        assert_eq!(config.p2p.peers, vec!["maroon-0:8080", "maroon-2:8080"]);
        assert_eq!(config.p2p.quorum, QuorumPolicy::Majority);
        assert_eq!(config.p2p.bind_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.app.batch_size, 5);
        // untouched sections keep defaults
        assert_eq!(config.election.leader_key, "/maroon/leader");
    }
}
