//! # maroon
//!
//! An experimental leader-based replication node:
//! - Leader election through an etcd lease and a compare-and-set on the leader key
//! - gRPC peer transport that confirms a transaction once a quorum of peers has it
//! - Confirmed operations committed in batches whose digest is published to etcd
//! - Followers watch the published digests to learn the same order
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │            etcd              │
//!            │  /maroon/leader   (lease)    │
//!            │  /maroon/hashes/<n> (digest) │
//!            └──────▲───────────────┬───────┘
//!   campaign / put  │               │ watch
//!            ┌──────┴──────┐  ┌─────▼───────┐
//!            │   Leader    │  │  Follower   │
//!            │  app core   │  │  app core   │
//!            └──────┬──────┘  └─────▲───────┘
//!                   │ AddTx (gRPC)  │
//!                   └───────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! maroon serve \
//!   --id maroon-0 \
//!   --etcd http://etcd-0:2379,http://etcd-1:2379 \
//!   --bind 0.0.0.0:8080 \
//!   --advertise maroon-0.maroon:8080 \
//!   --peers maroon-1.maroon:8080,maroon-2.maroon:8080 \
//!   --http 0.0.0.0:8081
//! ```

pub mod app;
pub mod common;
pub mod election;
pub mod node;
pub mod p2p;
pub mod store;

// Re-export commonly used types
pub use app::{Application, OpType, Operation};
pub use common::{Config, Error, Result};
pub use node::MaroonNode;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("maroon.p2p.v1");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
