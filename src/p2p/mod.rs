//! Peer-to-peer transport
//!
//! The leader hands every transaction to all known peers over gRPC and
//! reports it as distributed once a quorum of them acknowledged receipt.
//! Followers surface what they receive on a single tagged inbound channel.

pub mod grpc;
pub mod quorum;
pub mod transport;
pub mod types;

pub use grpc::P2pGrpcService;
pub use quorum::{QuorumLatch, QuorumPolicy};
pub use transport::{DistTransport, HostsDiff, P2pTransport, TransportChannels};
pub use types::{InboundMessage, Transaction, TransactionDistributed};
