//! Node bootstrap: wires store, election, transport and application core
//!
//! Startup order: join the mesh (start the peer service, apply the
//! initial peer list), subscribe to published batches, start the
//! application loop, then campaign.

pub mod http;
pub mod server;

pub use http::{create_router, NodeState};
pub use server::{MaroonNode, NodeHandle};
