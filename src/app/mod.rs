//! Application core
//!
//! Owns the life of every operation: in flight on the leader until a quorum
//! of peers has it, acknowledged, then committed in batches whose digest is
//! published to the coordination store. Followers learn the same order by
//! watching those digests.

pub mod application;
pub mod ledger;
pub mod operation;

pub use application::{AppEvents, Application};
pub use ledger::LedgerSnapshot;
pub use operation::{batch_digest, content_hash, split_digest, OpType, Operation};
