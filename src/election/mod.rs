//! Leader election on top of the coordination store
//!
//! A node becomes leader by writing its identity under the leader key with
//! a lease, using a compare-and-set that only succeeds while the key is
//! absent. Leadership lasts as long as the lease keeps being renewed.

pub mod campaign;
pub mod leader;

pub use campaign::run_campaign_loop;
pub use leader::{LeaderElection, LeadershipLost};
