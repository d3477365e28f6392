//! Common utilities and types shared across maroon

pub mod config;
pub mod error;
pub mod keys;
pub mod shutdown;

pub use config::{AppConfig, Config, ElectionConfig, P2pConfig};
pub use error::{Error, Result};
pub use keys::{batch_key, batch_prefix, parse_batch_counter};
pub use shutdown::{stop_channel, wait_for_stop, StopReceiver, StopSender};
