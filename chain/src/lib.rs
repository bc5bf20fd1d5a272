pub mod builder;
pub mod config;
pub mod memory;
pub mod provider;

pub use builder::ChainBuilder;
pub use config::{ChainConfig, DEVNET_CONFIG};
pub use memory::Chain;
pub use provider::{ChainState, ImportQueue, ImportResult};
