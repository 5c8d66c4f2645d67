pub mod cli;
pub mod config;
pub mod console;
pub mod runtime;
pub mod setup;

pub use config::{ElectionConfig, NodeConfig};
pub use runtime::NodeRuntime;
