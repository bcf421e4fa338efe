pub mod config;
pub mod types;

pub use config::{ConfigError, SchedulerConfig, ServerConfig, SlbConfig};
pub use types::*;
