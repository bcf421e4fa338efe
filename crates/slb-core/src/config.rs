//! slb.toml configuration parser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Category, DEFAULT_OVERLOAD_CPU_THRESHOLD, MAX_PRIORITY, Priority};

/// Problems found by [`SlbConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one task category must be configured")]
    NoCategories,

    #[error("batch_limit must be at least 1")]
    ZeroBatchLimit,

    #[error("tick_ms must be at least 1")]
    ZeroTick,

    #[error("channel_capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("default_priority {0} is outside 0-9")]
    DefaultPriority(u8),

    #[error("overload_cpu_threshold {0} is above 100")]
    CpuThreshold(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlbConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP ingress listens on.
    pub listen: SocketAddr,
    /// Directory holding the policy database.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("/var/lib/slb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Task categories that get a dispatch queue. Fixed at start-up.
    pub categories: Vec<String>,
    /// Worker tick for the priority and category queues.
    pub tick_ms: u64,
    /// Maximum tasks a worker moves per tick.
    pub batch_limit: usize,
    /// Capacity of each dispatcher input channel.
    pub channel_capacity: usize,
    pub request_timeout_secs: u64,
    pub policy_timeout_secs: u64,
    /// Priority for requests that carry none and have no user policy.
    pub default_priority: u8,
    pub overload_cpu_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            categories: vec!["CPU".to_string(), "GPU".to_string()],
            tick_ms: 10,
            batch_limit: 1024,
            channel_capacity: 1024,
            request_timeout_secs: 10,
            policy_timeout_secs: 5,
            default_priority: 0,
            overload_cpu_threshold: DEFAULT_OVERLOAD_CPU_THRESHOLD,
        }
    }
}

impl SchedulerConfig {
    /// Configured categories, upper-cased and de-duplicated, in file order.
    pub fn categories(&self) -> Vec<Category> {
        let mut out: Vec<Category> = Vec::with_capacity(self.categories.len());
        for name in &self.categories {
            let category = Category::new(name);
            if !category.is_empty() && !out.contains(&category) {
                out.push(category);
            }
        }
        out
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy_timeout_secs)
    }

    pub fn default_priority(&self) -> Priority {
        Priority::saturating(self.default_priority as i64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories().is_empty() {
            return Err(ConfigError::NoCategories);
        }
        if self.batch_limit == 0 {
            return Err(ConfigError::ZeroBatchLimit);
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.default_priority > MAX_PRIORITY {
            return Err(ConfigError::DefaultPriority(self.default_priority));
        }
        if self.overload_cpu_threshold > 100 {
            return Err(ConfigError::CpuThreshold(self.overload_cpu_threshold));
        }
        Ok(())
    }
}

impl SlbConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SlbConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SlbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.tick(), Duration::from_millis(10));
        assert_eq!(config.scheduler.batch_limit, 1024);
        assert_eq!(config.scheduler.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.scheduler.policy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:9000"
"#;
        let config: SlbConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn categories_are_normalised() {
        let toml_str = r#"
[scheduler]
categories = ["cpu", "GPU", "gpu", "fpga"]
"#;
        let config: SlbConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.scheduler.categories(),
            vec![Category::cpu(), Category::gpu(), Category::new("FPGA")]
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = SlbConfig::default();
        config.scheduler.categories.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoCategories));

        let mut config = SlbConfig::default();
        config.scheduler.batch_limit = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchLimit));

        let mut config = SlbConfig::default();
        config.scheduler.default_priority = 10;
        assert_eq!(config.validate(), Err(ConfigError::DefaultPriority(10)));

        let mut config = SlbConfig::default();
        config.scheduler.overload_cpu_threshold = 101;
        assert_eq!(config.validate(), Err(ConfigError::CpuThreshold(101)));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = SlbConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("batch_limit"));
        let parsed: SlbConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
