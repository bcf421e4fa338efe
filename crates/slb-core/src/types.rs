//! Shared types used across SLB crates.
//!
//! Two groups live here: the domain model owned by the dispatcher
//! (`Server`, `UserPolicy`, `Category`, `Priority`) and the input/output
//! shapes exchanged with collaborators (`SlbRequest`, `HealthReport`,
//! `PolicyUpdate`, `ClusterConfig`, `PolicyReply`). Input shapes use
//! camelCase field names on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest admission priority. Priorities run from 0 (lowest) to 9 (highest).
pub const MAX_PRIORITY: u8 = 9;

/// Number of distinct priority levels.
pub const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

/// CPU utilisation (percent) above which a server stops receiving work.
pub const DEFAULT_OVERLOAD_CPU_THRESHOLD: u32 = 90;

// ── Category ───────────────────────────────────────────────────────

/// A backend's functional class and the partitioning key for selection
/// queues. Always stored upper-cased, so `"gpu"` and `"GPU"` are the same
/// category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_uppercase())
    }

    pub fn cpu() -> Self {
        Self("CPU".to_string())
    }

    pub fn gpu() -> Self {
        Self("GPU".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Priority ───────────────────────────────────────────────────────

/// Raised when a priority outside 0–9 is supplied where clamping is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("priority {0} is outside 0-9")]
pub struct InvalidPriority(pub i64);

/// Admission priority, 0 (lowest) to 9 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const HIGHEST: Priority = Priority(MAX_PRIORITY);

    /// Checked constructor.
    pub fn new(value: i64) -> Result<Self, InvalidPriority> {
        if (0..=MAX_PRIORITY as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(InvalidPriority(value))
        }
    }

    /// Clamp any integer into the valid range.
    pub fn saturating(value: i64) -> Self {
        Self(value.clamp(0, MAX_PRIORITY as i64) as u8)
    }

    /// Index into a `[_; PRIORITY_LEVELS]` array.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i64 {
    fn from(value: Priority) -> Self {
        value.0 as i64
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Servers ────────────────────────────────────────────────────────

/// Runtime health of a backend, as last reported by the health checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHealth {
    pub down: bool,
    /// CPU utilisation, percent.
    pub cpu_util: u32,
    pub io_wait: u32,
    /// Memory utilisation, percent.
    pub mem_util: u32,
    pub mem_total_bytes: u64,
}

impl ServerHealth {
    /// Health of a freshly registered server: down until the first report.
    pub fn pending() -> Self {
        Self {
            down: true,
            cpu_util: 0,
            io_wait: 0,
            mem_util: 0,
            mem_total_bytes: 0,
        }
    }

    pub fn healthy() -> Self {
        Self {
            down: false,
            ..Self::pending()
        }
    }

    /// A server is eligible for selection when it is up and not overloaded.
    pub fn is_eligible(&self, cpu_threshold: u32) -> bool {
        !self.down && self.cpu_util <= cpu_threshold
    }
}

/// A backend the dispatcher can route requests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Unique registry key.
    pub ip: String,
    pub port: u16,
    pub weight: u32,
    pub category: Category,
    pub health: ServerHealth,
}

impl Server {
    /// `ip:port` string handed to the redirect or proxy layer.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

// ── Policies ───────────────────────────────────────────────────────

/// Sticky per-user assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPolicy {
    pub user_id: String,
    /// Default priority for this user's requests.
    pub priority: Priority,
    /// Backend every request from this user is pinned to, if any.
    pub pinned_ip: Option<String>,
}

/// Outcome code carried by a policy reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetCode {
    Success,
    Fail,
}

/// Reply to a policy update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReply {
    pub ret_code: RetCode,
    pub message: String,
}

impl PolicyReply {
    pub fn success() -> Self {
        Self {
            ret_code: RetCode::Success,
            message: "success".to_string(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ret_code: RetCode::Fail,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.ret_code == RetCode::Success
    }
}

// ── Collaborator inputs ────────────────────────────────────────────

/// How the caller wants the selection used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReqMode {
    /// Return the chosen `ip:port` to the caller (redirect).
    #[default]
    SelectServer,
    /// Hand the chosen `ip:port` to the work executor with the request.
    DoWork,
}

/// One admission request as received at ingress.
///
/// Every field is optional on the wire: an empty body selects a CPU server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlbRequest {
    pub user_id: Option<String>,
    pub session_id: String,
    pub task_type: String,
    pub mode: ReqMode,
    pub priority: Option<i64>,
}

impl SlbRequest {
    /// Task category, defaulting to CPU when no task type was given.
    pub fn category(&self) -> Category {
        if self.task_type.trim().is_empty() {
            Category::cpu()
        } else {
            Category::new(&self.task_type)
        }
    }

    /// The requesting user, if any, with surrounding whitespace removed the
    /// same way policy ids are. Blank ids count as anonymous.
    pub fn user(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// A health report for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ip: String,
    #[serde(default)]
    pub cpu_util: u32,
    #[serde(default)]
    pub io_wait: u32,
    #[serde(default)]
    pub mem_util: u32,
    #[serde(default)]
    pub mem_total_bytes: u64,
    #[serde(default)]
    pub down: bool,
}

impl HealthReport {
    pub fn health(&self) -> ServerHealth {
        ServerHealth {
            down: self.down,
            cpu_util: self.cpu_util,
            io_wait: self.io_wait,
            mem_util: self.mem_util,
            mem_total_bytes: self.mem_total_bytes,
        }
    }
}

/// A policy upsert as received at ingress. An empty `pinned_ip` means the
/// policy only carries a priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyUpdate {
    pub user_id: String,
    pub priority: i64,
    pub pinned_ip: String,
}

/// Backend list pushed by the configuration pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    pub global: GlobalSettings,
    pub backends: Vec<BackendSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    /// Global timeout in seconds, as configured upstream.
    pub timeout: u64,
    pub status_listen_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSpec {
    pub name: String,
    pub host: String,
    pub healthcheck_port: u16,
    pub server_port: u16,
    pub category: String,
    pub weight: u32,
    pub heartbeat_interval_sec: u32,
    pub retry_count: u32,
}

/// What a config update changed in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}
