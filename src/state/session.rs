use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};

/// Terminal lifecycle position for a session row. Destroyed rows are
/// retained for audit but filtered out of every list/get/count query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Destroyed,
}

/// Per-container network isolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    None,
    Bridge,
    Host,
}

impl NetworkMode {
    /// The engine-facing network mode string bollard's `HostConfig` expects.
    pub fn as_engine_str(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
        }
    }
}

/// Resource ceiling applied to a container. Stored as an embedded JSON blob
/// per session and echoed back into container labels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpu_cores: f64,
    pub max_processes: u32,
}

impl ResourceLimits {
    /// Nano-CPUs as the engine expects (`cores * 1e9`).
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_cores * 1_000_000_000.0).round() as i64
    }

    /// All fields positive, and each field no greater than the
    /// corresponding field of `max`.
    pub fn validate(&self, max: &ResourceLimits) -> Result<()> {
        if self.memory_bytes == 0 || self.cpu_cores <= 0.0 || self.max_processes == 0 {
            return Err(CoreError::InvalidArgument(
                "resource limits must be positive".into(),
            ));
        }
        if self.memory_bytes > max.memory_bytes
            || self.cpu_cores > max.cpu_cores
            || self.max_processes > max.max_processes
        {
            return Err(CoreError::InvalidArgument(format!(
                "resource limits {:?} exceed configured maximum {:?}",
                self, max
            )));
        }
        Ok(())
    }

    /// Whether this matches the pool's default limits exactly — required
    /// for an Idle container to be reused by `Acquire` (§4.2 Eligibility).
    pub fn exactly_matches(&self, other: &ResourceLimits) -> bool {
        self.memory_bytes == other.memory_bytes
            && self.cpu_cores == other.cpu_cores
            && self.max_processes == other.max_processes
    }
}

/// A session row, keyed by a monotonic integer id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub timeout_seconds: Option<u64>,
    pub resource_limits: ResourceLimits,
    pub network_mode: NetworkMode,
    /// Non-null while Active; cleared on destroy.
    pub container_id: Option<String>,
    pub command_count: u64,
    /// Latches while a command is in flight; excludes the session from the
    /// idle sweep.
    pub is_executing_command: bool,
}

impl SessionRecord {
    pub fn default_name(id: u64) -> String {
        format!("Session-{id}")
    }

    pub fn bump_activity(&mut self) {
        let now = Utc::now();
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Effective timeout for the sweeper: per-session override, else the
    /// system default.
    pub fn effective_timeout(&self, system_default_secs: u64) -> u64 {
        self.timeout_seconds.unwrap_or(system_default_secs)
    }
}
