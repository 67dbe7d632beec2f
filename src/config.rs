//! Configuration loading and discovery.
//!
//! Discovery hierarchy:
//! 1. Current directory: `./codepod.toml` or `./.codepod/config.toml`
//! 2. User config: `~/.codepod/config.toml`
//! 3. System config: `/etc/codepod/config.toml` (or `%PROGRAMDATA%` on Windows)
//! 4. Built-in defaults

use crate::env;
use crate::error::{CoreError, Result};
use crate::state::{NetworkMode, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Truncation strategy recognized by the Output Truncator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    Head,
    Tail,
    HeadAndTail,
}

/// Output-truncation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    pub max_output_bytes: usize,
    pub strategy: TruncationStrategy,
    /// Must contain the literal placeholder `{0}` for the omitted byte count.
    pub truncation_message: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            max_output_bytes: 1_048_576,
            strategy: TruncationStrategy::HeadAndTail,
            truncation_message: "\n...[{0} bytes truncated]...\n".to_string(),
        }
    }
}

impl OutputOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_output_bytes == 0 {
            return Err(CoreError::InvalidArgument(
                "output_options.max_output_bytes must be > 0".into(),
            ));
        }
        if !self.truncation_message.contains("{0}") {
            return Err(CoreError::InvalidArgument(
                "output_options.truncation_message must contain \"{0}\"".into(),
            ));
        }
        Ok(())
    }
}

/// Every recognized configuration option (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub image: String,
    pub workdir: String,
    pub label_prefix: String,
    pub prewarm_count: u32,
    pub max_containers: u32,
    pub session_timeout_seconds: u64,
    pub default_resource_limits: ResourceLimits,
    pub max_resource_limits: ResourceLimits,
    pub default_network_mode: NetworkMode,
    pub output_options: OutputOptions,
    pub windows_container: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            image: "alpine:latest".to_string(),
            workdir: "/workspace".to_string(),
            label_prefix: env::DEFAULT_LABEL_PREFIX.to_string(),
            prewarm_count: 1,
            max_containers: 10,
            session_timeout_seconds: 1800,
            default_resource_limits: ResourceLimits {
                memory_bytes: 512 * 1024 * 1024,
                cpu_cores: 1.0,
                max_processes: 128,
            },
            max_resource_limits: ResourceLimits {
                memory_bytes: 4 * 1024 * 1024 * 1024,
                cpu_cores: 4.0,
                max_processes: 1024,
            },
            default_network_mode: NetworkMode::None,
            output_options: OutputOptions::default(),
            windows_container: false,
        }
    }
}

impl CoreConfig {
    /// Derived long-running no-op command that keeps a pool container alive
    /// once started (platform-specific per §4.1).
    pub fn keepalive_cmd(&self) -> Vec<String> {
        if self.windows_container {
            vec![
                "powershell".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                "while ($true) { Start-Sleep -Seconds 3600 }".to_string(),
            ]
        } else {
            vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_containers == 0 {
            return Err(CoreError::InvalidArgument(
                "max_containers must be >= 1".into(),
            ));
        }
        if self.session_timeout_seconds == 0 {
            return Err(CoreError::InvalidArgument(
                "session_timeout_seconds must be > 0".into(),
            ));
        }
        self.default_resource_limits
            .validate(&self.max_resource_limits)?;
        self.output_options.validate()?;
        Ok(())
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoreConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Configuration discovery over the hierarchy documented at module level.
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy, falling back to
    /// built-in defaults when nothing is found.
    pub fn discover_config() -> anyhow::Result<CoreConfig> {
        if let Some(path) = Self::find_config_file() {
            info!("loading configuration from {:?}", path);
            return CoreConfig::from_toml_file(path);
        }
        info!("no configuration file found, using defaults");
        Ok(CoreConfig::default())
    }

    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("checking for config file: {:?}", candidate);
            if candidate.exists() && candidate.is_file() {
                debug!("found config file: {:?}", candidate);
                return Some(candidate);
            }
        }
        None
    }

    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join("codepod.toml"));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates.push(env::system_config_file_path());

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }
}
