//! Path and naming constants for configuration discovery.
//!
//! Centralizes hardcoded names so the discovery hierarchy in [`crate::config`]
//! stays readable.

/// Main configuration directory name (hidden directory like `.git`).
pub const CODEPOD_DIR_NAME: &str = ".codepod";

/// Configuration file name within [`CODEPOD_DIR_NAME`] or a project root.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default label prefix applied to every managed container when a config
/// does not override it.
pub const DEFAULT_LABEL_PREFIX: &str = "codepod";

use std::path::PathBuf;

/// Build the project-local config dir path (`<root>/.codepod`).
pub fn local_config_dir_path(project_root: &std::path::Path) -> PathBuf {
    project_root.join(CODEPOD_DIR_NAME)
}

/// Build the project-local config file path (`<root>/.codepod/config.toml`).
pub fn local_config_file_path(project_root: &std::path::Path) -> PathBuf {
    local_config_dir_path(project_root).join(CONFIG_FILE_NAME)
}

/// Build the per-user config dir path (`<home>/.codepod`).
pub fn user_config_dir_path(home_dir: &std::path::Path) -> PathBuf {
    home_dir.join(CODEPOD_DIR_NAME)
}

/// Build the per-user config file path (`<home>/.codepod/config.toml`).
pub fn user_config_file_path(home_dir: &std::path::Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// System-wide config file path (unix: `/etc/codepod/config.toml`, windows:
/// `%PROGRAMDATA%\codepod\config.toml`).
#[cfg(not(target_os = "windows"))]
pub fn system_config_file_path() -> PathBuf {
    PathBuf::from("/etc/codepod").join(CONFIG_FILE_NAME)
}

#[cfg(target_os = "windows")]
pub fn system_config_file_path() -> PathBuf {
    let program_data = std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".into());
    PathBuf::from(program_data).join("codepod").join(CONFIG_FILE_NAME)
}
