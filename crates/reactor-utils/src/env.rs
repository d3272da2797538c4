//! Environment variable and path utilities.
//!
//! These are the only places reactor reads its own environment variables.
//! Values are read once at the edge and passed down explicitly.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Prepended to every container name when set.
pub const ISOLATION_PREFIX_VAR: &str = "REACTOR_ISOLATION_PREFIX";
/// Overrides the configured default account.
pub const ACCOUNT_VAR: &str = "REACTOR_ACCOUNT";
/// `tracing` filter directive for the CLI.
pub const LOG_VAR: &str = "REACTOR_LOG";

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Returns the isolation prefix from `REACTOR_ISOLATION_PREFIX`, if set and
/// non-blank.
pub fn isolation_prefix() -> Option<String> {
    non_empty_var(ISOLATION_PREFIX_VAR)
}

/// Returns the account override from `REACTOR_ACCOUNT`, if set and non-blank.
pub fn account_override() -> Option<String> {
    non_empty_var(ACCOUNT_VAR)
}

/// Returns the XDG config directory for reactor.
///
/// Defaults to `~/.config/reactor` on Linux.
pub fn get_xdg_config_home() -> PathBuf {
    ProjectDirs::from("dev", "reactor", "reactor").map_or_else(
        || PathBuf::from(".reactor"),
        |proj_dirs| proj_dirs.config_dir().to_path_buf(),
    )
}

/// Path of the user settings file.
pub fn settings_path() -> PathBuf {
    get_xdg_config_home().join("config.toml")
}
