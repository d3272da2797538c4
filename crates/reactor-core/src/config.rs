use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Image used when neither the project nor the settings name one.
pub const DEFAULT_IMAGE: &str = "ghcr.io/reactor-dev/reactor-base:latest";

/// Image used for the privileged cleanup helper.
pub const DEFAULT_HELPER_IMAGE: &str = "busybox:1.36";

/// Account used when nothing else is configured.
pub const DEFAULT_ACCOUNT: &str = "default";

/// The project configuration after the container-definition file has been
/// parsed and merged. Produced outside this crate; immutable per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Account the container belongs to.
    pub account: String,
    /// Absolute path of the project on the host.
    pub project_root: PathBuf,
    /// Short, stable hash of the project path.
    pub project_hash: String,
    /// Fully resolved image reference.
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    #[default]
    Bind,
}

/// A single host → container mount.
///
/// Mounts are kept in caller order. Two mounts with the same target are a
/// caller error; nothing here deduplicates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: String,
    #[serde(default)]
    pub kind: MountKind,
    #[serde(default)]
    pub read_only: bool,
}

impl MountSpec {
    #[must_use]
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: MountKind::Bind,
            read_only: false,
        }
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Renders the mount in the engine's `SRC:DST[:ro]` bind syntax.
    #[must_use]
    pub fn to_bind_string(&self) -> String {
        let mut bind = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

impl FromStr for MountSpec {
    type Err = ParseIntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(source), Some(target)) = (parts.next(), parts.next()) else {
            return Err(ParseIntentError::Mount(s.to_string()));
        };
        if source.is_empty() || !target.starts_with('/') {
            return Err(ParseIntentError::Mount(s.to_string()));
        }
        let mount = Self::bind(source, target);
        match parts.next() {
            None => Ok(mount),
            Some("ro") if parts.next().is_none() => Ok(mount.read_only()),
            Some(_) => Err(ParseIntentError::Mount(s.to_string())),
        }
    }
}

/// A published port. Pairs are positional; ranges are not expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    #[must_use]
    pub const fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

impl FromStr for PortMapping {
    type Err = ParseIntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, container) = s
            .split_once(':')
            .ok_or_else(|| ParseIntentError::Port(s.to_string()))?;
        let host = host
            .parse()
            .map_err(|_| ParseIntentError::Port(s.to_string()))?;
        let container = container
            .parse()
            .map_err(|_| ParseIntentError::Port(s.to_string()))?;
        Ok(Self { host, container })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseIntentError {
    #[error("invalid port mapping `{0}`: expected HOST:CONTAINER")]
    Port(String),
    #[error("invalid mount `{0}`: expected SRC:/absolute/target[:ro]")]
    Mount(String),
}

/// User-level settings, read from `config.toml`.
///
/// # Example
/// ```toml
/// account = "alice"
/// max_parallel = 4
///
/// [timeouts]
/// operation_secs = 45
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Default account for container identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Image used when a project does not name one.
    #[serde(default = "default_image")]
    pub default_image: String,
    /// Image for the cleanup helper container.
    #[serde(default = "default_helper_image")]
    pub helper_image: String,
    /// Prefix prepended to every container name (test isolation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_prefix: Option<String>,
    /// Upper bound on concurrent service operations in a workspace command.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account: None,
            default_image: default_image(),
            helper_image: default_helper_image(),
            isolation_prefix: None,
            max_parallel: default_max_parallel(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Settings {
    /// The account to use when a command does not name one.
    #[must_use]
    pub fn effective_account(&self) -> &str {
        self.account.as_deref().unwrap_or(DEFAULT_ACCOUNT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Deadline for single-container engine calls.
    #[serde(default = "default_operation_secs")]
    pub operation_secs: u64,
    /// Deadline for image pulls.
    #[serde(default = "default_pull_secs")]
    pub pull_secs: u64,
    /// Deadline for bulk cleanup scans and helper runs.
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation_secs: default_operation_secs(),
            pull_secs: default_pull_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn operation(&self) -> Duration {
        Duration::from_secs(self.operation_secs)
    }

    #[must_use]
    pub const fn pull(&self) -> Duration {
        Duration::from_secs(self.pull_secs)
    }

    #[must_use]
    pub const fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_helper_image() -> String {
    DEFAULT_HELPER_IMAGE.to_string()
}

const fn default_max_parallel() -> usize {
    8
}

const fn default_operation_secs() -> u64 {
    30
}

const fn default_pull_secs() -> u64 {
    300
}

const fn default_cleanup_secs() -> u64 {
    120
}
