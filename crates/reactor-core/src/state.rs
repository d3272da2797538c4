use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a named container, as far as reactor cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Stopped,
    Running,
}

impl ContainerState {
    /// Maps an engine status string (`running`, `exited`, `created`, ...)
    /// onto the three states the orchestrator reasons about.
    ///
    /// Anything that is not running but still exists counts as stopped,
    /// including `paused` and `restarting`: such a container must be started
    /// or removed, never recreated.
    #[must_use]
    pub fn from_engine_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "" | "absent" => Self::Absent,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// A container as observed through the runtime. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
