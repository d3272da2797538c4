use crate::blueprint::ContainerBlueprint;
use crate::state::ContainerInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failures reported by a container engine client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The engine could not be reached at all (socket missing, daemon down).
    #[error("container engine is unreachable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The engine rejected the call because of existing state (e.g. a name
    /// already in use).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("{operation} failed: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },
}

impl RuntimeError {
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Captured result of a non-interactive command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The capabilities reactor needs from a container engine.
///
/// Implementations hold no state beyond a connection handle; everything
/// they report comes from the engine. Callers bound every call with a
/// deadline, so implementations may block for as long as the engine does.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Fails fast when the engine is unreachable.
    async fn health(&self) -> Result<(), RuntimeError>;

    /// Creates (but does not start) a container. Returns its id.
    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Looks a container up by exact name. `Ok(None)` when it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    /// Every container (running or not) carrying `key=value`.
    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container exits and returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Runs a command inside a running container and captures its output.
    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput, RuntimeError>;
}
