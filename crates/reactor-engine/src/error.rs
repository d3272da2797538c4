use reactor_core::{RuntimeError, WorkspaceError};
use std::path::PathBuf;

/// Errors surfaced by the orchestration layer.
///
/// Runtime failures are wrapped with the operation and target they hit, so
/// a rendered chain reads like `failed to stop reactor-a-api-1234: ...`.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error(
        "cannot reach the container engine ({0}). Is Docker running? Check `docker info` and DOCKER_HOST."
    )]
    EngineUnavailable(String),

    #[error("failed to {operation} {target}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: RuntimeError,
    },

    /// An existing container refused to start. It is left in place; it is
    /// never silently replaced.
    #[error("container {name} exists but failed to start (run `reactor down` to recreate it)")]
    RestartFailed {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("container {name} is not running")]
    NotRunning { name: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("invalid settings file {}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReactorError {
    /// Wraps a runtime failure. An unreachable engine always becomes
    /// [`ReactorError::EngineUnavailable`] regardless of the operation.
    pub fn runtime(operation: &'static str, target: impl Into<String>, source: RuntimeError) -> Self {
        match source {
            RuntimeError::Unavailable(reason) => Self::EngineUnavailable(reason),
            source => Self::Operation {
                operation,
                target: target.into(),
                source,
            },
        }
    }

    #[must_use]
    pub const fn is_engine_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_))
    }
}

/// Renders an error and its whole source chain on one line.
#[must_use]
pub fn render_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unavailable_is_lifted() {
        let err = ReactorError::runtime(
            "create",
            "reactor-a-b-c",
            RuntimeError::Unavailable("socket missing".into()),
        );
        assert!(err.is_engine_unavailable());
        assert!(err.to_string().contains("socket missing"));
    }

    #[test]
    fn test_chain_includes_cause() {
        let err = ReactorError::runtime(
            "stop",
            "reactor-a-b-c",
            RuntimeError::Timeout {
                operation: "stop",
                after: Duration::from_secs(30),
            },
        );
        assert_eq!(
            render_chain(&err),
            "failed to stop reactor-a-b-c: stop timed out after 30s"
        );
    }
}
