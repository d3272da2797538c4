//! Container engine clients.
//!
//! [`DockerRuntime`] talks to a real engine over bollard. [`MemoryRuntime`]
//! is an in-process fake with the same observable behavior, used by tests
//! and by anything that needs to exercise orchestration without an engine.

pub mod docker;
pub mod memory;

pub use docker::DockerRuntime;
pub use memory::{MemoryRuntime, Op, RuntimeCall};

use reactor_core::RuntimeError;
use std::future::Future;
use std::time::Duration;

/// Bounds a runtime call. An elapsed deadline becomes
/// [`RuntimeError::Timeout`]; the call itself is dropped.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    after: Duration,
    call: F,
) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout { operation, after }),
    }
}
