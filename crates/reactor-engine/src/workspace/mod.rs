//! Multi-service workspaces: locate the file, resolve each service, and fan
//! one operation out across all of them.

mod engine;
mod loader;
mod report;

pub use engine::{ServiceStatus, WorkspaceEngine};
pub use loader::{load, locate};
pub use report::{ServiceFailure, WorkspaceReport};

use crate::error::ReactorError;
use reactor_core::ResolvedConfig;
use reactor_core::identity::project_hash;
use std::path::Path;

/// Container-mount point of each service directory.
pub const SERVICE_MOUNT_TARGET: &str = "/workspace";

/// Turns a service directory into the configuration its container is built
/// from.
pub trait ConfigResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, service_dir: &Path, account: &str) -> Result<ResolvedConfig, ReactorError>;
}

/// Resolves every service to the same image, named and hashed by its
/// directory.
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    image: String,
}

impl DefaultResolver {
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl ConfigResolver for DefaultResolver {
    fn resolve(&self, service_dir: &Path, account: &str) -> Result<ResolvedConfig, ReactorError> {
        Ok(ResolvedConfig {
            account: account.to_string(),
            project_root: service_dir.to_path_buf(),
            project_hash: project_hash(service_dir),
            image: self.image.clone(),
        })
    }
}
