use crate::error::ReactorError;
use reactor_core::Workspace;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves `start` to a workspace file: a file is taken as-is, a directory
/// is searched for `reactor-workspace.yml` then `reactor-workspace.yaml`.
#[must_use]
pub fn locate(start: &Path) -> Option<PathBuf> {
    if start.is_file() {
        return Some(start.to_path_buf());
    }
    Workspace::discover(start)
}

/// Loads and validates the workspace at or in `start`.
///
/// Returns `Ok(None)` when there is no workspace file; a workspace file that
/// exists but is invalid is an error.
pub async fn load(start: &Path) -> Result<Option<Workspace>, ReactorError> {
    let Some(file) = locate(start) else {
        debug!("No workspace file under {}", start.display());
        return Ok(None);
    };

    let contents = tokio::fs::read_to_string(&file)
        .await
        .map_err(|source| ReactorError::Io {
            path: file.clone(),
            source,
        })?;
    let workspace = Workspace::parse(&contents, &file)?;
    debug!(
        "Loaded workspace {} with {} service(s)",
        workspace.file.display(),
        workspace.services.len()
    );
    Ok(Some(workspace))
}
