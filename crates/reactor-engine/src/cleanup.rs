//! Forced removal of container-owned state on the host.
//!
//! Containers routinely leave files owned by another uid in bind-mounted
//! directories, which the invoking user then cannot delete. [`CleanupGuard`]
//! removes such trees, falling back to a disposable root helper container
//! that empties the directory from inside. Nothing is removed unless the
//! target passes [`CleanupGuard::check`].

use crate::runtime::with_deadline;
use reactor_core::identity::{project_hash, sanitize_folder};
use reactor_core::{
    ContainerBlueprint, ContainerRuntime, MountSpec, NameScheme, RuntimeError, Timeouts, labels,
};
use reactor_utils::fs::{canonical_temp_dir, has_segment, is_strictly_within};
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the helper container sees the target directory.
pub const HELPER_MOUNT_TARGET: &str = "/reactor-cleanup";

/// A target that must never be removed.
#[derive(Debug, thiserror::Error)]
pub enum SafetyViolation {
    #[error("refusing to remove {}: path is not absolute", .0.display())]
    NotAbsolute(PathBuf),
    #[error("refusing to remove {}: not strictly inside the temp directory {}", .path.display(), .temp_root.display())]
    OutsideTemp { path: PathBuf, temp_root: PathBuf },
    #[error("refusing to remove {}: no path segment equals scope `{scope}`", .path.display())]
    MissingScope { path: PathBuf, scope: String },
    #[error("refusing to remove anything: cleanup scope is empty")]
    EmptyScope,
    #[error("refusing to remove {}: cannot resolve it", .path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    #[error("failed to remove {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cleanup helper for {} failed", .path.display())]
    Helper {
        path: PathBuf,
        #[source]
        source: RuntimeError,
    },
    #[error("cleanup helper for {} exited with status {code}", .path.display())]
    HelperExit { path: PathBuf, code: i64 },
    #[error("failed to reclaim containers of scope `{scope}`")]
    Reclaim {
        scope: String,
        #[source]
        source: RuntimeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The target did not exist.
    AlreadyGone,
    Removed,
    /// Removed after a helper container emptied it.
    RemovedWithHelper,
}

type Remover = Arc<dyn Fn(&Path) -> io::Result<()> + Send + Sync>;

/// Removes scoped temporary state, escalating through a helper container
/// when the host user lacks permission.
pub struct CleanupGuard {
    runtime: Arc<dyn ContainerRuntime>,
    scope: String,
    helper_image: String,
    scheme: NameScheme,
    timeouts: Timeouts,
    temp_root: Option<PathBuf>,
    remover: Remover,
}

impl std::fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("scope", &self.scope)
            .field("helper_image", &self.helper_image)
            .field("scheme", &self.scheme)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl CleanupGuard {
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        scope: impl Into<String>,
        helper_image: impl Into<String>,
        scheme: NameScheme,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            runtime,
            scope: scope.into(),
            helper_image: helper_image.into(),
            scheme,
            timeouts,
            temp_root: None,
            remover: Arc::new(remove_path),
        }
    }

    /// Replaces the system temp directory as the containment root.
    #[must_use]
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(temp_root.into());
        self
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn temp_root(&self, path: &Path) -> Result<PathBuf, SafetyViolation> {
        let root = match &self.temp_root {
            Some(root) => std::fs::canonicalize(root),
            None => canonical_temp_dir(),
        };
        root.map_err(|source| SafetyViolation::Unresolvable {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Decides whether `target` may be removed.
    ///
    /// Every rule applies whether or not the target exists: absolute,
    /// strictly inside the canonical temp directory after symlinks are
    /// resolved, and with a path segment equal to the scope. A missing
    /// target is judged by where it would be: its deepest existing ancestor,
    /// canonicalized, plus the missing components.
    ///
    /// `Ok(None)` means the target passed and does not exist. `Ok(Some(path))`
    /// returns the canonical path to remove.
    pub fn check(&self, target: &Path) -> Result<Option<PathBuf>, SafetyViolation> {
        if !target.is_absolute() {
            return Err(SafetyViolation::NotAbsolute(target.to_path_buf()));
        }
        if self.scope.trim().is_empty() {
            return Err(SafetyViolation::EmptyScope);
        }

        let (resolved, exists) = resolve(target)?;

        let temp_root = self.temp_root(target)?;
        if !is_strictly_within(&temp_root, &resolved) {
            return Err(SafetyViolation::OutsideTemp {
                path: resolved,
                temp_root,
            });
        }
        if !has_segment(&resolved, &self.scope) {
            return Err(SafetyViolation::MissingScope {
                path: resolved,
                scope: self.scope.clone(),
            });
        }
        Ok(exists.then_some(resolved))
    }

    /// Removes `target` recursively once it passes [`CleanupGuard::check`].
    pub async fn remove(&self, target: &Path) -> Result<CleanupOutcome, CleanupError> {
        let Some(path) = self.check(target)? else {
            debug!("{} already gone", target.display());
            return Ok(CleanupOutcome::AlreadyGone);
        };

        match (self.remover)(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                return Ok(CleanupOutcome::Removed);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CleanupOutcome::AlreadyGone),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && path.is_dir() => {
                warn!(
                    "Failed to remove {}: {e}. Attempting privileged cleanup...",
                    path.display()
                );
            }
            Err(source) => return Err(CleanupError::Io { path, source }),
        }

        self.run_helper(&path).await?;

        (self.remover)(&path).map_err(|source| CleanupError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Removed {} with a cleanup helper", path.display());
        Ok(CleanupOutcome::RemovedWithHelper)
    }

    /// The helper container that empties `path` from inside.
    #[must_use]
    pub fn helper_blueprint(&self, path: &Path) -> ContainerBlueprint {
        let base = format!(
            "reactor-cleanup-{}-{}",
            sanitize_folder(&self.scope),
            project_hash(path)
        );
        let name = match self.scheme.isolation_prefix() {
            Some(prefix) => format!("{prefix}-{base}"),
            None => base,
        };

        ContainerBlueprint {
            name,
            image: self.helper_image.clone(),
            command: [
                "find",
                HELPER_MOUNT_TARGET,
                "-mindepth",
                "1",
                "-delete",
            ]
            .map(String::from)
            .to_vec(),
            working_dir: "/".to_string(),
            user: "0:0".to_string(),
            env: Vec::new(),
            mounts: vec![MountSpec::bind(path, HELPER_MOUNT_TARGET)],
            ports: Vec::new(),
            network_mode: "none".to_string(),
            labels: BTreeMap::from([
                (labels::MANAGED.to_string(), labels::MANAGED_VALUE.to_string()),
                (labels::CLEANUP_SCOPE.to_string(), self.scope.clone()),
            ]),
        }
    }

    async fn run_helper(&self, path: &Path) -> Result<(), CleanupError> {
        let helper = self.helper_blueprint(path);
        let fail = |source| CleanupError::Helper {
            path: path.to_path_buf(),
            source,
        };

        let present = with_deadline(
            "inspect image",
            self.timeouts.operation(),
            self.runtime.image_exists(&helper.image),
        )
        .await
        .map_err(fail)?;
        if !present {
            with_deadline("pull", self.timeouts.pull(), self.runtime.pull(&helper.image))
                .await
                .map_err(fail)?;
        }

        // A helper left behind by an interrupted run would block the name.
        let stale = with_deadline(
            "inspect",
            self.timeouts.operation(),
            self.runtime.inspect(&helper.name),
        )
        .await
        .map_err(fail)?;
        if let Some(stale) = stale {
            debug!("Removing stale helper {}", stale.name);
            self.discard_helper(&stale.name, &stale.id).await;
        }

        let id = with_deadline("create", self.timeouts.operation(), self.runtime.create(&helper))
            .await
            .map_err(fail)?;

        let outcome = async {
            with_deadline("start", self.timeouts.operation(), self.runtime.start(&id)).await?;
            with_deadline("wait for", self.timeouts.cleanup(), self.runtime.wait(&id)).await
        }
        .await;

        self.discard_helper(&helper.name, &id).await;

        match outcome.map_err(fail)? {
            0 => Ok(()),
            code => Err(CleanupError::HelperExit {
                path: path.to_path_buf(),
                code,
            }),
        }
    }

    /// Force-removes a helper. Failures only warn: [`CleanupGuard::reclaim_scope`]
    /// finds leftovers by label.
    async fn discard_helper(&self, name: &str, id: &str) {
        let removed = with_deadline(
            "remove",
            self.timeouts.operation(),
            self.runtime.remove(id, true),
        )
        .await;
        match removed {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => warn!("Failed to remove cleanup helper {name}: {e}"),
        }
    }

    /// Force-removes every container labelled with this guard's scope.
    /// Returns how many were removed.
    pub async fn reclaim_scope(&self) -> Result<usize, CleanupError> {
        let scope = self.scope.clone();
        let runtime = Arc::clone(&self.runtime);
        let reclaim = async move {
            let containers = runtime.list_by_label(labels::CLEANUP_SCOPE, &scope).await?;
            let mut removed = 0;
            for container in containers {
                match runtime.remove(&container.id, true).await {
                    Ok(()) => removed += 1,
                    Err(RuntimeError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(removed)
        };

        let removed = with_deadline("reclaim", self.timeouts.cleanup(), reclaim)
            .await
            .map_err(|source| CleanupError::Reclaim {
                scope: self.scope.clone(),
                source,
            })?;
        if removed > 0 {
            info!("Reclaimed {removed} container(s) of scope {}", self.scope);
        }
        Ok(removed)
    }
}

/// Canonical location of `target` and whether it exists. A missing target
/// resolves through its deepest existing ancestor; the missing tail must be
/// plain names.
fn resolve(target: &Path) -> Result<(PathBuf, bool), SafetyViolation> {
    let unresolvable = |source| SafetyViolation::Unresolvable {
        path: target.to_path_buf(),
        source,
    };

    for ancestor in target.ancestors() {
        match std::fs::canonicalize(ancestor) {
            Ok(base) => {
                let Ok(missing) = target.strip_prefix(ancestor) else {
                    continue;
                };
                if missing.as_os_str().is_empty() {
                    return Ok((base, true));
                }
                if !missing.components().all(|c| matches!(c, Component::Normal(_))) {
                    return Err(unresolvable(io::Error::from(io::ErrorKind::NotFound)));
                }
                return Ok((base.join(missing), false));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(unresolvable(source)),
        }
    }
    Err(unresolvable(io::Error::from(io::ErrorKind::NotFound)))
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
