use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A path that resolved outside the root it was joined to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} escapes {}", .path.display(), .root.display())]
pub struct PathEscape {
    pub root: PathBuf,
    pub path: PathBuf,
}

/// Lexically normalizes a path: drops `.` segments, folds `..` into the
/// preceding segment, and never climbs above the filesystem root.
///
/// Does not touch the filesystem, so symlinks are not resolved.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => result.push(p.as_os_str()),
            Component::RootDir => result.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = result.as_os_str().is_empty() || result == Path::new("/");
                let ends_in_parent = matches!(result.components().next_back(), Some(Component::ParentDir));
                if at_root && result.has_root() {
                    // `/..` is `/`.
                } else if at_root || ends_in_parent {
                    result.push("..");
                } else {
                    result.pop();
                }
            }
            Component::Normal(p) => result.push(p),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Joins `path` to `root` and ensures the cleaned result is `root` itself or
/// something beneath it. Absolute `path`s are taken as-is and must still land
/// under `root`.
///
/// Prevents directory traversal (e.g. `../../etc`, `/etc`).
///
/// # Errors
///
/// Returns [`PathEscape`] when the cleaned path is not within `root`.
pub fn contained_join(root: &Path, path: &Path) -> Result<PathBuf, PathEscape> {
    let root = clean_path(root);
    let candidate = if path.is_absolute() {
        clean_path(path)
    } else {
        clean_path(&root.join(path))
    };

    if candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        debug!(
            "Rejected {} (cleaned to {}) outside {}",
            path.display(),
            candidate.display(),
            root.display()
        );
        Err(PathEscape {
            root,
            path: candidate,
        })
    }
}

/// Returns true if `path` is strictly below `root` (not equal to it).
/// Both paths are compared component-wise as given.
#[must_use]
pub fn is_strictly_within(root: &Path, path: &Path) -> bool {
    path != root && path.starts_with(root)
}

/// Returns true if one full segment of `path` equals `segment`.
///
/// Substrings do not count: `/tmp/test-abc` does not contain segment `abc`.
#[must_use]
pub fn has_segment(path: &Path, segment: &str) -> bool {
    !segment.is_empty()
        && path
            .components()
            .any(|c| matches!(c, Component::Normal(s) if s == segment))
}

/// The system temporary directory with symlinks resolved (`/tmp` on Linux,
/// `/private/var/folders/...` on macOS).
///
/// # Errors
///
/// Returns an error if the temporary directory cannot be canonicalized.
pub fn canonical_temp_dir() -> std::io::Result<PathBuf> {
    std::fs::canonicalize(std::env::temp_dir())
}
