//! Deterministic naming for containers and workspaces.
//!
//! Name construction is a pure function of its inputs: no clock, no
//! randomness, no environment reads. The isolation prefix is passed in
//! explicitly through [`NameScheme`] so callers (and tests) control it.
//!
//! The two hash helpers, [`workspace_hash`] and [`project_hash`], are the
//! exception: they canonicalize their path on disk first (falling back to
//! the absolute form), so the same directory hashes the same however it
//! was spelled.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Leading component of every container name.
pub const NAME_ROOT: &str = "reactor";

/// Maximum length of the sanitized folder component.
pub const MAX_FOLDER_LEN: usize = 20;

/// Substituted when a folder sanitizes to nothing.
pub const FALLBACK_FOLDER: &str = "project";

/// Length of the short project hash.
const PROJECT_HASH_LEN: usize = 8;

/// Whether a container persists project state or runs clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Normal,
    /// No mounts; used to evaluate unknown tool behavior safely.
    Discovery,
}

impl RunMode {
    #[must_use]
    pub const fn from_discovery(discovery: bool) -> Self {
        if discovery {
            Self::Discovery
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub const fn is_discovery(self) -> bool {
        matches!(self, Self::Discovery)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Discovery => write!(f, "discovery"),
        }
    }
}

/// Naming rules for one invocation.
///
/// Two schemes with the same prefix produce byte-identical names for the
/// same inputs. The prefix is how concurrent test runs keep their
/// containers apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameScheme {
    isolation_prefix: Option<String>,
}

impl NameScheme {
    /// A scheme without an isolation prefix.
    #[must_use]
    pub const fn unprefixed() -> Self {
        Self {
            isolation_prefix: None,
        }
    }

    /// A scheme with an optional isolation prefix. Blank prefixes are ignored.
    #[must_use]
    pub fn new(isolation_prefix: Option<&str>) -> Self {
        let isolation_prefix = isolation_prefix
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| sanitize_component(p).into_owned());
        Self { isolation_prefix }
    }

    #[must_use]
    pub fn isolation_prefix(&self) -> Option<&str> {
        self.isolation_prefix.as_deref()
    }

    /// Builds `reactor-<account>-<folder>-<hash>` (or the `reactor-discovery-`
    /// form), prefixed with `<prefix>-` when an isolation prefix is set.
    #[must_use]
    pub fn container_name(
        &self,
        account: &str,
        project_path: &Path,
        project_hash: &str,
        mode: RunMode,
    ) -> String {
        let folder = project_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let folder = sanitize_folder(&folder);
        let account = sanitize_component(account);

        let base = match mode {
            RunMode::Normal => format!("{NAME_ROOT}-{account}-{folder}-{project_hash}"),
            RunMode::Discovery => {
                format!("{NAME_ROOT}-discovery-{account}-{folder}-{project_hash}")
            }
        };

        match &self.isolation_prefix {
            Some(prefix) => format!("{prefix}-{base}"),
            None => base,
        }
    }

    /// Name of a workspace service container: the normal-mode name of the
    /// service directory under the service's effective account. Hashes via
    /// [`project_hash`], so it reads the filesystem.
    #[must_use]
    pub fn workspace_container_name(&self, account: &str, service_path: &Path) -> String {
        self.container_name(
            account,
            service_path,
            &project_hash(service_path),
            RunMode::Normal,
        )
    }
}

/// Reduces a folder name to `[a-zA-Z0-9][a-zA-Z0-9_.-]*`, at most
/// [`MAX_FOLDER_LEN`] characters.
#[must_use]
pub fn sanitize_folder(folder: &str) -> String {
    let mut sanitized = sanitize_component(folder).into_owned();
    if sanitized.is_empty() {
        return FALLBACK_FOLDER.to_string();
    }
    if !sanitized.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        sanitized = format!("{FALLBACK_FOLDER}-{sanitized}");
    }

    // Only ASCII remains, so byte truncation is char-safe.
    sanitized.truncate(MAX_FOLDER_LEN);
    let trimmed = sanitized.trim_end_matches(is_separator);

    if trimmed.is_empty() {
        FALLBACK_FOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_component(value: &str) -> std::borrow::Cow<'_, str> {
    if value.chars().all(is_name_char) {
        return std::borrow::Cow::Borrowed(value);
    }
    std::borrow::Cow::Owned(
        value
            .chars()
            .map(|c| if is_name_char(c) { c } else { '-' })
            .collect(),
    )
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

const fn is_separator(c: char) -> bool {
    matches!(c, '_' | '.' | '-')
}

/// SHA-256 of the absolute, canonical workspace-file path, hex encoded.
///
/// Canonicalization makes the hash independent of the working directory
/// the command was started from. If the path cannot be canonicalized (it
/// no longer exists), the absolute form is hashed instead.
#[must_use]
pub fn workspace_hash(path: &Path) -> String {
    hex_sha256(&stable_path(path))
}

/// First eight hex characters of the SHA-256 of the canonical project path.
#[must_use]
pub fn project_hash(path: &Path) -> String {
    let mut hash = hex_sha256(&stable_path(path));
    hash.truncate(PROJECT_HASH_LEN);
    hash
}

fn stable_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

fn hex_sha256(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}
