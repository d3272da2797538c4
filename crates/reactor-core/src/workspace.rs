//! The `reactor-workspace.yml` schema and its validation rules.
//!
//! A workspace is only ever handed out fully validated: every service path
//! exists, is a directory, and sits at or under the workspace directory.
//!
//! # Example
//! ```yaml
//! version: "1"
//! services:
//!   api:
//!     path: ./services/api
//!   web:
//!     path: ./web
//!     account: frontend
//! ```

use crate::identity;
use reactor_utils::fs::{clean_path, contained_join};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The only schema version this build understands.
pub const SUPPORTED_VERSION: &str = "1";

/// Recognized workspace file names, in lookup order.
pub const WORKSPACE_FILE_NAMES: [&str; 2] = ["reactor-workspace.yml", "reactor-workspace.yaml"];

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to read workspace file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workspace file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("workspace file is missing `version` (expected \"{SUPPORTED_VERSION}\")")]
    MissingVersion,
    #[error("unsupported workspace version \"{found}\" (expected \"{SUPPORTED_VERSION}\")")]
    UnsupportedVersion { found: String },
    #[error("workspace declares no services")]
    NoServices,
    #[error("service name `{service}` is invalid: use letters, digits, `_`, `.`, or `-`")]
    InvalidServiceName { service: String },
    #[error("service `{service}`: missing `path`")]
    MissingPath { service: String },
    #[error("service `{service}`: `account` must not be empty")]
    EmptyAccount { service: String },
    #[error("service `{service}`: path `{path}` resolves outside the workspace directory")]
    PathEscapesWorkspace { service: String, path: String },
    #[error("service `{service}`: path {} does not exist", .path.display())]
    PathNotFound { service: String, path: PathBuf },
    #[error("service `{service}`: path {} is not a directory", .path.display())]
    NotADirectory { service: String, path: PathBuf },
    #[error("service `{service}`: cannot access {}", .path.display())]
    PathUnreadable {
        service: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    /// The service the error is about, if it is about one.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::InvalidServiceName { service }
            | Self::MissingPath { service }
            | Self::EmptyAccount { service }
            | Self::PathEscapesWorkspace { service, .. }
            | Self::PathNotFound { service, .. }
            | Self::NotADirectory { service, .. }
            | Self::PathUnreadable { service, .. } => Some(service),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceDeclaration {
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    services: BTreeMap<String, ServiceDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceDeclaration {
    path: Option<String>,
    account: Option<String>,
}

/// One validated service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    /// The path as written in the workspace file.
    pub declared_path: String,
    /// Absolute, cleaned path under the workspace directory.
    pub path: PathBuf,
    /// Overrides the workspace-level account for this service only.
    pub account: Option<String>,
}

impl Service {
    #[must_use]
    pub fn effective_account<'a>(&'a self, default: &'a str) -> &'a str {
        self.account.as_deref().unwrap_or(default)
    }
}

/// A fully validated workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path of the workspace file.
    pub file: PathBuf,
    /// Directory containing the workspace file; every service lives under it.
    pub root: PathBuf,
    /// Stable identity of this workspace (see [`identity::workspace_hash`]).
    pub hash: String,
    pub version: String,
    pub services: BTreeMap<String, Service>,
}

impl Workspace {
    /// Reads and validates the workspace file at `file`.
    pub fn load(file: &Path) -> Result<Self, WorkspaceError> {
        let contents = std::fs::read_to_string(file).map_err(|source| WorkspaceError::Read {
            path: file.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, file)
    }

    /// Validates `contents` as if read from `file`. Service paths are
    /// resolved against the directory containing `file` and checked on disk.
    pub fn parse(contents: &str, file: &Path) -> Result<Self, WorkspaceError> {
        let declaration: WorkspaceDeclaration =
            serde_yaml::from_str(contents).map_err(|e| WorkspaceError::Parse {
                path: file.to_path_buf(),
                message: e.to_string(),
            })?;

        let version = declaration
            .version
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or(WorkspaceError::MissingVersion)?;
        if version != SUPPORTED_VERSION {
            return Err(WorkspaceError::UnsupportedVersion { found: version });
        }

        if declaration.services.is_empty() {
            return Err(WorkspaceError::NoServices);
        }

        let file = absolute(file);
        let root = workspace_root(&file);

        let mut services = BTreeMap::new();
        for (name, decl) in declaration.services {
            let service = validate_service(&root, name, decl)?;
            services.insert(service.name.clone(), service);
        }

        Ok(Self {
            hash: identity::workspace_hash(&file),
            file,
            root,
            version,
            services,
        })
    }

    /// Looks for a workspace file in `dir`. `.yml` wins over `.yaml`.
    /// Absence is not an error.
    #[must_use]
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        WORKSPACE_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

fn validate_service(
    root: &Path,
    name: String,
    decl: ServiceDeclaration,
) -> Result<Service, WorkspaceError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(WorkspaceError::InvalidServiceName { service: name });
    }

    let Some(declared_path) = decl.path.filter(|p| !p.trim().is_empty()) else {
        return Err(WorkspaceError::MissingPath { service: name });
    };

    if decl.account.as_deref().is_some_and(|a| a.trim().is_empty()) {
        return Err(WorkspaceError::EmptyAccount { service: name });
    }

    let Ok(path) = contained_join(root, Path::new(&declared_path)) else {
        return Err(WorkspaceError::PathEscapesWorkspace {
            service: name,
            path: declared_path,
        });
    };

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(WorkspaceError::NotADirectory { service: name, path }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkspaceError::PathNotFound { service: name, path });
        }
        Err(source) => {
            return Err(WorkspaceError::PathUnreadable {
                service: name,
                path,
                source,
            });
        }
    }

    Ok(Service {
        name,
        declared_path,
        path,
        account: decl.account,
    })
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.trim().to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean_path(path)
    } else {
        std::env::current_dir()
            .map(|cwd| clean_path(&cwd.join(path)))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn workspace_root(file: &Path) -> PathBuf {
    let dir = file.parent().unwrap_or_else(|| Path::new("/"));
    // Canonical so a symlinked checkout still contains its own services.
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(dirs: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for d in dirs {
                fs::create_dir_all(dir.path().join(d)).unwrap();
            }
            Self { dir }
        }

        fn file(&self) -> PathBuf {
            self.dir.path().join("reactor-workspace.yml")
        }

        fn parse(&self, yaml: &str) -> Result<Workspace, WorkspaceError> {
            Workspace::parse(yaml, &self.file())
        }
    }

    #[test]
    fn test_accepts_two_services_with_account_override() {
        let fx = Fixture::new(&["services/api", "web"]);
        let ws = fx
            .parse(
                r#"
version: "1"
services:
  api:
    path: ./services/api
  web:
    path: web
    account: frontend
"#,
            )
            .unwrap();

        assert_eq!(ws.version, "1");
        assert_eq!(ws.services.len(), 2);
        let root = fs::canonicalize(fx.dir.path()).unwrap();
        assert_eq!(ws.root, root);
        assert_eq!(ws.services["api"].path, root.join("services/api"));
        assert_eq!(ws.services["api"].account, None);
        assert_eq!(ws.services["web"].account.as_deref(), Some("frontend"));
        assert_eq!(ws.services["web"].effective_account("alice"), "frontend");
        assert_eq!(ws.services["api"].effective_account("alice"), "alice");
        assert_eq!(ws.hash.len(), 64);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let fx = Fixture::new(&["api"]);
        let err = fx
            .parse("version: \"2\"\nservices:\n  api:\n    path: api\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::UnsupportedVersion { ref found } if found == "2"));

        let err = fx.parse("services:\n  api:\n    path: api\n").unwrap_err();
        assert!(matches!(err, WorkspaceError::MissingVersion));
    }

    #[test]
    fn test_numeric_version_is_accepted() {
        let fx = Fixture::new(&["api"]);
        let ws = fx.parse("version: 1\nservices:\n  api:\n    path: api\n").unwrap();
        assert_eq!(ws.version, "1");
    }

    #[test]
    fn test_rejects_empty_services() {
        let fx = Fixture::new(&[]);
        assert!(matches!(
            fx.parse("version: \"1\"\nservices: {}\n").unwrap_err(),
            WorkspaceError::NoServices
        ));
        assert!(matches!(
            fx.parse("version: \"1\"\n").unwrap_err(),
            WorkspaceError::NoServices
        ));
    }

    #[test]
    fn test_rejects_missing_path() {
        let fx = Fixture::new(&[]);
        let err = fx
            .parse("version: \"1\"\nservices:\n  api:\n    account: bob\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::MissingPath { ref service } if service == "api"));
        assert_eq!(err.service(), Some("api"));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let fx = Fixture::new(&["api"]);
        for bad in ["../../etc", "/etc", "api/../../outside"] {
            let yaml = format!("version: \"1\"\nservices:\n  api:\n    path: {bad}\n");
            let err = fx.parse(&yaml).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::PathEscapesWorkspace { ref service, .. } if service == "api"),
                "{bad}: {err:?}"
            );
        }
    }

    #[test]
    fn test_rejects_nonexistent_and_non_directory_paths() {
        let fx = Fixture::new(&[]);
        fs::write(fx.dir.path().join("notes.txt"), "hi").unwrap();

        let err = fx
            .parse("version: \"1\"\nservices:\n  api:\n    path: missing\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PathNotFound { ref service, .. } if service == "api"));

        let err = fx
            .parse("version: \"1\"\nservices:\n  api:\n    path: notes.txt\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::NotADirectory { .. }));
    }

    #[test]
    fn test_one_bad_service_rejects_whole_workspace() {
        let fx = Fixture::new(&["good"]);
        let err = fx
            .parse("version: \"1\"\nservices:\n  good:\n    path: good\n  bad:\n    path: ../x\n")
            .unwrap_err();
        assert_eq!(err.service(), Some("bad"));
    }

    #[test]
    fn test_rejects_unknown_fields_and_empty_account() {
        let fx = Fixture::new(&["api"]);
        let err = fx
            .parse("version: \"1\"\nservices:\n  api:\n    path: api\n    image: x\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Parse { .. }));

        let err = fx
            .parse("version: \"1\"\nservices:\n  api:\n    path: api\n    account: \"\"\n")
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::EmptyAccount { .. }));
    }

    #[test]
    fn test_workspace_root_itself_is_allowed() {
        let fx = Fixture::new(&[]);
        let ws = fx.parse("version: \"1\"\nservices:\n  root:\n    path: .\n").unwrap();
        assert_eq!(ws.services["root"].path, ws.root);
    }

    #[test]
    fn test_discover_prefers_yml() {
        let fx = Fixture::new(&[]);
        assert_eq!(Workspace::discover(fx.dir.path()), None);

        fs::write(fx.dir.path().join("reactor-workspace.yaml"), "").unwrap();
        assert_eq!(
            Workspace::discover(fx.dir.path()),
            Some(fx.dir.path().join("reactor-workspace.yaml"))
        );

        fs::write(fx.dir.path().join("reactor-workspace.yml"), "").unwrap();
        assert_eq!(
            Workspace::discover(fx.dir.path()),
            Some(fx.dir.path().join("reactor-workspace.yml"))
        );
    }

    #[test]
    fn test_load_reports_missing_file() {
        let fx = Fixture::new(&[]);
        let err = Workspace::load(&fx.file()).unwrap_err();
        assert!(matches!(err, WorkspaceError::Read { .. }));
    }
}
