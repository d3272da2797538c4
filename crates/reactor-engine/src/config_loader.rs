use crate::error::ReactorError;
use reactor_core::Settings;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a setting's effective value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Default,
    File(PathBuf),
    EnvVar(&'static str),
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(p) => write!(f, "{}", p.display()),
            Self::EnvVar(k) => write!(f, "env:{k}"),
        }
    }
}

/// Environment values that override the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub account: Option<String>,
    pub isolation_prefix: Option<String>,
}

impl EnvOverrides {
    /// Reads `REACTOR_ACCOUNT` and `REACTOR_ISOLATION_PREFIX`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            account: reactor_utils::env::account_override(),
            isolation_prefix: reactor_utils::env::isolation_prefix(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsLoader {
    pub settings: Settings,
    pub path: PathBuf,
    account_source: Provenance,
    prefix_source: Provenance,
}

impl SettingsLoader {
    /// Loads `config.toml` from the XDG config dir and applies environment
    /// overrides.
    pub async fn load() -> Result<Self, ReactorError> {
        Self::load_from(&reactor_utils::env::settings_path(), EnvOverrides::from_env()).await
    }

    /// Loads settings from `path`. A missing file yields defaults.
    pub async fn load_from(path: &Path, overrides: EnvOverrides) -> Result<Self, ReactorError> {
        let (mut settings, file_source) = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let settings: Settings =
                    toml::from_str(&content).map_err(|source| ReactorError::Settings {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!("Loaded settings from {}", path.display());
                (settings, Provenance::File(path.to_path_buf()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                (Settings::default(), Provenance::Default)
            }
            Err(source) => {
                return Err(ReactorError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut account_source = if settings.account.is_some() {
            file_source.clone()
        } else {
            Provenance::Default
        };
        let mut prefix_source = if settings.isolation_prefix.is_some() {
            file_source
        } else {
            Provenance::Default
        };

        if let Some(account) = overrides.account {
            info!("Using account {account} from {}", reactor_utils::env::ACCOUNT_VAR);
            settings.account = Some(account);
            account_source = Provenance::EnvVar(reactor_utils::env::ACCOUNT_VAR);
        }
        if let Some(prefix) = overrides.isolation_prefix {
            settings.isolation_prefix = Some(prefix);
            prefix_source = Provenance::EnvVar(reactor_utils::env::ISOLATION_PREFIX_VAR);
        }

        Ok(Self {
            settings,
            path: path.to_path_buf(),
            account_source,
            prefix_source,
        })
    }

    /// Reports where a top-level setting came from. Unknown keys are
    /// reported as defaults.
    #[must_use]
    pub fn explain(&self, key: &str) -> Provenance {
        match key {
            "account" => self.account_source.clone(),
            "isolation_prefix" => self.prefix_source.clone(),
            _ if self.path.exists() => Provenance::File(self.path.clone()),
            _ => Provenance::Default,
        }
    }
}
