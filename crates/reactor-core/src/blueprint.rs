//! Translation of resolved configuration + intent into a container blueprint.

use crate::config::{MountSpec, PortMapping, ResolvedConfig};
use crate::identity::{NameScheme, RunMode};
use crate::labels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default entry command: an interactive shell.
pub const DEFAULT_COMMAND: &str = "/bin/bash";
/// Working directory inside every container.
pub const DEFAULT_WORKDIR: &str = "/workspace";
/// Unprivileged user every container runs as.
pub const DEFAULT_USER: &str = "reactor";
pub const DEFAULT_NETWORK_MODE: &str = "bridge";

/// Engine socket exposed by host integration.
pub const HOST_DOCKER_SOCKET: &str = "/var/run/docker.sock";
/// Set inside the container when host integration is enabled.
pub const HOST_DOCKER_ENV: &str = "REACTOR_HOST_DOCKER";

/// Immutable, fully resolved description of one container.
///
/// Built fresh per invocation and never mutated. Building twice from the
/// same inputs yields equal blueprints, which is what lets `up` recover an
/// existing container instead of creating a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBlueprint {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub user: String,
    /// `KEY=VALUE` pairs, sorted by key.
    pub env: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortMapping>,
    pub network_mode: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerBlueprint {
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Collects intent for one container and turns it into a [`ContainerBlueprint`].
///
/// # Example
/// ```
/// use reactor_core::{BlueprintBuilder, MountSpec, NameScheme, ResolvedConfig};
///
/// let config = ResolvedConfig {
///     account: "alice".into(),
///     project_root: "/home/alice/app".into(),
///     project_hash: "a1b2c3d4".into(),
///     image: "ubuntu:24.04".into(),
/// };
/// let blueprint = BlueprintBuilder::new(&config)
///     .mount(MountSpec::bind("/home/alice/app", "/workspace"))
///     .build(&NameScheme::unprefixed());
/// assert_eq!(blueprint.name, "reactor-alice-app-a1b2c3d4");
/// ```
#[derive(Debug, Clone)]
pub struct BlueprintBuilder<'a> {
    config: &'a ResolvedConfig,
    mounts: Vec<MountSpec>,
    ports: Vec<PortMapping>,
    discovery: bool,
    host_integration: bool,
    labels: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl<'a> BlueprintBuilder<'a> {
    #[must_use]
    pub const fn new(config: &'a ResolvedConfig) -> Self {
        Self {
            config,
            mounts: Vec::new(),
            ports: Vec::new(),
            discovery: false,
            host_integration: false,
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    #[must_use]
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountSpec>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    #[must_use]
    pub fn ports(mut self, ports: impl IntoIterator<Item = PortMapping>) -> Self {
        self.ports.extend(ports);
        self
    }

    /// Discovery mode drops every mount, including host integration.
    #[must_use]
    pub const fn discovery(mut self, discovery: bool) -> Self {
        self.discovery = discovery;
        self
    }

    /// Exposes the engine socket inside the container. Security relevant:
    /// only ever enabled by an explicit caller opt-in.
    #[must_use]
    pub const fn host_integration(mut self, enabled: bool) -> Self {
        self.host_integration = enabled;
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn build(self, scheme: &NameScheme) -> ContainerBlueprint {
        let mode = RunMode::from_discovery(self.discovery);
        let config = self.config;

        let name = scheme.container_name(
            &config.account,
            &config.project_root,
            &config.project_hash,
            mode,
        );

        let mut env = self.env;
        env.insert("REACTOR_ACCOUNT".to_string(), config.account.clone());
        env.insert("REACTOR_MODE".to_string(), mode.to_string());

        let mounts = if mode.is_discovery() {
            Vec::new()
        } else {
            let mut mounts = self.mounts;
            if self.host_integration {
                mounts.push(MountSpec::bind(HOST_DOCKER_SOCKET, HOST_DOCKER_SOCKET));
                env.insert(HOST_DOCKER_ENV.to_string(), "1".to_string());
            }
            mounts
        };

        let mut labels = self.labels;
        labels.insert(labels::MANAGED.to_string(), labels::MANAGED_VALUE.to_string());
        labels.insert(labels::ACCOUNT.to_string(), config.account.clone());
        labels.insert(labels::MODE.to_string(), mode.to_string());

        ContainerBlueprint {
            name,
            image: config.image.clone(),
            command: vec![DEFAULT_COMMAND.to_string()],
            working_dir: DEFAULT_WORKDIR.to_string(),
            user: DEFAULT_USER.to_string(),
            env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
            mounts,
            ports: self.ports,
            network_mode: DEFAULT_NETWORK_MODE.to_string(),
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResolvedConfig {
        ResolvedConfig {
            account: "alice".to_string(),
            project_root: "/home/alice/app".into(),
            project_hash: "a1b2c3d4".to_string(),
            image: "ubuntu:24.04".to_string(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = config();
        let bp = BlueprintBuilder::new(&config).build(&NameScheme::unprefixed());
        assert_eq!(bp.command, vec![DEFAULT_COMMAND]);
        assert_eq!(bp.working_dir, DEFAULT_WORKDIR);
        assert_eq!(bp.user, DEFAULT_USER);
        assert_eq!(bp.network_mode, "bridge");
        assert_eq!(bp.image, "ubuntu:24.04");
        assert_eq!(bp.label(labels::MANAGED), Some("true"));
        assert_eq!(bp.env, vec!["REACTOR_ACCOUNT=alice", "REACTOR_MODE=normal"]);
    }

    #[test]
    fn test_discovery_drops_all_mounts() {
        let config = config();
        let bp = BlueprintBuilder::new(&config)
            .mount(MountSpec::bind("/home/alice/app", "/workspace"))
            .mount(MountSpec::bind("/home/alice/.ssh", "/home/reactor/.ssh"))
            .host_integration(true)
            .discovery(true)
            .build(&NameScheme::unprefixed());

        assert!(bp.mounts.is_empty());
        assert!(bp.name.starts_with("reactor-discovery-"));
        assert_eq!(bp.label(labels::MODE), Some("discovery"));
        assert!(!bp.env.iter().any(|e| e.starts_with(HOST_DOCKER_ENV)));
    }

    #[test]
    fn test_host_integration_is_opt_in() {
        let config = config();
        let plain = BlueprintBuilder::new(&config).build(&NameScheme::unprefixed());
        assert!(plain.mounts.is_empty());
        assert!(!plain.env.iter().any(|e| e.starts_with(HOST_DOCKER_ENV)));

        let integrated = BlueprintBuilder::new(&config)
            .mount(MountSpec::bind("/home/alice/app", "/workspace"))
            .host_integration(true)
            .build(&NameScheme::unprefixed());
        assert_eq!(integrated.mounts.len(), 2);
        assert_eq!(
            integrated.mounts[1],
            MountSpec::bind(HOST_DOCKER_SOCKET, HOST_DOCKER_SOCKET)
        );
        assert!(integrated.env.contains(&"REACTOR_HOST_DOCKER=1".to_string()));
    }

    #[test]
    fn test_mounts_keep_caller_order() {
        let config = config();
        let bp = BlueprintBuilder::new(&config)
            .mount(MountSpec::bind("/b", "/b"))
            .mounts([MountSpec::bind("/a", "/a"), MountSpec::bind("/c", "/c")])
            .build(&NameScheme::unprefixed());
        let targets: Vec<_> = bp.mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, ["/b", "/a", "/c"]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = config();
        let build = || {
            BlueprintBuilder::new(&config)
                .mount(MountSpec::bind("/home/alice/app", "/workspace"))
                .ports([PortMapping::new(8080, 80), PortMapping::new(5433, 5432)])
                .env("ZED", "1")
                .env("ALPHA", "2")
                .label("team", "core")
                .build(&NameScheme::new(Some("t1")))
        };
        let first = build();
        assert_eq!(first, build());
        assert_eq!(first.name, "t1-reactor-alice-app-a1b2c3d4");
        assert_eq!(
            first.env,
            vec!["ALPHA=2", "REACTOR_ACCOUNT=alice", "REACTOR_MODE=normal", "ZED=1"]
        );
    }
}
