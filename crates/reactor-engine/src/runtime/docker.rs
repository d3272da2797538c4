use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder, WaitContainerOptions,
};
use bollard::container::LogOutput;
use futures_util::{StreamExt, TryStreamExt};
use reactor_core::{
    ContainerBlueprint, ContainerInfo, ContainerRuntime, ContainerState, ExecOutput, RuntimeError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Grace period given to a container's main process on stop.
const STOP_GRACE_SECS: i32 = 10;

/// Port bindings are published on loopback only.
const PUBLISH_HOST_IP: &str = "127.0.0.1";

/// [`ContainerRuntime`] backed by the local Docker (or compatible) engine.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    client: Arc<Docker>,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform's default socket. This
    /// does not contact the engine; call [`ContainerRuntime::health`] for that.
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    #[must_use]
    pub fn from_client(client: Docker) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

fn map_error(operation: &'static str, target: &str, error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(target.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        e @ (BollardError::SocketNotFoundError(_) | BollardError::IOError { .. }) => {
            RuntimeError::Unavailable(e.to_string())
        }
        e if is_connect_failure(&e) => RuntimeError::Unavailable(e.to_string()),
        e => RuntimeError::Engine {
            operation,
            message: e.to_string(),
        },
    }
}

/// The daemon refused or never accepted the connection.
fn is_connect_failure(error: &BollardError) -> bool {
    matches!(error, BollardError::HyperLegacyError { err } if err.is_connect())
}

fn is_not_modified(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

/// Splits `repo[:tag]` for the create-image call. Registry ports
/// (`host:5000/repo`) and digests (`repo@sha256:...`) are left intact.
fn split_image_reference(image: &str) -> (&str, Option<&str>) {
    if image.contains('@') {
        return (image, None);
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (image, Some("latest")),
    }
}

fn create_body(blueprint: &ContainerBlueprint) -> ContainerCreateBody {
    let binds: Vec<String> = blueprint.mounts.iter().map(|m| m.to_bind_string()).collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = blueprint
        .ports
        .iter()
        .map(|p| {
            (
                format!("{}/tcp", p.container),
                Some(vec![PortBinding {
                    host_ip: Some(PUBLISH_HOST_IP.to_string()),
                    host_port: Some(p.host.to_string()),
                }]),
            )
        })
        .collect();

    let host_config = HostConfig {
        binds: (!binds.is_empty()).then_some(binds),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: Some(blueprint.network_mode.clone()),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(blueprint.image.clone()),
        cmd: Some(blueprint.command.clone()),
        working_dir: Some(blueprint.working_dir.clone()),
        user: Some(blueprint.user.clone()),
        env: Some(blueprint.env.clone()),
        labels: Some(
            blueprint
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn health(&self) -> Result<(), RuntimeError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String, RuntimeError> {
        debug!("Creating container {}", blueprint.name);
        let response = self
            .client
            .create_container(
                Some(
                    CreateContainerOptionsBuilder::new()
                        .name(&blueprint.name)
                        .build(),
                ),
                create_body(blueprint),
            )
            .await
            .map_err(|e| map_error("create", &blueprint.name, e))?;
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        debug!("Starting container {id}");
        match self
            .client
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error("start", id, e)),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        debug!("Stopping container {id}");
        match self
            .client
            .stop_container(
                id,
                Some(StopContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error("stop", id, e)),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        debug!("Removing container {id} (force: {force})");
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(force).v(true).build()),
            )
            .await
            .map_err(|e| map_error("remove", id, e))
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let response = match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(None),
            Err(e) => return Err(map_error("inspect", name, e)),
        };

        let status = response
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        let labels = response
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default()
            .into_iter()
            .collect();

        Ok(Some(ContainerInfo {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .map_or_else(|| name.to_string(), |n| n.trim_start_matches('/').to_string()),
            state: ContainerState::from_engine_status(&status),
            labels,
        }))
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let filters: HashMap<String, Vec<String>> =
            HashMap::from([("label".to_string(), vec![format!("{key}={value}")])]);
        let summaries = self
            .client
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(true)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(|e| map_error("list", key, e))?;

        Ok(summaries
            .into_iter()
            .map(|summary| {
                let status = summary.state.map(|s| s.to_string()).unwrap_or_default();
                ContainerInfo {
                    id: summary.id.unwrap_or_default(),
                    name: summary
                        .names
                        .and_then(|names| names.into_iter().next())
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    state: ContainerState::from_engine_status(&status),
                    labels: summary.labels.unwrap_or_default().into_iter().collect(),
                }
            })
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error("inspect image", image, e)),
        }
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image_reference(image);
        let mut options = CreateImageOptionsBuilder::new().from_image(from_image);
        if let Some(tag) = tag {
            options = options.tag(tag);
        }
        debug!("Pulling image {image}");
        self.client
            .create_image(Some(options.build()), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map(|_| ())
            .map_err(|e| map_error("pull", image, e))
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut stream = self.client.wait_container(id, None::<WaitContainerOptions>);
        let mut exit_code = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => exit_code = response.status_code,
                // Non-zero exits arrive as errors.
                Err(BollardError::DockerContainerWaitError { code, .. }) => return Ok(code),
                Err(e) => return Err(map_error("wait for", id, e)),
            }
        }
        Ok(exit_code)
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        let config = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(id, config)
            .await
            .map_err(|e| map_error("exec in", id, e))?;

        let mut output = ExecOutput::default();
        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_error("exec in", id, e))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    match chunk.map_err(|e| map_error("exec in", id, e))? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdErr { message } => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_error("exec in", id, e))?;
        output.exit_code = inspect.exit_code.unwrap_or(-1);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::{BlueprintBuilder, MountSpec, NameScheme, PortMapping, ResolvedConfig};

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("ubuntu:24.04"), ("ubuntu", Some("24.04")));
        assert_eq!(split_image_reference("ubuntu"), ("ubuntu", Some("latest")));
        assert_eq!(
            split_image_reference("localhost:5000/team/app"),
            ("localhost:5000/team/app", Some("latest"))
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/app:v2"),
            ("localhost:5000/team/app", Some("v2"))
        );
        assert_eq!(split_image_reference("app@sha256:abcd"), ("app@sha256:abcd", None));
    }

    #[test]
    fn test_create_body_translation() {
        let config = ResolvedConfig {
            account: "alice".into(),
            project_root: "/home/alice/app".into(),
            project_hash: "a1b2c3d4".into(),
            image: "ubuntu:24.04".into(),
        };
        let blueprint = BlueprintBuilder::new(&config)
            .mount(MountSpec::bind("/home/alice/app", "/workspace"))
            .ports([PortMapping::new(8080, 80)])
            .build(&NameScheme::unprefixed());

        let body = create_body(&blueprint);
        let host = body.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["/home/alice/app:/workspace".to_string()]));
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
        let bindings = host.port_bindings.unwrap();
        let binding = &bindings["80/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_port.as_deref(), Some("8080"));
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(body.user.as_deref(), Some("reactor"));
        assert_eq!(
            body.labels.unwrap().get("com.reactor.managed").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_error_mapping() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        };
        assert_eq!(
            map_error("stop", "abc", not_found),
            RuntimeError::NotFound("abc".into())
        );

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name in use".into(),
        };
        assert_eq!(
            map_error("create", "abc", conflict),
            RuntimeError::Conflict("name in use".into())
        );

        let server = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(matches!(
            map_error("start", "abc", server),
            RuntimeError::Engine { operation: "start", .. }
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Nothing listens on port 1.
        let client =
            Docker::connect_with_http("http://127.0.0.1:1", 5, bollard::API_DEFAULT_VERSION)
                .unwrap();
        let runtime = DockerRuntime::from_client(client);

        let err = runtime.inspect("reactor-missing").await.unwrap_err();
        assert!(err.is_unavailable(), "{err:?}");
        let err = runtime.stop("reactor-missing").await.unwrap_err();
        assert!(err.is_unavailable(), "{err:?}");
    }
}
