use async_trait::async_trait;
use reactor_core::{
    ContainerBlueprint, ContainerInfo, ContainerRuntime, ContainerState, ExecOutput, RuntimeError,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Runtime operations, for failure injection and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Health,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    List,
    ImageExists,
    Pull,
    Wait,
    Exec,
}

/// One recorded call against a [`MemoryRuntime`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Health,
    Create { name: String, image: String },
    Start { id: String },
    Stop { id: String },
    Remove { id: String, force: bool },
    Inspect { name: String },
    ListByLabel { key: String, value: String },
    ImageExists { image: String },
    Pull { image: String },
    Wait { id: String },
    Exec { id: String, command: Vec<String> },
}

impl RuntimeCall {
    /// True for calls that change engine state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create { .. }
                | Self::Start { .. }
                | Self::Stop { .. }
                | Self::Remove { .. }
                | Self::Pull { .. }
                | Self::Exec { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Failure {
    op: Op,
    /// Matches a container name, id, or image. `None` matches every call.
    target: Option<String>,
    error: RuntimeError,
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
struct Container {
    id: String,
    name: String,
    state: ContainerState,
    labels: BTreeMap<String, String>,
    blueprint: Option<ContainerBlueprint>,
}

impl Container {
    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    containers: Vec<Container>,
    images: BTreeSet<String>,
    calls: Vec<RuntimeCall>,
    failures: Vec<Failure>,
    latency: HashMap<Op, Duration>,
    exec_output: ExecOutput,
    wait_exit_code: i64,
    unavailable: bool,
    next_id: u64,
}

impl Inner {
    fn find(&self, id_or_name: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == id_or_name || c.name == id_or_name)
    }

    fn take_failure(&mut self, op: Op, targets: &[&str]) -> Option<RuntimeError> {
        if self.unavailable {
            return Some(RuntimeError::Unavailable("engine stopped".to_string()));
        }
        let index = self.failures.iter().position(|f| {
            f.op == op
                && f.target
                    .as_deref()
                    .is_none_or(|t| targets.iter().any(|candidate| *candidate == t))
        })?;
        let failure = &mut self.failures[index];
        let error = failure.error.clone();
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(index);
            }
        }
        Some(error)
    }

    /// Names and ids that a failure keyed on `id_or_name` should match.
    fn aliases(&self, id_or_name: &str) -> Vec<String> {
        let mut aliases = vec![id_or_name.to_string()];
        if let Some(i) = self.find(id_or_name) {
            aliases.push(self.containers[i].id.clone());
            aliases.push(self.containers[i].name.clone());
        }
        aliases
    }
}

/// An in-memory container engine.
///
/// Mirrors the engine semantics reactor depends on: names are unique,
/// creating requires the image to be present, running containers cannot be
/// removed without `force`. Every call is recorded and any operation can be
/// made to fail or to take time.
///
/// ```
/// use reactor_core::ContainerState;
/// use reactor_engine::runtime::MemoryRuntime;
///
/// let runtime = MemoryRuntime::new();
/// let id = runtime.add_container("reactor-a-app-1234", ContainerState::Stopped);
/// assert_eq!(runtime.state_of("reactor-a-app-1234"), ContainerState::Stopped);
/// assert!(id.starts_with("mem-"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `image` present locally.
    pub fn add_image(&self, image: impl Into<String>) {
        self.lock().images.insert(image.into());
    }

    /// Seeds a container with no labels. Returns its id.
    pub fn add_container(&self, name: impl Into<String>, state: ContainerState) -> String {
        self.add_labelled_container(name, state, BTreeMap::new())
    }

    /// Seeds a container with `labels`. Returns its id.
    pub fn add_labelled_container(
        &self,
        name: impl Into<String>,
        state: ContainerState,
        labels: BTreeMap<String, String>,
    ) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("mem-{:04}", inner.next_id);
        inner.containers.push(Container {
            id: id.clone(),
            name: name.into(),
            state,
            labels,
            blueprint: None,
        });
        id
    }

    /// Fails the next matching call once.
    pub fn fail_once(&self, op: Op, error: RuntimeError) {
        self.push_failure(op, None, error, Some(1));
    }

    /// Fails every matching call until [`MemoryRuntime::clear_failures`].
    pub fn fail_always(&self, op: Op, error: RuntimeError) {
        self.push_failure(op, None, error, None);
    }

    /// Fails every `op` call aimed at `target` (a container name or id, or an
    /// image for image operations).
    pub fn fail_for(&self, op: Op, target: impl Into<String>, error: RuntimeError) {
        self.push_failure(op, Some(target.into()), error, None);
    }

    fn push_failure(&self, op: Op, target: Option<String>, error: RuntimeError, remaining: Option<usize>) {
        self.lock().failures.push(Failure {
            op,
            target,
            error,
            remaining,
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every call fails with [`RuntimeError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Delays every `op` call by `delay` before it takes effect.
    pub fn set_latency(&self, op: Op, delay: Duration) {
        self.lock().latency.insert(op, delay);
    }

    /// Output returned by every `exec`.
    pub fn set_exec_output(&self, output: ExecOutput) {
        self.lock().exec_output = output;
    }

    /// Exit code returned by every `wait`.
    pub fn set_wait_exit_code(&self, code: i64) {
        self.lock().wait_exit_code = code;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current state of the container named (or with id) `id_or_name`.
    #[must_use]
    pub fn state_of(&self, id_or_name: &str) -> ContainerState {
        let inner = self.lock();
        inner
            .find(id_or_name)
            .map_or(ContainerState::Absent, |i| inner.containers[i].state)
    }

    /// The blueprint a container was created from, if it was created
    /// through this runtime.
    #[must_use]
    pub fn blueprint_of(&self, id_or_name: &str) -> Option<ContainerBlueprint> {
        let inner = self.lock();
        inner
            .find(id_or_name)
            .and_then(|i| inner.containers[i].blueprint.clone())
    }

    #[must_use]
    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.lock().containers.iter().map(Container::info).collect()
    }

    async fn enter(&self, op: Op, call: RuntimeCall, target: &str) -> Result<(), RuntimeError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.latency.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        let aliases = inner.aliases(target);
        let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
        match inner.take_failure(op, &aliases) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn health(&self) -> Result<(), RuntimeError> {
        self.enter(Op::Health, RuntimeCall::Health, "").await
    }

    async fn create(&self, blueprint: &ContainerBlueprint) -> Result<String, RuntimeError> {
        self.enter(
            Op::Create,
            RuntimeCall::Create {
                name: blueprint.name.clone(),
                image: blueprint.image.clone(),
            },
            &blueprint.name,
        )
        .await?;

        let mut inner = self.lock();
        if inner.find(&blueprint.name).is_some() {
            return Err(RuntimeError::Conflict(format!(
                "container name {} is already in use",
                blueprint.name
            )));
        }
        if !inner.images.contains(&blueprint.image) {
            return Err(RuntimeError::NotFound(blueprint.image.clone()));
        }
        inner.next_id += 1;
        let id = format!("mem-{:04}", inner.next_id);
        inner.containers.push(Container {
            id: id.clone(),
            name: blueprint.name.clone(),
            state: ContainerState::Stopped,
            labels: blueprint.labels.clone(),
            blueprint: Some(blueprint.clone()),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter(Op::Start, RuntimeCall::Start { id: id.to_string() }, id)
            .await?;
        let mut inner = self.lock();
        let i = inner
            .find(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        inner.containers[i].state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter(Op::Stop, RuntimeCall::Stop { id: id.to_string() }, id)
            .await?;
        let mut inner = self.lock();
        let i = inner
            .find(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        inner.containers[i].state = ContainerState::Stopped;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.enter(
            Op::Remove,
            RuntimeCall::Remove {
                id: id.to_string(),
                force,
            },
            id,
        )
        .await?;
        let mut inner = self.lock();
        let i = inner
            .find(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if inner.containers[i].state == ContainerState::Running && !force {
            return Err(RuntimeError::Conflict(format!(
                "container {id} is running; stop it or force removal"
            )));
        }
        inner.containers.remove(i);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        self.enter(
            Op::Inspect,
            RuntimeCall::Inspect {
                name: name.to_string(),
            },
            name,
        )
        .await?;
        let inner = self.lock();
        // Exact name only, never a prefix or substring.
        Ok(inner
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(Container::info))
    }

    async fn list_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.enter(
            Op::List,
            RuntimeCall::ListByLabel {
                key: key.to_string(),
                value: value.to_string(),
            },
            "",
        )
        .await?;
        let inner = self.lock();
        Ok(inner
            .containers
            .iter()
            .filter(|c| c.labels.get(key).is_some_and(|v| v == value))
            .map(Container::info)
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.enter(
            Op::ImageExists,
            RuntimeCall::ImageExists {
                image: image.to_string(),
            },
            image,
        )
        .await?;
        Ok(self.lock().images.contains(image))
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.enter(
            Op::Pull,
            RuntimeCall::Pull {
                image: image.to_string(),
            },
            image,
        )
        .await?;
        self.lock().images.insert(image.to_string());
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        self.enter(Op::Wait, RuntimeCall::Wait { id: id.to_string() }, id)
            .await?;
        let mut inner = self.lock();
        let i = inner
            .find(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        inner.containers[i].state = ContainerState::Stopped;
        Ok(inner.wait_exit_code)
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.enter(
            Op::Exec,
            RuntimeCall::Exec {
                id: id.to_string(),
                command: command.to_vec(),
            },
            id,
        )
        .await?;
        let inner = self.lock();
        let i = inner
            .find(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if inner.containers[i].state != ContainerState::Running {
            return Err(RuntimeError::Conflict(format!("container {id} is not running")));
        }
        Ok(inner.exec_output.clone())
    }
}
