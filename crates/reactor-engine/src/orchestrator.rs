//! Single-container lifecycle: decide between reuse, restart, and create.
//!
//! | Current   | `up`                                          |
//! |-----------|-----------------------------------------------|
//! | Running   | nothing; return the existing container        |
//! | Stopped   | start it; a failed start is fatal             |
//! | Absent    | pull the image if missing, create, start      |
//!
//! `down` stops and removes whatever exists and succeeds without touching
//! the engine when nothing does.

use crate::error::ReactorError;
use crate::runtime::with_deadline;
use reactor_core::{
    ContainerBlueprint, ContainerInfo, ContainerRuntime, ContainerState, ExecOutput, RuntimeError,
    Timeouts,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Which branch of the state machine `up` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    AlreadyRunning,
    Started,
    Created,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Started => write!(f, "started"),
            Self::Created => write!(f, "created"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpOutcome {
    pub id: String,
    pub name: String,
    pub transition: Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownOutcome {
    /// No container by that name existed; the engine was not touched.
    NothingToDo,
    Removed { id: String },
}

impl fmt::Display for DownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToDo => write!(f, "nothing to do"),
            Self::Removed { .. } => write!(f, "removed"),
        }
    }
}

/// Drives one named container through the recovery state machine.
///
/// Cheap to share: hold it in an `Arc` and call it from many tasks.
/// Operations on the same name are serialized within this process.
#[derive(Debug)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    timeouts: Timeouts,
    locks: NameLocks,
}

type NameLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one name's lock; drops the map entry once nobody else wants it.
struct NameLock<'a> {
    locks: &'a NameLocks,
    name: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for NameLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
        }
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, timeouts: Timeouts) -> Self {
        Self {
            runtime,
            timeouts,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    async fn lock_name(&self, name: &str) -> NameLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        NameLock {
            locks: &self.locks,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Names with a lock entry. Entries exist only while an operation on the
    /// name is in flight or waiting.
    #[cfg(test)]
    fn locked_names(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Fails with [`ReactorError::EngineUnavailable`] if the engine cannot be
    /// reached.
    pub async fn health(&self) -> Result<(), ReactorError> {
        with_deadline("check", self.timeouts.operation(), self.runtime.health())
            .await
            .map_err(|e| ReactorError::runtime("reach", "container engine", e))
    }

    /// Brings the container described by `blueprint` to Running.
    pub async fn up(&self, blueprint: &ContainerBlueprint) -> Result<UpOutcome, ReactorError> {
        let _lock = self.lock_name(&blueprint.name).await;

        match self.inspect(&blueprint.name).await? {
            Some(existing) => self.converge(existing).await,
            None => self.create_and_start(blueprint).await,
        }
    }

    async fn converge(&self, existing: ContainerInfo) -> Result<UpOutcome, ReactorError> {
        match existing.state {
            ContainerState::Running => {
                debug!("{} is already running", existing.name);
                Ok(UpOutcome {
                    id: existing.id,
                    name: existing.name,
                    transition: Transition::AlreadyRunning,
                })
            }
            ContainerState::Stopped | ContainerState::Absent => {
                info!("Starting existing container {}", existing.name);
                with_deadline("start", self.timeouts.operation(), self.runtime.start(&existing.id))
                    .await
                    .map_err(|source| match source {
                        RuntimeError::Unavailable(reason) => ReactorError::EngineUnavailable(reason),
                        source => {
                            error!("Container {} failed to start: {source}", existing.name);
                            ReactorError::RestartFailed {
                                name: existing.name.clone(),
                                source,
                            }
                        }
                    })?;
                Ok(UpOutcome {
                    id: existing.id,
                    name: existing.name,
                    transition: Transition::Started,
                })
            }
        }
    }

    async fn create_and_start(
        &self,
        blueprint: &ContainerBlueprint,
    ) -> Result<UpOutcome, ReactorError> {
        self.ensure_image(&blueprint.image).await?;

        info!("Creating container {}", blueprint.name);
        let id = match with_deadline(
            "create",
            self.timeouts.operation(),
            self.runtime.create(blueprint),
        )
        .await
        {
            Ok(id) => id,
            Err(RuntimeError::Conflict(reason)) => {
                // Someone else created it between inspect and create.
                warn!("{} appeared concurrently ({reason}), converging", blueprint.name);
                return match self.inspect(&blueprint.name).await? {
                    Some(existing) => self.converge(existing).await,
                    None => Err(ReactorError::runtime(
                        "create",
                        &blueprint.name,
                        RuntimeError::Conflict(reason),
                    )),
                };
            }
            Err(e) => return Err(ReactorError::runtime("create", &blueprint.name, e)),
        };

        with_deadline("start", self.timeouts.operation(), self.runtime.start(&id))
            .await
            .map_err(|e| ReactorError::runtime("start", &blueprint.name, e))?;

        info!("Started {} ({})", blueprint.name, short_id(&id));
        Ok(UpOutcome {
            id,
            name: blueprint.name.clone(),
            transition: Transition::Created,
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ReactorError> {
        let present = with_deadline(
            "inspect image",
            self.timeouts.operation(),
            self.runtime.image_exists(image),
        )
        .await
        .map_err(|e| ReactorError::runtime("inspect image", image, e))?;

        if !present {
            info!("Pulling {image}");
            with_deadline("pull", self.timeouts.pull(), self.runtime.pull(image))
                .await
                .map_err(|e| ReactorError::runtime("pull", image, e))?;
        }
        Ok(())
    }

    /// Stops and removes the container named `name`, if any.
    pub async fn down(&self, name: &str) -> Result<DownOutcome, ReactorError> {
        let _lock = self.lock_name(name).await;

        let Some(existing) = self.inspect(name).await? else {
            debug!("{name} does not exist, nothing to remove");
            return Ok(DownOutcome::NothingToDo);
        };

        info!("Stopping {name}");
        with_deadline("stop", self.timeouts.operation(), self.runtime.stop(&existing.id))
            .await
            .map_err(|e| ReactorError::runtime("stop", name, e))?;

        self.remove_with_retry(name, &existing.id).await?;
        info!("Removed {name}");
        Ok(DownOutcome::Removed { id: existing.id })
    }

    async fn remove_with_retry(&self, name: &str, id: &str) -> Result<(), ReactorError> {
        let first = with_deadline("remove", self.timeouts.operation(), self.runtime.remove(id, false)).await;
        match first {
            Ok(()) | Err(RuntimeError::NotFound(_)) => return Ok(()),
            Err(RuntimeError::Unavailable(reason)) => {
                return Err(ReactorError::EngineUnavailable(reason));
            }
            Err(e) => warn!("Removing {name} failed ({e}), retrying once"),
        }

        match with_deadline("remove", self.timeouts.operation(), self.runtime.remove(id, true)).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(ReactorError::runtime("remove", name, e)),
        }
    }

    /// Current lifecycle state of the container named `name`.
    pub async fn state(&self, name: &str) -> Result<ContainerState, ReactorError> {
        Ok(self
            .inspect(name)
            .await?
            .map_or(ContainerState::Absent, |info| info.state))
    }

    /// Runs `command` in the container named `name`, which must be running.
    pub async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput, ReactorError> {
        let running = self
            .inspect(name)
            .await?
            .filter(|info| info.state == ContainerState::Running);
        let Some(info) = running else {
            return Err(ReactorError::NotRunning {
                name: name.to_string(),
            });
        };

        debug!("Running {command:?} in {name}");
        with_deadline("exec", self.timeouts.operation(), self.runtime.exec(&info.id, command))
            .await
            .map_err(|e| ReactorError::runtime("exec in", name, e))
    }

    /// Looks the container up by its exact name.
    pub async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, ReactorError> {
        with_deadline("inspect", self.timeouts.operation(), self.runtime.inspect(name))
            .await
            .map_err(|e| ReactorError::runtime("inspect", name, e))
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
