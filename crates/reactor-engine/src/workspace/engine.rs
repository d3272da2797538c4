use super::report::{ServiceFailure, WorkspaceReport};
use super::{ConfigResolver, SERVICE_MOUNT_TARGET};
use crate::error::ReactorError;
use crate::orchestrator::{DownOutcome, Orchestrator, UpOutcome};
use reactor_core::{
    BlueprintBuilder, ContainerBlueprint, ContainerState, ExecOutput, MountSpec, NameScheme,
    Service, Workspace, labels,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observed state of one service's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub container: String,
    pub state: ContainerState,
}

/// Everything a service task needs, owned so it can move into the task.
struct ServiceTarget {
    blueprint: ContainerBlueprint,
    orchestrator: Arc<Orchestrator>,
}

/// Runs one operation across every service of a workspace concurrently.
///
/// Services are independent: one failing never cancels the others, and the
/// report holds exactly one entry per service.
#[derive(Debug)]
pub struct WorkspaceEngine {
    orchestrator: Arc<Orchestrator>,
    resolver: Arc<dyn ConfigResolver>,
    scheme: NameScheme,
    default_account: String,
    max_parallel: usize,
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl WorkspaceEngine {
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        resolver: Arc<dyn ConfigResolver>,
        scheme: NameScheme,
        default_account: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
            scheme,
            default_account: default_account.into(),
            max_parallel: 8,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Caps how many services are worked on at once. Zero is treated as one.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Bounds a whole command. Services still running at the deadline are
    /// aborted and reported as cancelled.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts the command in flight.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The blueprint a service's container is built from.
    pub fn blueprint(
        &self,
        workspace: &Workspace,
        service: &Service,
    ) -> Result<ContainerBlueprint, ReactorError> {
        let account = service.effective_account(&self.default_account);
        let config = self.resolver.resolve(&service.path, account)?;
        Ok(BlueprintBuilder::new(&config)
            .mount(MountSpec::bind(&service.path, SERVICE_MOUNT_TARGET))
            .label(labels::WORKSPACE, &workspace.hash)
            .label(labels::SERVICE, &service.name)
            .build(&self.scheme))
    }

    pub async fn up(
        &self,
        workspace: &Workspace,
    ) -> Result<WorkspaceReport<UpOutcome>, ReactorError> {
        self.fan_out(workspace, "up", |target| async move {
            target.orchestrator.up(&target.blueprint).await
        })
        .await
    }

    pub async fn down(
        &self,
        workspace: &Workspace,
    ) -> Result<WorkspaceReport<DownOutcome>, ReactorError> {
        self.fan_out(workspace, "down", |target| async move {
            target.orchestrator.down(&target.blueprint.name).await
        })
        .await
    }

    /// Runs `command` in every service's (running) container.
    pub async fn exec(
        &self,
        workspace: &Workspace,
        command: Vec<String>,
    ) -> Result<WorkspaceReport<ExecOutput>, ReactorError> {
        let command = Arc::new(command);
        self.fan_out(workspace, "exec", move |target| {
            let command = Arc::clone(&command);
            async move {
                target
                    .orchestrator
                    .exec(&target.blueprint.name, &command)
                    .await
            }
        })
        .await
    }

    pub async fn list(
        &self,
        workspace: &Workspace,
    ) -> Result<WorkspaceReport<ServiceStatus>, ReactorError> {
        self.fan_out(workspace, "list", |target| async move {
            let state = target.orchestrator.state(&target.blueprint.name).await?;
            Ok(ServiceStatus {
                container: target.blueprint.name,
                state,
            })
        })
        .await
    }

    async fn fan_out<T, F, Fut>(
        &self,
        workspace: &Workspace,
        operation: &'static str,
        task: F,
    ) -> Result<WorkspaceReport<T>, ReactorError>
    where
        T: Send + 'static,
        F: Fn(ServiceTarget) -> Fut,
        Fut: Future<Output = Result<T, ReactorError>> + Send + 'static,
    {
        // One unreachable engine is one error, not N identical ones.
        self.orchestrator.health().await?;

        info!(
            "Workspace {operation}: {} service(s), up to {} at a time",
            workspace.services.len(),
            self.max_parallel
        );

        let mut report = WorkspaceReport::new(operation);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for service in workspace.services.values() {
            let blueprint = match self.blueprint(workspace, service) {
                Ok(blueprint) => blueprint,
                Err(e) => {
                    report.record(&service.name, Err(ServiceFailure::Failed(e)));
                    continue;
                }
            };
            let work = task(ServiceTarget {
                blueprint,
                orchestrator: Arc::clone(&self.orchestrator),
            });
            let semaphore = Arc::clone(&semaphore);
            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ReactorError::Cancelled)?;
                work.await
            });
            pending.insert(handle.id(), service.name.clone());
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    collect(joined, &mut pending, &mut report);
                }
                () = self.cancel.cancelled() => {
                    warn!("Workspace {operation} cancelled, aborting unfinished services");
                    interrupted = true;
                    break;
                }
                () = &mut expired => {
                    warn!("Workspace {operation} hit its deadline, aborting unfinished services");
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            tasks.abort_all();
            // Tasks that finished before the abort still report their result.
            while let Some(joined) = tasks.join_next_with_id().await {
                collect(joined, &mut pending, &mut report);
            }
        }
        for (_, service) in pending.drain() {
            report.record(service, Err(ServiceFailure::Cancelled));
        }

        debug!(
            "Workspace {operation} finished: {} ok, {} failed",
            report.successes().count(),
            report.failures().count()
        );
        Ok(report)
    }
}

fn collect<T>(
    joined: Result<(tokio::task::Id, Result<T, ReactorError>), JoinError>,
    pending: &mut HashMap<tokio::task::Id, String>,
    report: &mut WorkspaceReport<T>,
) {
    match joined {
        Ok((id, result)) => {
            if let Some(service) = pending.remove(&id) {
                report.record(service, result.map_err(ServiceFailure::Failed));
            }
        }
        Err(error) => {
            if let Some(service) = pending.remove(&error.id()) {
                let failure = if error.is_panic() {
                    ServiceFailure::Panicked(panic_message(error))
                } else {
                    ServiceFailure::Cancelled
                };
                report.record(service, Err(failure));
            }
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(error) => error.to_string(),
    }
}
