use anyhow::{Context as _, Result, bail};
use reactor_core::blueprint::DEFAULT_WORKDIR;
use reactor_core::{
    BlueprintBuilder, ContainerBlueprint, ContainerRuntime, ContainerState, MountSpec, NameScheme,
    PortMapping, Settings, Workspace,
};
use reactor_engine::runtime::DockerRuntime;
use reactor_engine::workspace::ConfigResolver;
use reactor_engine::{
    CleanupGuard, CleanupOutcome, DefaultResolver, Orchestrator, ServiceFailure, SettingsLoader,
    WorkspaceEngine, WorkspaceReport,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cli::{Cli, Commands, WorkspaceCommands};
use crate::style;

/// Settings after file, environment, and flag overrides are applied.
struct Context {
    settings: Settings,
    scheme: NameScheme,
    account: String,
    image: String,
}

impl Context {
    async fn load(cli: &Cli) -> Result<Self> {
        let loader = SettingsLoader::load().await.context("Failed to load settings")?;
        let account_source = if cli.account.is_some() {
            "--account".to_string()
        } else {
            loader.explain("account").to_string()
        };
        let mut settings = loader.settings;
        if let Some(account) = &cli.account {
            settings.account = Some(account.clone());
        }
        if let Some(prefix) = &cli.isolation_prefix {
            settings.isolation_prefix = Some(prefix.clone());
        }
        debug!(
            "Using account {} ({account_source})",
            settings.effective_account()
        );

        Ok(Self {
            scheme: NameScheme::new(settings.isolation_prefix.as_deref()),
            account: settings.effective_account().to_string(),
            image: cli
                .image
                .clone()
                .unwrap_or_else(|| settings.default_image.clone()),
            settings,
        })
    }

    fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>> {
        let runtime = DockerRuntime::connect().context("Failed to set up the Docker client")?;
        Ok(Arc::new(runtime))
    }

    fn orchestrator(&self) -> Result<Arc<Orchestrator>> {
        Ok(Arc::new(Orchestrator::new(
            self.runtime()?,
            self.settings.timeouts,
        )))
    }

    fn resolver(&self) -> Arc<DefaultResolver> {
        Arc::new(DefaultResolver::new(&self.image))
    }

    fn project_blueprint(
        &self,
        path: &Path,
        discovery: bool,
        host_docker: bool,
        ports: &[PortMapping],
        mounts: &[MountSpec],
    ) -> Result<ContainerBlueprint> {
        let root = std::fs::canonicalize(path)
            .with_context(|| format!("Project directory {} not found", path.display()))?;
        let config = self.resolver().resolve(&root, &self.account)?;
        let cwd = std::env::current_dir().context("Failed to read the current directory")?;
        let extra = mounts.iter().cloned().map(|mut mount| {
            if mount.source.is_relative() {
                mount.source = cwd.join(&mount.source);
            }
            mount
        });

        Ok(BlueprintBuilder::new(&config)
            .mount(MountSpec::bind(&root, DEFAULT_WORKDIR))
            .mounts(extra)
            .ports(ports.iter().copied())
            .discovery(discovery)
            .host_integration(host_docker)
            .build(&self.scheme))
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli).await?;

    match &cli.command {
        Commands::Up {
            path,
            discovery,
            host_docker,
            ports,
            mounts,
        } => {
            let blueprint = ctx.project_blueprint(path, *discovery, *host_docker, ports, mounts)?;
            if *host_docker && !*discovery {
                println!(
                    "{} Host Docker socket is exposed inside {}",
                    style::WARN,
                    blueprint.name
                );
            }
            let orchestrator = ctx.orchestrator()?;
            orchestrator.health().await?;
            let outcome = orchestrator.up(&blueprint).await?;
            println!("{} {} ({})", style::CHECK, outcome.name, outcome.transition);
        }
        Commands::Down { path, discovery } => {
            let blueprint = ctx.project_blueprint(path, *discovery, false, &[], &[])?;
            let orchestrator = ctx.orchestrator()?;
            orchestrator.health().await?;
            let outcome = orchestrator.down(&blueprint.name).await?;
            println!("{} {} ({outcome})", style::CHECK, blueprint.name);
        }
        Commands::Status { path, discovery } => {
            let blueprint = ctx.project_blueprint(path, *discovery, false, &[], &[])?;
            let orchestrator = ctx.orchestrator()?;
            orchestrator.health().await?;
            let state = orchestrator.state(&blueprint.name).await?;
            println!("{}: {state}", blueprint.name);
        }
        Commands::Workspace { path, command } => workspace(&ctx, path, command).await?,
        Commands::Clean { scope, paths } => clean(&ctx, scope, paths).await?,
    }

    Ok(())
}

async fn load_workspace(path: &Path) -> Result<Workspace> {
    match reactor_engine::workspace::load(path).await? {
        Some(workspace) => Ok(workspace),
        None => bail!(
            "No reactor-workspace.yml found in {}",
            path.display()
        ),
    }
}

async fn workspace(ctx: &Context, path: &Path, command: &WorkspaceCommands) -> Result<()> {
    let workspace = load_workspace(path).await?;

    if matches!(command, WorkspaceCommands::Validate) {
        println!(
            "{} {} (version {}, {} service(s))",
            style::CHECK,
            workspace.file.display(),
            workspace.version,
            workspace.services.len()
        );
        for service in workspace.services.values() {
            println!(
                "  {} {} -> {} [{}]",
                style::DOT,
                service.name,
                service.path.display(),
                service.effective_account(&ctx.account)
            );
        }
        return Ok(());
    }

    let engine = WorkspaceEngine::new(
        ctx.orchestrator()?,
        ctx.resolver(),
        ctx.scheme.clone(),
        &ctx.account,
    )
    .with_max_parallel(ctx.settings.max_parallel);

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling unfinished services");
            token.cancel();
        }
    });

    match command {
        WorkspaceCommands::Validate => Ok(()),
        WorkspaceCommands::Up => {
            let report = engine.up(&workspace).await?;
            print_report(&report, |outcome| format!("{} ({})", outcome.name, outcome.transition))
        }
        WorkspaceCommands::Down => {
            let report = engine.down(&workspace).await?;
            print_report(&report, ToString::to_string)
        }
        WorkspaceCommands::List { json } => {
            let report = engine.list(&workspace).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&list_rows(&report))?);
                return summarize(&report);
            }
            print_report(&report, |status| format!("{}: {}", status.container, status.state))
        }
        WorkspaceCommands::Exec { command } => {
            let report = engine.exec(&workspace, command.clone()).await?;
            for (service, result) in report.iter() {
                if let Ok(output) = result {
                    println!("==> {service} (exit {})", output.exit_code);
                    print!("{}", output.stdout);
                    if !output.stderr.is_empty() {
                        print!("{}", output.stderr);
                    }
                }
            }
            let nonzero = report.successes().filter(|(_, o)| !o.success()).count();
            print_report(&report, |output| format!("exit {}", output.exit_code))?;
            if nonzero > 0 {
                bail!("{nonzero} service(s) exited non-zero");
            }
            Ok(())
        }
    }
}

fn print_report<T>(report: &WorkspaceReport<T>, describe: impl Fn(&T) -> String) -> Result<()> {
    for (service, result) in report.iter() {
        match result {
            Ok(value) => println!("{} {service}: {}", style::CHECK, describe(value)),
            Err(ServiceFailure::Cancelled) => {
                println!("{} {service}: {}", style::WARN, ServiceFailure::Cancelled);
            }
            Err(failure) => println!("{} {service}: {failure}", style::CROSS),
        }
    }
    summarize(report)
}

fn summarize<T>(report: &WorkspaceReport<T>) -> Result<()> {
    let failed = report.failures().count();
    if failed > 0 {
        bail!(
            "workspace {} failed for {failed} of {} service(s)",
            report.operation,
            report.len()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ListRow<'a> {
    service: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ContainerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn list_rows(report: &WorkspaceReport<reactor_engine::ServiceStatus>) -> Vec<ListRow<'_>> {
    report
        .iter()
        .map(|(service, result)| match result {
            Ok(status) => ListRow {
                service,
                container: Some(&status.container),
                state: Some(status.state),
                error: None,
            },
            Err(failure) => ListRow {
                service,
                container: None,
                state: None,
                error: Some(failure.to_string()),
            },
        })
        .collect()
}

async fn clean(ctx: &Context, scope: &str, paths: &[PathBuf]) -> Result<()> {
    let guard = CleanupGuard::new(
        ctx.runtime()?,
        scope,
        &ctx.settings.helper_image,
        ctx.scheme.clone(),
        ctx.settings.timeouts,
    );

    // Refuse the whole command before removing anything.
    for path in paths {
        guard.check(path)?;
    }

    for path in paths {
        let outcome = guard
            .remove(path)
            .await
            .with_context(|| format!("Failed to clean {}", path.display()))?;
        let verb = match outcome {
            CleanupOutcome::AlreadyGone => "already gone",
            CleanupOutcome::Removed => "removed",
            CleanupOutcome::RemovedWithHelper => "removed with helper",
        };
        println!("{} {} ({verb})", style::CHECK, path.display());
    }

    match guard.reclaim_scope().await {
        Ok(0) => {}
        Ok(n) => println!("{} Reclaimed {n} helper container(s)", style::CHECK),
        Err(e) => println!(
            "{} Skipped container reclaim for scope {scope}: {}",
            style::WARN,
            reactor_engine::error::render_chain(&e)
        ),
    }
    Ok(())
}
