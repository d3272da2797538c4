use clap::{Parser, Subcommand};
use reactor_core::{MountSpec, PortMapping};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reactor")]
#[command(version)]
#[command(about = "Deterministic, isolated development containers", long_about = None)]
pub struct Cli {
    /// Account the containers belong to (overrides REACTOR_ACCOUNT and config.toml)
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Prefix every container name (overrides REACTOR_ISOLATION_PREFIX)
    #[arg(long, global = true)]
    pub isolation_prefix: Option<String>,

    /// Image to run instead of the configured default
    #[arg(long, global = true)]
    pub image: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start (or reuse) the container for a project
    Up {
        /// Project directory (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Run without any mounts to observe a tool safely
        #[arg(long)]
        discovery: bool,
        /// Expose the host's Docker socket inside the container
        #[arg(long)]
        host_docker: bool,
        /// Publish a port on 127.0.0.1
        #[arg(short = 'p', long = "port", value_name = "HOST:CONTAINER")]
        ports: Vec<PortMapping>,
        /// Extra bind mount
        #[arg(long = "mount", value_name = "SRC:DST[:ro]")]
        mounts: Vec<MountSpec>,
    },
    /// Stop and remove the container for a project
    Down {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        discovery: bool,
    },
    /// Show the container state for a project
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        discovery: bool,
    },
    /// Multi-service workspaces (reactor-workspace.yml)
    Workspace {
        /// Workspace file, or the directory containing it
        #[arg(short = 'f', long = "file", default_value = ".", global = true)]
        path: PathBuf,

        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Remove scoped temporary state and the helper containers of a scope
    Clean {
        /// Scope token; every path must contain it as a full segment
        #[arg(long)]
        scope: String,
        /// Absolute paths under the system temp directory
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// Check the workspace file without touching the container engine
    Validate,
    /// Start every service
    Up,
    /// Stop and remove every service
    Down,
    /// Show every service's container state
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run a command in every running service container
    Exec {
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}
