//! Edge Foundry CLI: deploy, supervise and query a local inference agent.
//!
//! The same binary is also the agent itself: `edgefoundry worker` runs the
//! HTTP front end that `edgefoundry start` launches in the background.

mod client;
mod commands;
mod worker;

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use edgefoundry_core::WorkspacePaths;

/// Edge Foundry: run and monitor local LLM inference
#[derive(Parser, Debug)]
#[command(name = "edgefoundry", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Create the working directory and a default configuration
    Init,
    /// Copy a model into the workspace and point the configuration at it
    Deploy {
        /// Path to the model file to deploy
        #[arg(short, long)]
        model: PathBuf,
        /// Configuration file to install instead of updating the current one
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Start the agent in the background
    Start,
    /// Stop the running agent
    Stop,
    /// Show whether the agent is running
    Status,
    /// Show the agent log
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Remove logs, PID file, configuration and deployed models
    Clean {
        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
        /// Keep deployed model files
        #[arg(long)]
        keep_models: bool,
        /// Keep the configuration file
        #[arg(long)]
        keep_config: bool,
    },
    /// Show inference telemetry
    Metrics {
        /// Number of recent records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Only show aggregate statistics
        #[arg(short, long, conflicts_with = "all")]
        summary: bool,
        /// List every recorded inference instead of the latest `limit`
        #[arg(short, long)]
        all: bool,
    },
    /// List, inspect and switch models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Run the agent in the foreground (launched by `start`)
    #[command(hide = true)]
    Worker,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ModelsAction {
    /// List the models in the registry
    List,
    /// Switch the running agent to another model
    Switch {
        /// Model id from the registry
        model_id: String,
    },
    /// Show the model loaded in the running agent
    Current,
}

/// Absolute workspace root. Only `init` may name a directory that does not
/// exist yet.
fn resolve_workspace(workspace: &Path, command: &Commands) -> anyhow::Result<PathBuf> {
    if workspace.is_dir() {
        return workspace
            .canonicalize()
            .with_context(|| format!("cannot resolve workspace {}", workspace.display()));
    }
    if workspace.exists() {
        anyhow::bail!("workspace {} is not a directory", workspace.display());
    }
    if !matches!(command, Commands::Init) {
        anyhow::bail!(
            "workspace {} does not exist. Run 'edgefoundry -w {} init' first.",
            workspace.display(),
            workspace.display()
        );
    }
    std::path::absolute(workspace)
        .with_context(|| format!("cannot resolve workspace {}", workspace.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = resolve_workspace(&cli.workspace, &cli.command)?;
    let paths = WorkspacePaths::new(&workspace);
    let is_worker = matches!(cli.command, Commands::Worker);

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if is_worker => "info",
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // The worker's stderr is the redirected agent log.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(!is_worker)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // JSON file layer for structured logging
    let log_dir = if paths.working_dir().is_dir() {
        paths.json_log_dir()
    } else {
        directories::ProjectDirs::from("dev", "edgefoundry", "edgefoundry")
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(std::env::temp_dir)
    };
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "edgefoundry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command, &paths).await
}
