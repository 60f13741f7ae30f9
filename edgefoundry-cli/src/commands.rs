//! CLI subcommand handlers.

use anyhow::Context;
use dialoguer::Confirm;

use crate::client::WorkerClient;
use crate::{Commands, ModelsAction};
use edgefoundry_core::{
    EdgeError, MetricsSummary, ModelRegistry, Supervisor, TelemetryRecord, TelemetryStore,
    WorkspacePaths, load_config, workspace,
};

/// Render a core error as `"{kind}: {reason}"`.
fn edge_err(err: impl Into<EdgeError>) -> anyhow::Error {
    let err = err.into();
    anyhow::anyhow!("{}: {}", err.kind(), err.reason())
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, paths: &WorkspacePaths) -> anyhow::Result<()> {
    match command {
        Commands::Init => handle_init(paths),
        Commands::Deploy { model, config } => handle_deploy(paths, &model, config.as_deref()),
        Commands::Start => handle_start(paths).await,
        Commands::Stop => handle_stop(paths).await,
        Commands::Status => handle_status(paths).await,
        Commands::Logs { lines } => handle_logs(paths, lines),
        Commands::Clean {
            force,
            keep_models,
            keep_config,
        } => handle_clean(paths, force, keep_models, keep_config),
        Commands::Metrics {
            limit,
            summary,
            all,
        } => handle_metrics(paths, limit, summary, all).await,
        Commands::Models { action } => handle_models(action, paths).await,
        Commands::Worker => crate::worker::run(paths).await,
    }
}

fn handle_init(paths: &WorkspacePaths) -> anyhow::Result<()> {
    let report = workspace::init(paths).map_err(edge_err)?;
    for path in &report.created {
        println!("Created {}", path.display());
    }
    for path in &report.existing {
        println!("Exists  {}", path.display());
    }
    println!("Edge Foundry initialized in {}", paths.working_dir().display());
    Ok(())
}

fn handle_deploy(
    paths: &WorkspacePaths,
    model: &std::path::Path,
    config: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    println!("Deploying model: {}", model.display());
    let report = workspace::deploy(paths, model, config).map_err(edge_err)?;
    println!("Model copied to {}", report.model_file.display());
    if report.config_copied {
        println!("Config copied to {}", paths.config_file().display());
    } else {
        println!(
            "Config updated at {} (model_path: {})",
            paths.config_file().display(),
            report.config.model_path
        );
    }
    println!("Deployment completed.");
    Ok(())
}

async fn handle_start(paths: &WorkspacePaths) -> anyhow::Result<()> {
    let supervisor = Supervisor::for_workspace(paths.clone()).map_err(edge_err)?;
    println!("Starting Edge Foundry agent...");
    let pid = supervisor.start().await.map_err(edge_err)?;
    let url = load_config(paths)
        .map(|c| c.worker_url())
        .unwrap_or_else(|_| "http://127.0.0.1:8000".into());
    println!("Agent started (PID {pid})");
    println!("API available at {url}");
    println!("Logs: {}", paths.log_file().display());
    Ok(())
}

async fn handle_stop(paths: &WorkspacePaths) -> anyhow::Result<()> {
    let supervisor = Supervisor::for_workspace(paths.clone()).map_err(edge_err)?;
    let pid = supervisor.stop().await.map_err(edge_err)?;
    println!("Agent stopped (PID {pid})");
    Ok(())
}

async fn handle_status(paths: &WorkspacePaths) -> anyhow::Result<()> {
    let supervisor = Supervisor::for_workspace(paths.clone()).map_err(edge_err)?;
    let status = supervisor.status().await;

    if status.running {
        println!("Status:  running");
        if let Some(pid) = status.pid {
            println!("PID:     {pid}");
        }
        if let Some(uptime) = status.uptime_secs {
            println!("Uptime:  {}", format_uptime(uptime));
        }
        if let Some(memory) = status.memory_mb {
            println!("Memory:  {memory:.1} MB");
        }
        if let Some(cpu) = status.cpu_percent {
            println!("CPU:     {cpu:.1}%");
        }
        if let Ok(config) = load_config(paths) {
            println!("API:     {}", config.worker_url());
        }
    } else {
        println!("Status:  not running");
        match status.config {
            Some(config) => {
                println!("Model:   {}", config.model_path);
                println!("Runtime: {}", config.runtime);
                println!("Device:  {}", config.device);
            }
            None => println!("No configuration found. Run 'edgefoundry init' first."),
        }
    }
    Ok(())
}

fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

fn handle_logs(paths: &WorkspacePaths, lines: usize) -> anyhow::Result<()> {
    let supervisor = Supervisor::for_workspace(paths.clone()).map_err(edge_err)?;
    for line in supervisor.tail_logs(lines).map_err(edge_err)? {
        println!("{line}");
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn handle_clean(
    paths: &WorkspacePaths,
    force: bool,
    keep_models: bool,
    keep_config: bool,
) -> anyhow::Result<()> {
    let supervisor = Supervisor::for_workspace(paths.clone()).map_err(edge_err)?;
    let plan = workspace::clean_plan(&supervisor, keep_models, keep_config).map_err(|e| {
        if matches!(e, EdgeError::Process(edgefoundry_core::ProcessError::AlreadyRunning { .. })) {
            anyhow::anyhow!("Agent is currently running. Stop it first with 'edgefoundry stop'.")
        } else {
            edge_err(e)
        }
    })?;

    if plan.is_empty() {
        println!("Working directory is already clean.");
        return Ok(());
    }

    if !plan.files.is_empty() || !plan.dirs.is_empty() {
        println!("The following items will be removed:");
        for file in &plan.files {
            println!("  {}", file.display());
        }
        for dir in &plan.dirs {
            println!("  {}/", dir.display());
        }
        if !force && !confirm("Proceed with the cleanup?")? {
            println!("Cleanup cancelled.");
            return Ok(());
        }
    }

    let remove_telemetry = match &plan.telemetry_db {
        Some(db) => force || confirm(&format!("Remove telemetry database ({})?", db.display()))?,
        None => false,
    };

    let removed = workspace::clean(&plan, remove_telemetry).map_err(edge_err)?;
    if removed > 0 {
        println!("Cleanup completed. Removed {removed} items.");
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}

/// Aggregates plus the rows to list: the latest `limit`, or every row.
fn load_metrics(
    store: &TelemetryStore,
    limit: usize,
    all: bool,
) -> Result<(MetricsSummary, Vec<TelemetryRecord>), EdgeError> {
    let mut summary = store.summary(limit)?;
    let rows = if all {
        store.all_records()?
    } else {
        std::mem::take(&mut summary.recent)
    };
    Ok((summary, rows))
}

async fn handle_metrics(
    paths: &WorkspacePaths,
    limit: usize,
    summary_only: bool,
    all: bool,
) -> anyhow::Result<()> {
    let config = load_config(paths).ok();
    let db = paths.telemetry_db(config.as_ref());
    if !db.exists() {
        println!("No telemetry data found. Run some inferences first.");
        return Ok(());
    }

    let store = TelemetryStore::open(&db).map_err(edge_err)?;
    let (summary, rows) = tokio::task::spawn_blocking(move || load_metrics(&store, limit, all))
        .await
        .context("telemetry query panicked")?
        .map_err(edge_err)?;

    if summary.total_count == 0 {
        println!("No telemetry data found. Run some inferences first.");
        return Ok(());
    }

    println!("Telemetry summary");
    println!("  Total inferences:       {}", summary.total_count);
    println!("  Average latency:        {:.2} ms", summary.avg_latency_ms);
    println!("  Average tokens/second:  {:.2}", summary.avg_tokens_per_second);
    println!("  Average memory usage:   {:.2} MB", summary.avg_memory_mb);
    if let (Some(first), Some(last)) = (&summary.first_timestamp, &summary.last_timestamp) {
        println!("  First inference:        {first}");
        println!("  Last inference:         {last}");
    }

    if summary_only {
        return Ok(());
    }

    println!();
    if all {
        println!("All inferences ({})", rows.len());
    } else {
        println!("Recent inferences (latest {})", rows.len());
    }
    println!(
        "{:<26} {:>7} {:>11} {:>7} {:>9} {:>10} {:>5}",
        "Timestamp", "Prompt", "Latency ms", "Tokens", "Tokens/s", "Memory MB", "Temp"
    );
    for r in &rows {
        println!(
            "{:<26} {:>7} {:>11.1} {:>7} {:>9.1} {:>10.1} {:>5}",
            r.timestamp,
            r.prompt_length,
            r.latency_ms,
            r.tokens_generated,
            r.tokens_per_second,
            r.memory_mb,
            r.temperature.map(|t| format!("{t:.1}")).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

async fn handle_models(action: ModelsAction, paths: &WorkspacePaths) -> anyhow::Result<()> {
    match action {
        ModelsAction::List => {
            let config = load_config(paths).map_err(edge_err)?;
            let registry = ModelRegistry::for_workspace(paths, &config).map_err(edge_err)?;
            for model in registry.models() {
                let marker = if registry.default_model() == Some(model.id.as_str()) {
                    " (default)"
                } else {
                    ""
                };
                println!("{}{marker}", model.id);
                println!("  Name:         {}", model.name);
                if !model.description.is_empty() {
                    println!("  Description:  {}", model.description);
                }
                println!("  Parameters:   {}", model.parameters);
                println!("  Quantization: {}", model.quantization);
                println!("  Context:      {}", model.context_length);
                println!("  Runtime:      {}", model.runtime);
                println!("  Path:         {}", model.model_path);
            }
            Ok(())
        }
        ModelsAction::Switch { model_id } => {
            let config = load_config(paths).map_err(edge_err)?;
            let client = WorkerClient::new(config.worker_url())?;
            let switched = client.switch_model(&model_id).await?;
            println!("Switched to {}", switched.model_id);
            if let Some(details) = switched.model_info.details {
                println!("  Name: {}", details.name);
                println!("  Path: {}", details.model_path);
            }
            Ok(())
        }
        ModelsAction::Current => {
            let config = load_config(paths).map_err(edge_err)?;
            let client = WorkerClient::new(config.worker_url())?;
            let info = client.current_model().await?;
            match (info.loaded, info.model_id, info.details) {
                (true, id, Some(details)) => {
                    println!("Current model: {}", id.unwrap_or_else(|| details.name.clone()));
                    println!("  Name:         {}", details.name);
                    println!("  Runtime:      {}", details.runtime);
                    println!("  Quantization: {}", details.quantization);
                    println!("  Path:         {}", details.model_path);
                }
                _ => println!("No model loaded"),
            }
            Ok(())
        }
    }
}
