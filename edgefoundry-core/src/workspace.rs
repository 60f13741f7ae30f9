//! Workspace setup and teardown: `init`, `deploy` and `clean`.

use std::path::{Path, PathBuf};

use crate::config::{AgentConfig, WorkspacePaths, read_config_file, save_config};
use crate::error::{ConfigError, EdgeError, ProcessError};
use crate::supervisor::Supervisor;

const GITIGNORE: &str = "*.pid\n*.log\nmodels/\n";

/// What `init` created. Existing artifacts are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub created: Vec<PathBuf>,
    pub existing: Vec<PathBuf>,
}

/// Create the working directory, models directory, default configuration
/// and `.gitignore`.
pub fn init(paths: &WorkspacePaths) -> Result<InitReport, EdgeError> {
    let mut report = InitReport::default();

    for dir in [paths.working_dir(), paths.models_dir()] {
        if dir.is_dir() {
            report.existing.push(dir);
        } else {
            std::fs::create_dir_all(&dir)?;
            report.created.push(dir);
        }
    }

    let config_file = paths.config_file();
    if config_file.exists() {
        report.existing.push(config_file);
    } else {
        save_config(paths, &AgentConfig::default())?;
        report.created.push(config_file);
    }

    let gitignore = paths.gitignore();
    if gitignore.exists() {
        report.existing.push(gitignore);
    } else {
        crate::persistence::atomic_write(&gitignore, GITIGNORE.as_bytes())?;
        report.created.push(gitignore);
    }

    tracing::info!(root = %paths.root().display(), created = report.created.len(), "Workspace initialized");
    Ok(report)
}

/// Outcome of `deploy`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub model_file: PathBuf,
    pub config: AgentConfig,
    /// Whether the configuration was copied from a file rather than updated.
    pub config_copied: bool,
}

/// Copy a model into the workspace and point the configuration at it.
///
/// With `config_file` the configuration is replaced by a copy of that file.
/// Otherwise the existing configuration (or the defaults) is updated to run
/// the deployed model locally.
pub fn deploy(
    paths: &WorkspacePaths,
    model_file: &Path,
    config_file: Option<&Path>,
) -> Result<DeployReport, EdgeError> {
    if !model_file.is_file() {
        return Err(ConfigError::FileNotFound {
            path: model_file.to_path_buf(),
        }
        .into());
    }
    if let Some(config_file) = config_file {
        if !config_file.is_file() {
            return Err(ConfigError::FileNotFound {
                path: config_file.to_path_buf(),
            }
            .into());
        }
    }
    let file_name = model_file.file_name().ok_or_else(|| ConfigError::Invalid {
        message: format!("{} has no file name", model_file.display()),
    })?;

    std::fs::create_dir_all(paths.models_dir())?;
    let target = paths.models_dir().join(file_name);
    std::fs::copy(model_file, &target)?;
    tracing::info!(from = %model_file.display(), to = %target.display(), "Model copied");

    let (config, config_copied) = match config_file {
        Some(source) => {
            std::fs::copy(source, paths.config_file())?;
            let config = read_config_file(paths)?.unwrap_or_default();
            (config, true)
        }
        None => {
            let defaults = AgentConfig::default();
            let mut config = read_config_file(paths)?.unwrap_or_default();
            config.model_path = format!("./models/{}", file_name.to_string_lossy());
            config.runtime = defaults.runtime;
            config.device = defaults.device;
            config.host = defaults.host;
            config.port = defaults.port;
            save_config(paths, &config)?;
            (config, false)
        }
    };

    Ok(DeployReport {
        model_file: target,
        config,
        config_copied,
    })
}

/// Artifacts `clean` would remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    /// Offered separately; removed only on request.
    pub telemetry_db: Option<PathBuf>,
}

impl CleanPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty() && self.telemetry_db.is_none()
    }
}

/// List what `clean` would remove. Refused while the worker is running.
pub fn clean_plan(
    supervisor: &Supervisor,
    keep_models: bool,
    keep_config: bool,
) -> Result<CleanPlan, EdgeError> {
    if let Some(pid) = supervisor.live_pid() {
        return Err(ProcessError::AlreadyRunning { pid }.into());
    }
    let paths = supervisor.paths();
    let mut plan = CleanPlan::default();

    for file in [paths.pid_file(), paths.log_file()] {
        if file.is_file() {
            plan.files.push(file);
        }
    }
    if !keep_config && paths.config_file().is_file() {
        plan.files.push(paths.config_file());
    }
    if !keep_models && paths.models_dir().is_dir() {
        plan.dirs.push(paths.models_dir());
    }

    let config = read_config_file(paths).ok().flatten();
    let db = paths.telemetry_db(config.as_ref());
    if db.is_file() {
        plan.telemetry_db = Some(db);
    }
    Ok(plan)
}

/// Remove the planned artifacts and return how many were removed.
pub fn clean(plan: &CleanPlan, remove_telemetry: bool) -> Result<usize, EdgeError> {
    let mut removed = 0;
    for file in &plan.files {
        if file.exists() {
            std::fs::remove_file(file)?;
            tracing::info!(path = %file.display(), "Removed");
            removed += 1;
        }
    }
    for dir in &plan.dirs {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
            tracing::info!(path = %dir.display(), "Removed");
            removed += 1;
        }
    }
    if let (true, Some(db)) = (remove_telemetry, &plan.telemetry_db) {
        if db.exists() {
            std::fs::remove_file(db)?;
            for suffix in ["-wal", "-shm"] {
                let mut side = db.clone().into_os_string();
                side.push(suffix);
                let side = PathBuf::from(side);
                if side.exists() {
                    std::fs::remove_file(&side)?;
                }
            }
            tracing::info!(path = %db.display(), "Removed telemetry database");
            removed += 1;
        }
    }
    Ok(removed)
}
