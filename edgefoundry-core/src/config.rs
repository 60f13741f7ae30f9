//! Configuration system for Edge Foundry.
//!
//! Uses `figment` for layered configuration: defaults -> workspace YAML file
//! -> environment. The agent configuration lives at
//! `.edgefoundry/edgefoundry.yaml` inside the workspace directory; its keys
//! are shared with every other tool that reads the same workspace.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Name of the working subdirectory holding every runtime artifact.
pub const WORKING_DIR: &str = ".edgefoundry";
const CONFIG_FILE: &str = "edgefoundry.yaml";
const PID_FILE: &str = "agent.pid";
const LOG_FILE: &str = "agent.log";
const MODELS_DIR: &str = "models";
const TELEMETRY_DB: &str = "telemetry.db";

/// Agent configuration as stored in `edgefoundry.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model file used when no registry document is configured.
    pub model_path: String,
    /// Runtime tag for `model_path`.
    pub runtime: String,
    /// Informational device label (e.g. "local").
    pub device: String,
    /// Bind address of the worker.
    pub host: String,
    /// Port of the worker.
    pub port: u16,
    /// Optional path to the demo-model registry document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_registry: Option<PathBuf>,
    /// Optional path to the telemetry database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_db: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_path: "./models/tinyllama.gguf".to_string(),
            runtime: "llama_cpp".to_string(),
            device: "local".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            models_registry: None,
            telemetry_db: None,
        }
    }
}

impl AgentConfig {
    /// Summary reported by `status` while the worker is down.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            model_path: self.model_path.clone(),
            runtime: self.runtime.clone(),
            device: self.device.clone(),
        }
    }

    /// Base URL of the worker's HTTP front end, as reachable from this host.
    pub fn worker_url(&self) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// The configuration fields `status` shows when no worker is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub model_path: String,
    pub runtime: String,
    pub device: String,
}

/// Filesystem layout of an Edge Foundry workspace.
///
/// Every artifact path is derived from the workspace root so the CLI, the
/// worker and the metrics command agree on locations regardless of their
/// current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root.join(WORKING_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.working_dir().join(CONFIG_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.working_dir().join(PID_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.working_dir().join(LOG_FILE)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.working_dir().join(MODELS_DIR)
    }

    pub fn gitignore(&self) -> PathBuf {
        self.working_dir().join(".gitignore")
    }

    /// Directory for the structured JSON logs.
    pub fn json_log_dir(&self) -> PathBuf {
        self.working_dir().join("logs")
    }

    /// Telemetry database location, honouring the config override.
    pub fn telemetry_db(&self, config: Option<&AgentConfig>) -> PathBuf {
        match config.and_then(|c| c.telemetry_db.as_ref()) {
            Some(path) => self.resolve(path),
            None => self.working_dir().join(TELEMETRY_DB),
        }
    }

    /// Resolve a possibly-relative path against the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Load the agent configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `EDGEFOUNDRY_`, e.g. `EDGEFOUNDRY_PORT`)
/// 2. Workspace config (`.edgefoundry/edgefoundry.yaml`)
/// 3. Built-in defaults
///
/// The workspace file must exist; a workspace that was never initialized is a
/// configuration error.
pub fn load_config(paths: &WorkspacePaths) -> Result<AgentConfig, ConfigError> {
    let config_file = paths.config_file();
    if !config_file.exists() {
        return Err(ConfigError::FileNotFound { path: config_file });
    }

    Figment::from(Serialized::defaults(AgentConfig::default()))
        .merge(Yaml::file(&config_file))
        .merge(Env::prefixed("EDGEFOUNDRY_").only(&[
            "model_path",
            "runtime",
            "device",
            "host",
            "port",
            "models_registry",
            "telemetry_db",
        ]))
        .extract()
        .map_err(|e| ConfigError::Parse {
            path: config_file,
            message: e.to_string(),
        })
}

/// Read the workspace configuration without layering, if it exists and parses.
pub fn read_config_file(paths: &WorkspacePaths) -> Result<Option<AgentConfig>, ConfigError> {
    let path = paths.config_file();
    crate::persistence::load_yaml(&path).map_err(|e| ConfigError::Parse {
        path,
        message: e.to_string(),
    })
}

/// Write the workspace configuration file.
pub fn save_config(paths: &WorkspacePaths, config: &AgentConfig) -> std::io::Result<()> {
    crate::persistence::atomic_write_yaml(&paths.config_file(), config)
}
