//! Error types for the Edge Foundry core.
//!
//! Uses `thiserror` for public API error types, one enum per domain
//! (configuration, process control, model loading, inference, telemetry)
//! folded into the top-level [`EdgeError`].

use std::path::PathBuf;

/// Top-level error type for the Edge Foundry core library.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Process control error: {0}")]
    Process(#[from] ProcessError),

    #[error("Model load error: {0}")]
    Model(#[from] ModelError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The originating category of an error, surfaced alongside every
/// user-visible failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ProcessControl,
    ModelLoad,
    Inference,
    Telemetry,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::ProcessControl => write!(f, "process_control"),
            ErrorKind::ModelLoad => write!(f, "model_load"),
            ErrorKind::Inference => write!(f, "inference"),
            ErrorKind::Telemetry => write!(f, "telemetry"),
            ErrorKind::Io => write!(f, "io"),
        }
    }
}

impl EdgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EdgeError::Config(_) => ErrorKind::Configuration,
            EdgeError::Process(_) => ErrorKind::ProcessControl,
            EdgeError::Model(_) => ErrorKind::ModelLoad,
            EdgeError::Inference(_) => ErrorKind::Inference,
            EdgeError::Telemetry(_) => ErrorKind::Telemetry,
            EdgeError::Io(_) => ErrorKind::Io,
        }
    }

    /// The human-readable reason without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            EdgeError::Config(e) => e.to_string(),
            EdgeError::Process(e) => e.to_string(),
            EdgeError::Model(e) => e.to_string(),
            EdgeError::Inference(e) => e.to_string(),
            EdgeError::Telemetry(e) => e.to_string(),
            EdgeError::Io(e) => e.to_string(),
        }
    }
}

/// Errors from loading configuration and the model registry.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Model registry not found: {path}")]
    RegistryMissing { path: PathBuf },
}

/// Errors from supervising the worker process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Agent is already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Agent is not running")]
    NotRunning,

    #[error("No configuration found at {path}. Run 'edgefoundry init' first.")]
    NotConfigured { path: PathBuf },

    #[error("Failed to start agent. Check logs for details: {log_file}")]
    StartFailed { log_file: PathBuf },

    #[error("Agent (PID {pid}) did not stop within {timeout_secs}s")]
    StopTimedOut { pid: u32, timeout_secs: u64 },

    #[error("No log file found at {path}. Agent may not have been started.")]
    LogMissing { path: PathBuf },

    #[error("{action} failed for {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub(crate) fn io(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        ProcessError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from resolving and loading a model backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown model: {id}")]
    UnknownModel { id: String },

    #[error("Unsupported runtime '{runtime}' for model {id}")]
    UnsupportedRuntime { id: String, runtime: String },

    #[error("Failed to load model {id}: {message}")]
    LoadFailed { id: String, message: String },

    #[error("Model registry has no default model")]
    NoDefaultModel,
}

/// Errors from running a generation.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Backend '{runtime}' called before a model was loaded")]
    NotLoaded { runtime: String },

    #[error("Backend '{runtime}' failed: {message}")]
    Backend { runtime: String, message: String },
}

/// Errors from the telemetry store.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry task failed: {message}")]
    Join { message: String },
}

/// A type alias for results using the top-level `EdgeError`.
pub type Result<T> = std::result::Result<T, EdgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_process() {
        let err = EdgeError::Process(ProcessError::NotRunning);
        assert_eq!(err.to_string(), "Process control error: Agent is not running");
        assert_eq!(err.kind(), ErrorKind::ProcessControl);
    }

    #[test]
    fn test_error_display_model() {
        let err = EdgeError::Model(ModelError::UnknownModel {
            id: "missing".into(),
        });
        assert_eq!(err.to_string(), "Model load error: Unknown model: missing");
        assert_eq!(err.reason(), "Unknown model: missing");
        assert_eq!(err.kind().to_string(), "model_load");
    }

    #[test]
    fn test_error_display_inference() {
        let err: EdgeError = InferenceError::NoModelLoaded.into();
        assert_eq!(err.to_string(), "Inference error: No model loaded");
        assert_eq!(err.kind(), ErrorKind::Inference);
    }

    #[test]
    fn test_stop_timeout_message() {
        let err = ProcessError::StopTimedOut {
            pid: 4242,
            timeout_secs: 10,
        };
        assert_eq!(err.to_string(), "Agent (PID 4242) did not stop within 10s");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EdgeError = io_err.into();
        assert!(matches!(err, EdgeError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_telemetry_error_from_sqlite() {
        let err: TelemetryError = rusqlite::Error::InvalidQuery.into();
        let err: EdgeError = err.into();
        assert_eq!(err.kind(), ErrorKind::Telemetry);
    }
}
