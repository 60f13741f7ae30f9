//! # Edge Foundry Core
//!
//! Core library for Edge Foundry, a local LLM inference agent.
//! Provides worker process supervision, the model registry and manager,
//! pluggable inference backends, SQLite telemetry, configuration and
//! workspace management.

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod telemetry;
pub mod workspace;

// Re-export commonly used types at the crate root.
pub use backend::{
    BackendRegistry, Generation, GenerationParams, InferenceBackend, LlamaCppBackend, ModelInfo,
    StopReason,
};
pub use config::{AgentConfig, ConfigSummary, WorkspacePaths, load_config};
pub use error::{
    ConfigError, EdgeError, ErrorKind, InferenceError, ModelError, ProcessError, Result,
    TelemetryError,
};
pub use manager::ModelManager;
pub use registry::{ModelConfig, ModelRegistry, ModelSummary};
pub use service::{InferenceRequest, InferenceResponse, InferenceService, ResponseModelInfo};
pub use supervisor::{ProcessStatus, Supervisor, WorkerCommand};
pub use telemetry::{MetricsSummary, NewRecord, TelemetryRecord, TelemetryStore};
