//! llama.cpp backend for GGUF models.
//!
//! Generation runs through the llama.cpp command-line executable, one
//! process per request. Loading validates the model file and the runtime
//! up front so a broken configuration fails at `switch` time rather than on
//! the first request.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::formats::has_gguf_magic;
use super::{
    Generation, GenerationParams, InferenceBackend, ModelDetails, ModelInfo, StopReason,
    format_prompt, truncate_at_stop,
};
use crate::config::WORKING_DIR;
use crate::error::{InferenceError, ModelError};
use crate::registry::ModelConfig;

/// Runtime tag for this backend.
pub const RUNTIME: &str = "llama_cpp";

/// Executable used when neither the model config nor the environment names one.
pub const DEFAULT_BINARY: &str = "llama-cli";

/// Environment variable overriding the executable.
pub const BINARY_ENV: &str = "EDGEFOUNDRY_LLAMA_BIN";

const END_OF_TEXT: &str = "[end of text]";

/// Resolve a configured model path.
///
/// Relative paths are tried under the `.edgefoundry/` working subdirectory of
/// `base` first, then against `base` itself.
pub fn resolve_model_path(model_path: &str, base: &Path) -> PathBuf {
    let path = Path::new(model_path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let in_working_dir = base.join(WORKING_DIR).join(path);
    if in_working_dir.exists() {
        in_working_dir
    } else {
        base.join(path)
    }
}

/// Loader options read from the model's free-form `config` map.
#[derive(Debug, Clone, PartialEq)]
struct LlamaOptions {
    binary: PathBuf,
    n_ctx: u32,
    n_gpu_layers: i64,
    seed: Option<i64>,
    threads: Option<u64>,
}

impl LlamaOptions {
    fn from_config(config: &ModelConfig) -> Self {
        let map = &config.config;
        let binary = map
            .get("binary")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(BINARY_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
        Self {
            binary,
            n_ctx: map
                .get("n_ctx")
                .and_then(Value::as_u64)
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(config.context_length),
            n_gpu_layers: map.get("n_gpu_layers").and_then(Value::as_i64).unwrap_or(-1),
            seed: map.get("seed").and_then(Value::as_i64),
            threads: map.get("n_threads").and_then(Value::as_u64),
        }
    }
}

/// The loaded state: everything needed to run a generation.
#[derive(Debug, Clone)]
struct LoadedGguf {
    config: ModelConfig,
    model_path: PathBuf,
    options: LlamaOptions,
}

/// Backend running GGUF models through llama.cpp.
#[derive(Debug)]
pub struct LlamaCppBackend {
    base_dir: PathBuf,
    loaded: Option<LoadedGguf>,
}

impl Default for LlamaCppBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LlamaCppBackend {
    /// A backend resolving relative model paths against the current directory.
    pub fn new() -> Self {
        Self::with_base_dir(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            loaded: None,
        }
    }

    fn command(&self, loaded: &LoadedGguf, prompt: &str, params: &GenerationParams) -> Command {
        let opts = &loaded.options;
        let mut cmd = Command::new(&opts.binary);
        cmd.arg("-m")
            .arg(&loaded.model_path)
            .arg("-p")
            .arg(format_prompt(prompt))
            .arg("-n")
            .arg(params.max_tokens.to_string())
            .arg("--temp")
            .arg(params.temperature.to_string())
            .arg("-c")
            .arg(opts.n_ctx.to_string())
            .arg("-ngl")
            .arg(opts.n_gpu_layers.to_string())
            .arg("--no-display-prompt")
            .arg("-no-cnv");
        if let Some(seed) = opts.seed {
            cmd.arg("--seed").arg(seed.to_string());
        }
        if let Some(threads) = opts.threads {
            cmd.arg("-t").arg(threads.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl InferenceBackend for LlamaCppBackend {
    fn runtime(&self) -> &str {
        RUNTIME
    }

    async fn load(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
        let load_failed = |message: String| ModelError::LoadFailed {
            id: config.id.clone(),
            message,
        };
        let started = std::time::Instant::now();
        let model_path = resolve_model_path(&config.model_path, &self.base_dir);
        tracing::info!(model = %config.id, path = %model_path.display(), "Loading GGUF model");

        if !model_path.is_file() {
            return Err(load_failed(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        match has_gguf_magic(&model_path) {
            Ok(true) => {}
            Ok(false) => {
                return Err(load_failed(format!(
                    "{} is not a GGUF file",
                    model_path.display()
                )));
            }
            Err(e) => {
                return Err(load_failed(format!(
                    "cannot read {}: {e}",
                    model_path.display()
                )));
            }
        }

        let options = LlamaOptions::from_config(config);
        let version_check = Command::new(&options.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        if let Err(e) = version_check {
            return Err(load_failed(format!(
                "llama.cpp runtime '{}' is not available: {e}",
                options.binary.display()
            )));
        }

        self.loaded = Some(LoadedGguf {
            config: config.clone(),
            model_path,
            options,
        });
        tracing::info!(
            model = %config.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(())
    }

    async fn infer(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, InferenceError> {
        let loaded = self.loaded.as_ref().ok_or_else(|| InferenceError::NotLoaded {
            runtime: RUNTIME.to_string(),
        })?;
        let backend_err = |message: String| InferenceError::Backend {
            runtime: RUNTIME.to_string(),
            message,
        };

        let output = self
            .command(loaded, prompt, params)
            .output()
            .await
            .map_err(|e| backend_err(format!("failed to spawn {}: {e}", loaded.options.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(backend_err(format!(
                "generation exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (raw, end_of_text) = match stdout.find(END_OF_TEXT) {
            Some(pos) => (&stdout[..pos], true),
            None => (stdout.as_ref(), false),
        };
        let (text, marker) = truncate_at_stop(raw);
        let stop_reason = match (marker, end_of_text) {
            (Some(marker), _) => StopReason::Stop {
                marker: marker.to_string(),
            },
            (None, true) => StopReason::EndOfText,
            (None, false) => StopReason::Length,
        };

        Ok(Generation {
            text: text.trim_end_matches('\n').to_string(),
            stop_reason,
        })
    }

    fn describe(&self) -> ModelInfo {
        match &self.loaded {
            Some(loaded) => ModelInfo {
                loaded: true,
                model_id: None,
                details: Some(ModelDetails::from(&loaded.config)),
            },
            None => ModelInfo::unloaded(),
        }
    }
}
