//! Inference backend trait and runtime registry.
//!
//! A backend loads one model file and produces text continuations. The model
//! manager never names a concrete backend: it asks the [`BackendRegistry`]
//! for a fresh instance by the runtime tag found in the model's
//! configuration, so adding a runtime means registering one more factory.

pub mod formats;
pub mod llamacpp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InferenceError, ModelError};
use crate::registry::ModelConfig;

pub use llamacpp::LlamaCppBackend;

/// Markers that end a generation. The first one found wins.
pub const STOP_MARKERS: [&str; 5] = ["Human:", "User:", "Student:", "\n\n", "Assistant:"];

/// Wrap a user prompt in the conversational template every backend uses.
pub fn format_prompt(prompt: &str) -> String {
    format!("Human: {prompt}\nAssistant:")
}

/// Cut `text` at the earliest stop marker, returning the kept prefix and
/// the marker that matched.
pub fn truncate_at_stop(text: &str) -> (&str, Option<&'static str>) {
    STOP_MARKERS
        .iter()
        .filter_map(|marker| text.find(marker).map(|pos| (pos, *marker)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(pos, marker)| (&text[..pos], Some(marker)))
        .unwrap_or((text, None))
}

/// Sampling parameters for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 64,
            temperature: 0.7,
        }
    }
}

/// Why a generation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// A stop marker was produced.
    Stop { marker: String },
    /// The `max_tokens` budget was exhausted.
    Length,
    /// The model emitted its end-of-text token.
    EndOfText,
}

/// Output of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub stop_reason: StopReason,
}

/// Descriptive fields of a loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub name: String,
    pub description: String,
    pub parameters: String,
    pub quantization: String,
    pub context_length: u32,
    pub model_type: String,
    pub runtime: String,
    pub model_path: String,
}

impl From<&ModelConfig> for ModelDetails {
    fn from(config: &ModelConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            parameters: config.parameters.clone(),
            quantization: config.quantization.clone(),
            context_length: config.context_length,
            model_type: config.model_type.clone(),
            runtime: config.runtime.clone(),
            model_path: config.model_path.clone(),
        }
    }
}

/// What a backend (or the manager) reports about the current model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(flatten)]
    pub details: Option<ModelDetails>,
}

impl ModelInfo {
    pub fn unloaded() -> Self {
        Self {
            loaded: false,
            model_id: None,
            details: None,
        }
    }
}

/// Inference backend trait.
///
/// `load` must succeed before `infer`; implementations reject an early
/// `infer` with [`InferenceError::NotLoaded`] instead of attempting it.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Runtime tag this backend is registered under.
    fn runtime(&self) -> &str;

    async fn load(&mut self, config: &ModelConfig) -> Result<(), ModelError>;

    /// Generate a continuation of `prompt` in the conversational template.
    async fn infer(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, InferenceError>;

    fn describe(&self) -> ModelInfo;
}

/// Constructor for a fresh, unloaded backend.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn InferenceBackend> + Send + Sync>;

/// Runtime tag -> backend factory.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in runtime.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(llamacpp::RUNTIME, || Box::new(LlamaCppBackend::new()));
        registry
    }

    /// Register (or replace) the factory for `runtime`.
    pub fn register<F>(&mut self, runtime: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn InferenceBackend> + Send + Sync + 'static,
    {
        self.factories.insert(runtime.into(), Arc::new(factory));
    }

    /// A new, unloaded backend for `runtime`.
    pub fn create(&self, runtime: &str) -> Option<Box<dyn InferenceBackend>> {
        self.factories.get(runtime).map(|factory| factory())
    }

    pub fn supports(&self, runtime: &str) -> bool {
        self.factories.contains_key(runtime)
    }

    /// Registered runtime tags, sorted.
    pub fn runtimes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("runtimes", &self.runtimes())
            .finish()
    }
}
