//! Demo-model registry: the static catalog of installable models.
//!
//! The registry document maps model ids to their configuration and names a
//! default. It is read once when the manager is built and never mutated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::{AgentConfig, WorkspacePaths};
use crate::error::ConfigError;

/// Id given to the entry synthesized from the agent configuration.
pub const SYNTHESIZED_MODEL_ID: &str = "default";

fn default_text() -> String {
    "Unknown".to_string()
}

fn default_context_length() -> u32 {
    2048
}

fn default_runtime() -> String {
    crate::backend::llamacpp::RUNTIME.to_string()
}

/// Static description of one installable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry key. Filled in from the document's map key.
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_text")]
    pub parameters: String,
    #[serde(default = "default_text")]
    pub quantization: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default = "default_text")]
    pub model_type: String,
    /// Selects the backend implementation.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    pub model_path: String,
    /// Passed verbatim to the backend loader.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub sample_prompts: Vec<String>,
}

impl ModelConfig {
    /// A minimal entry for `model_path` under `runtime`.
    pub fn new(id: impl Into<String>, runtime: impl Into<String>, model_path: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            parameters: default_text(),
            quantization: default_text(),
            context_length: default_context_length(),
            model_type: default_text(),
            runtime: runtime.into(),
            model_path: model_path.into(),
            config: serde_json::Map::new(),
            sample_prompts: Vec::new(),
        }
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            quantization: self.quantization.clone(),
            context_length: self.context_length,
            model_type: self.model_type.clone(),
            sample_prompts: self.sample_prompts.clone(),
        }
    }
}

/// The listing view of a [`ModelConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: String,
    pub quantization: String,
    pub context_length: u32,
    pub model_type: String,
    pub sample_prompts: Vec<String>,
}

#[derive(Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    default_model: Option<String>,
    #[serde(default)]
    demo_models: serde_yaml::Mapping,
}

/// Model id -> configuration, in document order, plus the default id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
    index: HashMap<String, usize>,
    default_model: Option<String>,
}

impl ModelRegistry {
    /// Build a registry from already-keyed configurations.
    ///
    /// Later duplicates of an id replace earlier ones. A default that names
    /// no entry is rejected.
    pub fn new(models: Vec<ModelConfig>, default_model: Option<String>) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for model in models {
            match registry.index.get(&model.id) {
                Some(&pos) => registry.models[pos] = model,
                None => {
                    registry.index.insert(model.id.clone(), registry.models.len());
                    registry.models.push(model);
                }
            }
        }
        if let Some(default) = &default_model {
            if !registry.index.contains_key(default) {
                return Err(ConfigError::Invalid {
                    message: format!("default_model '{default}' is not in the registry"),
                });
            }
        }
        registry.default_model = default_model;
        Ok(registry)
    }

    /// Parse a registry document.
    pub fn from_yaml(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parse_err = |message: String| ConfigError::Parse {
            path: origin.to_path_buf(),
            message,
        };

        let doc: RegistryDocument =
            serde_yaml::from_str(source).map_err(|e| parse_err(e.to_string()))?;

        let mut models = Vec::with_capacity(doc.demo_models.len());
        for (key, value) in doc.demo_models {
            let id = key
                .as_str()
                .ok_or_else(|| parse_err(format!("model id must be a string, got {key:?}")))?
                .to_string();
            let mut config: ModelConfig = serde_yaml::from_value(value)
                .map_err(|e| parse_err(format!("model '{id}': {e}")))?;
            if config.name.is_empty() {
                config.name = id.clone();
            }
            config.id = id;
            models.push(config);
        }

        Self::new(models, doc.default_model)
    }

    /// Load a registry document from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::RegistryMissing {
                path: path.to_path_buf(),
            });
        }
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let registry = Self::from_yaml(&source, path)?;
        tracing::info!(path = %path.display(), models = registry.len(), "Loaded model registry");
        Ok(registry)
    }

    /// The registry a worker uses for `config`.
    ///
    /// A configured registry document must exist. Without one, the agent's
    /// own `model_path`/`runtime` become the single entry [`SYNTHESIZED_MODEL_ID`].
    pub fn for_workspace(paths: &WorkspacePaths, config: &AgentConfig) -> Result<Self, ConfigError> {
        match &config.models_registry {
            Some(path) => Self::load(&paths.resolve(path)),
            None => {
                let model = ModelConfig::new(SYNTHESIZED_MODEL_ID, &config.runtime, &config.model_path);
                Self::new(vec![model], Some(SYNTHESIZED_MODEL_ID.to_string()))
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        self.index.get(id).map(|&pos| &self.models[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Every model in document order.
    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
