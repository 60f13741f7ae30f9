//! Model manager: owns the single loaded backend and switches between
//! registry entries.
//!
//! The current model lives behind one lock as `Option<CurrentModel>`, so an
//! id is present exactly when its backend loaded successfully. Switches are
//! serialized by a separate gate: the slow `load` runs outside the state lock,
//! which is held only for the check and for the swap. Inference clones the
//! current backend handle and releases the lock before generating.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{BackendRegistry, Generation, GenerationParams, InferenceBackend, ModelInfo};
use crate::error::{InferenceError, ModelError};
use crate::registry::{ModelConfig, ModelRegistry, ModelSummary};

struct CurrentModel {
    id: String,
    backend: Arc<dyn InferenceBackend>,
}

/// The single-model manager hosted by the worker.
pub struct ModelManager {
    registry: ModelRegistry,
    backends: BackendRegistry,
    state: Mutex<Option<CurrentModel>>,
    switch_gate: Mutex<()>,
}

impl ModelManager {
    /// A manager with nothing loaded.
    pub fn new(registry: ModelRegistry, backends: BackendRegistry) -> Self {
        Self {
            registry,
            backends,
            state: Mutex::new(None),
            switch_gate: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Listing of every registry entry, in document order.
    pub fn list_models(&self) -> Vec<ModelSummary> {
        self.registry.models().iter().map(ModelConfig::summary).collect()
    }

    pub fn model_config(&self, id: &str) -> Option<&ModelConfig> {
        self.registry.get(id)
    }

    pub fn default_model(&self) -> Option<&str> {
        self.registry.default_model()
    }

    /// Sample prompts for `id`, or for the current model when `id` is `None`.
    pub async fn sample_prompts(&self, id: Option<&str>) -> Vec<String> {
        let id = match id {
            Some(id) => id.to_string(),
            None => match self.current_model_id().await {
                Some(id) => id,
                None => return Vec::new(),
            },
        };
        self.registry
            .get(&id)
            .map(|m| m.sample_prompts.clone())
            .unwrap_or_default()
    }

    /// Id of the loaded model, if any.
    pub async fn current_model_id(&self) -> Option<String> {
        self.state.lock().await.as_ref().map(|c| c.id.clone())
    }

    /// Make `model_id` the current model.
    ///
    /// Switching to the current model is a no-op. On any failure the
    /// previously loaded model stays current.
    pub async fn switch(&self, model_id: &str) -> Result<(), ModelError> {
        let _gate = self.switch_gate.lock().await;

        if self.current_model_id().await.as_deref() == Some(model_id) {
            tracing::debug!(model = model_id, "Model already loaded");
            return Ok(());
        }

        let config = self
            .registry
            .get(model_id)
            .ok_or_else(|| ModelError::UnknownModel {
                id: model_id.to_string(),
            })?;
        let mut backend =
            self.backends
                .create(&config.runtime)
                .ok_or_else(|| ModelError::UnsupportedRuntime {
                    id: model_id.to_string(),
                    runtime: config.runtime.clone(),
                })?;

        tracing::info!(model = model_id, runtime = %config.runtime, "Switching model");
        if let Err(e) = backend.load(config).await {
            tracing::warn!(model = model_id, error = %e, "Model load failed, keeping previous model");
            return Err(e);
        }

        let previous = self.state.lock().await.replace(CurrentModel {
            id: model_id.to_string(),
            backend: Arc::from(backend),
        });
        if let Some(previous) = previous {
            tracing::info!(from = %previous.id, to = model_id, "Model switched");
        } else {
            tracing::info!(model = model_id, "Model loaded");
        }
        Ok(())
    }

    /// Load the registry's default model.
    pub async fn load_default(&self) -> Result<(), ModelError> {
        let default = self
            .registry
            .default_model()
            .ok_or(ModelError::NoDefaultModel)?
            .to_string();
        self.switch(&default).await
    }

    /// Run one generation on the current model.
    pub async fn run_inference(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, InferenceError> {
        let backend = {
            let state = self.state.lock().await;
            let current = state.as_ref().ok_or(InferenceError::NoModelLoaded)?;
            Arc::clone(&current.backend)
        };
        backend.infer(prompt, params).await
    }

    /// Description of the current model, tagged with its id.
    pub async fn current_info(&self) -> ModelInfo {
        match self.state.lock().await.as_ref() {
            Some(current) => {
                let mut info = current.backend.describe();
                info.model_id = Some(current.id.clone());
                info
            }
            None => ModelInfo::unloaded(),
        }
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("models", &self.registry.len())
            .field("backends", &self.backends)
            .finish()
    }
}
