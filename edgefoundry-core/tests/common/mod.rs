//! Shared fixtures: an in-process backend that echoes prompts.

#![allow(dead_code)]

use async_trait::async_trait;
use edgefoundry_core::backend::ModelDetails;
use edgefoundry_core::{
    BackendRegistry, Generation, GenerationParams, InferenceBackend, InferenceError, ModelConfig,
    MetricsSummary, ModelError, ModelInfo, ModelManager, ModelRegistry, StopReason,
    TelemetryStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ECHO_RUNTIME: &str = "echo";

/// Answers `"<id>: <prompt>"`; fails to load models whose path ends in `.bad`.
pub struct EchoBackend {
    loads: Arc<AtomicUsize>,
    loaded: Option<ModelConfig>,
}

#[async_trait]
impl InferenceBackend for EchoBackend {
    fn runtime(&self) -> &str {
        ECHO_RUNTIME
    }

    async fn load(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if config.model_path.ends_with(".bad") {
            return Err(ModelError::LoadFailed {
                id: config.id.clone(),
                message: "bad model file".into(),
            });
        }
        self.loaded = Some(config.clone());
        Ok(())
    }

    async fn infer(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, InferenceError> {
        let config = self.loaded.as_ref().ok_or_else(|| InferenceError::NotLoaded {
            runtime: ECHO_RUNTIME.into(),
        })?;
        let words: Vec<&str> = prompt
            .split_whitespace()
            .take(params.max_tokens as usize)
            .collect();
        Ok(Generation {
            text: format!("{}: {}", config.id, words.join(" ")),
            stop_reason: StopReason::Length,
        })
    }

    fn describe(&self) -> ModelInfo {
        ModelInfo {
            loaded: self.loaded.is_some(),
            model_id: None,
            details: self.loaded.as_ref().map(ModelDetails::from),
        }
    }
}

/// Backends with only the echo runtime, plus the shared load counter.
pub fn echo_backends() -> (BackendRegistry, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut backends = BackendRegistry::new();
    backends.register(ECHO_RUNTIME, move || {
        Box::new(EchoBackend {
            loads: Arc::clone(&counter),
            loaded: None,
        })
    });
    (backends, loads)
}

/// A manager over echo models with the given ids.
pub fn echo_manager(ids: &[&str], default: Option<&str>) -> (ModelManager, Arc<AtomicUsize>) {
    let models = ids
        .iter()
        .map(|id| ModelConfig::new(*id, ECHO_RUNTIME, format!("./models/{id}.gguf")))
        .collect();
    let registry = ModelRegistry::new(models, default.map(String::from)).unwrap();
    let (backends, loads) = echo_backends();
    (ModelManager::new(registry, backends), loads)
}

/// Poll the store until it holds `count` rows. Telemetry is written in the
/// background, so a row shows up some time after the response.
pub async fn wait_for_rows(store: &TelemetryStore, count: u64) -> MetricsSummary {
    for _ in 0..500 {
        let summary = store.summary(1).unwrap();
        if summary.total_count >= count {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("telemetry store never reached {count} rows");
}
