//! The inference boundary served by the worker.
//!
//! Wraps the model manager with request defaults, timing, memory sampling and
//! best-effort telemetry. Callers on the other side of the boundary only see
//! the response or an [`EdgeError`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::GenerationParams;
use crate::config::AgentConfig;
use crate::error::EdgeError;
use crate::manager::ModelManager;
use crate::telemetry::{self, MetricsSummary, NewRecord, TelemetryStore};

fn default_max_tokens() -> u32 {
    64
}

fn default_temperature() -> f64 {
    0.7
}

/// A single inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Switch to this model before generating.
    #[serde(default)]
    pub model_id: Option<String>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            model_id: None,
        }
    }
}

/// Which model answered and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseModelInfo {
    pub model_id: Option<String>,
    pub model_path: String,
    pub runtime: String,
    pub device: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub response: String,
    /// Wall-clock seconds spent generating.
    pub processing_time: f64,
    pub model_info: ResponseModelInfo,
}

/// Manager, telemetry store and agent configuration of one worker.
#[derive(Debug, Clone)]
pub struct InferenceService {
    manager: Arc<ModelManager>,
    telemetry: Option<TelemetryStore>,
    config: AgentConfig,
}

impl InferenceService {
    pub fn new(manager: Arc<ModelManager>, telemetry: Option<TelemetryStore>, config: AgentConfig) -> Self {
        Self {
            manager,
            telemetry,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn telemetry(&self) -> Option<&TelemetryStore> {
        self.telemetry.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one inference end to end.
    ///
    /// The telemetry row is written on a detached task; the response never
    /// waits on the store.
    pub async fn handle_inference(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, EdgeError> {
        if let Some(model_id) = &request.model_id {
            self.manager.switch(model_id).await?;
        }

        let preview: String = request.prompt.chars().take(100).collect();
        tracing::info!(prompt = %preview, "Received inference request");

        let params = GenerationParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let memory_before = telemetry::memory_usage_mb();
        let started = Instant::now();
        let generation = self.manager.run_inference(&request.prompt, &params).await?;
        let elapsed = started.elapsed();
        let memory_used = telemetry::memory_usage_mb() - memory_before;

        let processing_time = elapsed.as_secs_f64();
        let latency_ms = processing_time * 1000.0;
        let tokens_generated = telemetry::count_tokens(&generation.text) as u64;

        let info = self.manager.current_info().await;
        let (model_path, runtime) = match &info.details {
            Some(details) => (details.model_path.clone(), details.runtime.clone()),
            None => (self.config.model_path.clone(), self.config.runtime.clone()),
        };

        if let Some(store) = &self.telemetry {
            let record = NewRecord {
                prompt_length: telemetry::count_tokens(&request.prompt) as u64,
                latency_ms,
                tokens_generated,
                memory_mb: memory_used,
                model_path: Some(model_path.clone()),
                temperature: Some(request.temperature),
                max_tokens: Some(request.max_tokens),
            };
            let store = store.clone();
            tokio::spawn(async move {
                match store.record_async(record).await {
                    Ok(id) => tracing::debug!(id, "Telemetry row stored"),
                    Err(e) => tracing::error!(error = %e, "Failed to record telemetry"),
                }
            });
        }

        tracing::info!(
            latency_ms,
            tokens = tokens_generated,
            memory_mb = memory_used,
            stop = ?generation.stop_reason,
            "Generated response"
        );

        Ok(InferenceResponse {
            response: generation.text,
            processing_time,
            model_info: ResponseModelInfo {
                model_id: info.model_id,
                model_path,
                runtime,
                device: self.config.device.clone(),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        })
    }

    /// Telemetry summary, or `None` when the worker runs without a store.
    pub async fn metrics_summary(&self, limit: usize) -> Result<Option<MetricsSummary>, EdgeError> {
        let Some(store) = self.telemetry.clone() else {
            return Ok(None);
        };
        let summary = tokio::task::spawn_blocking(move || store.summary(limit))
            .await
            .map_err(|e| crate::error::TelemetryError::Join {
                message: e.to_string(),
            })??;
        Ok(Some(summary))
    }
}
