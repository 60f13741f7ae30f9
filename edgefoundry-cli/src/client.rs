//! HTTP client for the running agent.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

use edgefoundry_core::ModelInfo;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchResponse {
    pub model_id: String,
    pub model_info: ModelInfo,
}

pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    fn unreachable(&self) -> String {
        format!(
            "Could not reach the agent at {}. Is it running? Start it with 'edgefoundry start'.",
            self.base_url
        )
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let detail = match resp.json::<ErrorBody>().await {
            Ok(body) => body.detail,
            Err(_) => status.to_string(),
        };
        anyhow::bail!("{detail}")
    }

    pub async fn current_model(&self) -> anyhow::Result<ModelInfo> {
        let resp = self
            .http
            .get(format!("{}/models/current", self.base_url))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        Self::decode(resp).await
    }

    pub async fn switch_model(&self, model_id: &str) -> anyhow::Result<SwitchResponse> {
        let resp = self
            .http
            .post(format!("{}/models/switch", self.base_url))
            .json(&serde_json::json!({ "model_id": model_id }))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        Self::decode(resp).await
    }
}
