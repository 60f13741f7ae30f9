//! The agent process: an axum front end over the inference service.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use edgefoundry_core::backend::llamacpp;
use edgefoundry_core::{
    BackendRegistry, EdgeError, InferenceRequest, InferenceService, LlamaCppBackend, ModelManager,
    ModelRegistry, TelemetryStore, WorkspacePaths, load_config,
};

/// Error body: `{ "detail": ..., "kind": ... }`.
struct ApiError {
    status: StatusCode,
    detail: String,
    kind: String,
}

impl ApiError {
    fn new(status: StatusCode, prefix: &str, err: EdgeError) -> Self {
        Self {
            status,
            detail: format!("{prefix}: {}", err.reason()),
            kind: err.kind().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail, "kind": self.kind });
        (self.status, Json(body)).into_response()
    }
}

/// Build the agent's router.
pub fn router(service: InferenceService) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/inference", post(inference_handler))
        .route("/models", get(models_handler))
        .route("/models/current", get(current_model_handler))
        .route("/models/switch", post(switch_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Edge Foundry Agent is running",
        "status": "healthy",
    }))
}

async fn health_handler(State(service): State<InferenceService>) -> impl IntoResponse {
    let info = service.manager().current_info().await;
    Json(serde_json::json!({
        "status": "healthy",
        "model_loaded": info.loaded,
        "current_model": info.model_id,
        "config": service.config(),
    }))
}

async fn inference_handler(
    State(service): State<InferenceService>,
    Json(request): Json<InferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match service.handle_inference(request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e.reason(), "Error during inference");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Inference failed", e))
        }
    }
}

async fn models_handler(State(service): State<InferenceService>) -> impl IntoResponse {
    let manager = service.manager();
    Json(serde_json::json!({
        "models": manager.list_models(),
        "default_model": manager.default_model(),
        "current_model": manager.current_model_id().await,
    }))
}

async fn current_model_handler(State(service): State<InferenceService>) -> impl IntoResponse {
    Json(service.manager().current_info().await)
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    model_id: String,
}

async fn switch_handler(
    State(service): State<InferenceService>,
    Json(request): Json<SwitchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = service.manager();
    if let Err(e) = manager.switch(&request.model_id).await {
        let status = match e {
            edgefoundry_core::ModelError::UnknownModel { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return Err(ApiError::new(status, "Model switch failed", e.into()));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "model_id": request.model_id,
        "model_info": manager.current_info().await,
    })))
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(default = "default_metrics_limit")]
    limit: usize,
}

fn default_metrics_limit() -> usize {
    20
}

async fn metrics_handler(
    State(service): State<InferenceService>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match service.metrics_summary(query.limit).await {
        Ok(Some(summary)) => Ok(Json(summary)),
        Ok(None) => Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            detail: "Telemetry store is not available".into(),
            kind: edgefoundry_core::ErrorKind::Telemetry.to_string(),
        }),
        Err(e) => Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Metrics failed", e)),
    }
}

/// Assemble the service for a workspace: configuration, telemetry, registry
/// and the default model.
pub async fn build_service(paths: &WorkspacePaths) -> anyhow::Result<InferenceService> {
    let config = load_config(paths)?;

    let telemetry = match TelemetryStore::open(paths.telemetry_db(Some(&config))) {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "Telemetry disabled");
            None
        }
    };

    let registry = ModelRegistry::for_workspace(paths, &config)?;
    let root = paths.root().to_path_buf();
    let mut backends = BackendRegistry::new();
    backends.register(llamacpp::RUNTIME, move || {
        Box::new(LlamaCppBackend::with_base_dir(root.clone()))
    });

    let manager = Arc::new(ModelManager::new(registry, backends));
    if let Err(e) = manager.load_default().await {
        tracing::error!(error = %e, "Failed to load default model, serving without one");
    }

    Ok(InferenceService::new(manager, telemetry, config))
}

/// Run the agent until SIGTERM or Ctrl-C.
pub async fn run(paths: &WorkspacePaths) -> anyhow::Result<()> {
    let service = build_service(paths).await?;
    let addr = format!("{}:{}", service.config().host, service.config().port);
    let app = router(service).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, pid = std::process::id(), "Edge Foundry agent listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Edge Foundry agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use edgefoundry_core::backend::ModelDetails;
    use edgefoundry_core::{
        AgentConfig, Generation, GenerationParams, InferenceBackend, InferenceError, ModelConfig,
        ModelError, ModelInfo, StopReason,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct ShoutBackend {
        loaded: Option<ModelConfig>,
    }

    #[async_trait]
    impl InferenceBackend for ShoutBackend {
        fn runtime(&self) -> &str {
            "shout"
        }

        async fn load(&mut self, config: &ModelConfig) -> Result<(), ModelError> {
            self.loaded = Some(config.clone());
            Ok(())
        }

        async fn infer(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<Generation, InferenceError> {
            if self.loaded.is_none() {
                return Err(InferenceError::NotLoaded {
                    runtime: "shout".into(),
                });
            }
            Ok(Generation {
                text: prompt.to_uppercase(),
                stop_reason: StopReason::EndOfText,
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

    fn service(store: Option<TelemetryStore>) -> InferenceService {
        let registry = ModelRegistry::new(
            vec![
                ModelConfig::new("small", "shout", "./models/small.gguf"),
                ModelConfig::new("large", "shout", "./models/large.gguf"),
            ],
            Some("small".into()),
        )
        .unwrap();
        let mut backends = BackendRegistry::new();
        backends.register("shout", || Box::new(ShoutBackend { loaded: None }));
        let manager = Arc::new(ModelManager::new(registry, backends));
        InferenceService::new(manager, store, AgentConfig::default())
    }

    async fn send(
        service: InferenceService,
        req: axum::http::Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(router(service), req)
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_request(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, json) = send(service(None), get_request("/")).await;
        assert_eq!(status, 200);
        assert_eq!(json["status"], "healthy");

        let (status, json) = send(service(None), get_request("/health")).await;
        assert_eq!(status, 200);
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["config"]["port"], 8000);
    }

    #[tokio::test]
    async fn test_inference_without_model_is_500() {
        let (status, json) = send(
            service(None),
            post_request("/inference", serde_json::json!({ "prompt": "hi" })),
        )
        .await;
        assert_eq!(status, 500);
        assert_eq!(json["detail"], "Inference failed: No model loaded");
        assert_eq!(json["kind"], "inference");
    }

    #[tokio::test]
    async fn test_inference_records_and_reports() {
        let dir = TempDir::new().unwrap();
        let store = TelemetryStore::open(dir.path().join("t.db")).unwrap();
        let svc = service(Some(store));
        svc.manager().load_default().await.unwrap();

        let (status, json) = send(
            svc.clone(),
            post_request(
                "/inference",
                serde_json::json!({ "prompt": "hello edge", "max_tokens": 8 }),
            ),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["response"], "HELLO EDGE");
        assert_eq!(json["model_info"]["model_id"], "small");
        assert_eq!(json["model_info"]["max_tokens"], 8);
        assert_eq!(json["model_info"]["temperature"], 0.7);

        // The row is written in the background.
        let store = svc.telemetry().unwrap().clone();
        for _ in 0..250 {
            if store.summary(1).unwrap().total_count > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let (status, json) = send(svc, get_request("/metrics?limit=5")).await;
        assert_eq!(status, 200);
        assert_eq!(json["total_count"], 1);
        assert_eq!(json["recent"][0]["prompt_length"], 2);
    }

    #[tokio::test]
    async fn test_switch_and_current() {
        let svc = service(None);
        let (status, json) = send(
            svc.clone(),
            post_request("/models/switch", serde_json::json!({ "model_id": "large" })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["model_info"]["model_id"], "large");

        let (_, json) = send(svc.clone(), get_request("/models/current")).await;
        assert_eq!(json["loaded"], true);
        assert_eq!(json["model_path"], "./models/large.gguf");

        let (status, json) = send(
            svc.clone(),
            post_request("/models/switch", serde_json::json!({ "model_id": "ghost" })),
        )
        .await;
        assert_eq!(status, 404);
        assert_eq!(json["kind"], "model_load");

        let (_, json) = send(svc, get_request("/models")).await;
        assert_eq!(json["models"].as_array().unwrap().len(), 2);
        assert_eq!(json["default_model"], "small");
        assert_eq!(json["current_model"], "large");
    }

    #[tokio::test]
    async fn test_metrics_without_store() {
        let (status, json) = send(service(None), get_request("/metrics")).await;
        assert_eq!(status, 503);
        assert_eq!(json["kind"], "telemetry");
    }

    #[tokio::test]
    async fn test_build_service_without_model_file_still_serves() {
        let dir = TempDir::new().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        edgefoundry_core::workspace::init(&paths).unwrap();

        let svc = build_service(&paths).await.unwrap();
        assert!(!svc.manager().current_info().await.loaded);
        assert!(svc.telemetry().is_some());
        assert_eq!(svc.manager().default_model(), Some("default"));
    }
}
