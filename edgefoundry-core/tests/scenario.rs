//! End-to-end scenario: registry, switching, inference and telemetry.

mod common;

use common::{ECHO_RUNTIME, echo_backends, echo_manager, wait_for_rows};
use edgefoundry_core::{
    AgentConfig, EdgeError, ErrorKind, InferenceRequest, InferenceService, ModelConfig,
    ModelError, ModelManager, ModelRegistry, TelemetryStore,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_switch_and_infer_records_telemetry() {
    let dir = TempDir::new().unwrap();
    let store = TelemetryStore::open(dir.path().join("telemetry.db")).unwrap();
    let (manager, _) = echo_manager(&["a", "b"], Some("a"));
    let manager = Arc::new(manager);
    let service = InferenceService::new(
        Arc::clone(&manager),
        Some(store.clone()),
        AgentConfig::default(),
    );

    assert!(!manager.current_info().await.loaded);

    manager.switch("a").await.unwrap();
    let info = manager.current_info().await;
    assert!(info.loaded);
    assert_eq!(info.model_id.as_deref(), Some("a"));

    let err = manager.switch("missing").await.unwrap_err();
    assert!(matches!(err, ModelError::UnknownModel { ref id } if id == "missing"));
    assert_eq!(manager.current_info().await.model_id.as_deref(), Some("a"));

    let before = store.summary(1).unwrap().total_count;
    let response = service
        .handle_inference(InferenceRequest {
            prompt: "hi".into(),
            max_tokens: 10,
            temperature: 0.5,
            model_id: None,
        })
        .await
        .unwrap();
    assert_eq!(response.response, "a: hi");
    assert_eq!(response.model_info.model_id.as_deref(), Some("a"));
    assert_eq!(response.model_info.model_path, "./models/a.gguf");
    assert_eq!(response.model_info.runtime, ECHO_RUNTIME);
    assert_eq!(response.model_info.max_tokens, 10);
    assert!(response.processing_time >= 0.0);

    let summary = wait_for_rows(&store, before + 1).await;
    assert_eq!(summary.total_count, before + 1);
    let row = &summary.recent[0];
    assert_eq!(row.prompt_length, 1);
    assert_eq!(row.tokens_generated, 2);
    assert_eq!(row.max_tokens, Some(10));
    assert_eq!(row.temperature, Some(0.5));
    assert_eq!(row.model_path.as_deref(), Some("./models/a.gguf"));
}

#[tokio::test]
async fn test_request_model_id_switches_first() {
    let (manager, loads) = echo_manager(&["a", "b"], Some("a"));
    let service = InferenceService::new(Arc::new(manager), None, AgentConfig::default());

    let mut request = InferenceRequest::new("what now");
    request.model_id = Some("b".into());
    let response = service.handle_inference(request.clone()).await.unwrap();
    assert_eq!(response.response, "b: what now");

    service.handle_inference(request).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_switch_keeps_serving_previous_model() {
    let mut bad = ModelConfig::new("broken", ECHO_RUNTIME, "./models/broken.bad");
    bad.name = "Broken".into();
    let registry = ModelRegistry::new(
        vec![ModelConfig::new("a", ECHO_RUNTIME, "./models/a.gguf"), bad],
        Some("a".into()),
    )
    .unwrap();
    let (backends, _) = echo_backends();
    let manager = Arc::new(ModelManager::new(registry, backends));
    manager.load_default().await.unwrap();

    let service = InferenceService::new(Arc::clone(&manager), None, AgentConfig::default());
    let mut request = InferenceRequest::new("still here");
    request.model_id = Some("broken".into());
    let err = service.handle_inference(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoad);
    assert!(matches!(err, EdgeError::Model(ModelError::LoadFailed { .. })));

    let response = service
        .handle_inference(InferenceRequest::new("still here"))
        .await
        .unwrap();
    assert_eq!(response.response, "a: still here");
}

#[tokio::test]
async fn test_telemetry_failure_does_not_fail_inference() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("telemetry.db");
    let store = TelemetryStore::open(&db).unwrap();
    let (manager, _) = echo_manager(&["a"], Some("a"));
    manager.load_default().await.unwrap();
    let service = InferenceService::new(Arc::new(manager), Some(store), AgentConfig::default());

    // Swap the database for a directory so every write fails.
    std::fs::remove_file(&db).unwrap();
    std::fs::create_dir(&db).unwrap();

    let response = service
        .handle_inference(InferenceRequest::new("hello there"))
        .await
        .unwrap();
    assert_eq!(response.response, "a: hello there");
}

#[tokio::test]
async fn test_locked_telemetry_store_does_not_delay_response() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("telemetry.db");
    let store = TelemetryStore::open(&db).unwrap();
    let (manager, _) = echo_manager(&["a"], Some("a"));
    manager.load_default().await.unwrap();
    let service = InferenceService::new(
        Arc::new(manager),
        Some(store.clone()),
        AgentConfig::default(),
    );

    // Another writer holds the database lock for longer than the response may take.
    let writer = rusqlite::Connection::open(&db).unwrap();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        service.handle_inference(InferenceRequest::new("quick one")),
    )
    .await
    .expect("response waited on the telemetry write")
    .unwrap();
    assert_eq!(response.response, "a: quick one");

    writer.execute_batch("COMMIT").unwrap();
    drop(writer);
    let summary = wait_for_rows(&store, 1).await;
    assert_eq!(summary.recent[0].prompt_length, 2);
}

#[tokio::test]
async fn test_concurrent_inference_during_switch() {
    let (manager, _) = echo_manager(&["a", "b"], Some("a"));
    let manager = Arc::new(manager);
    manager.load_default().await.unwrap();
    let service = InferenceService::new(Arc::clone(&manager), None, AgentConfig::default());

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            if i % 4 == 0 {
                let target = if i % 8 == 0 { "a" } else { "b" };
                manager.switch(target).await.unwrap();
            }
            service
                .handle_inference(InferenceRequest::new(format!("req {i}")))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(response.response.starts_with("a: ") || response.response.starts_with("b: "));
    }
    assert!(manager.current_info().await.loaded);
}
