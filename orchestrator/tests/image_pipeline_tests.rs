//! Integration tests for the custom image build pipeline: upload
//! validation, state advancement, version chains and the approval gate.

mod common;

use common::*;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use orchestrator::database::Database;
use orchestrator::images::ImagePipeline;
use orchestrator::services::AlertService;
use orchestrator::state::ImageState;
use orchestrator::storage::{LocalObjectStorage, ObjectStorage};

struct PipelineStack {
    _tmp: tempfile::TempDir,
    database: Arc<Database>,
    storage: Arc<LocalObjectStorage>,
    runtime: Arc<MockRuntime>,
    pipeline: ImagePipeline,
}

async fn setup() -> PipelineStack {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let database = Arc::new(Database::new(":memory:").await.unwrap());
    let storage = Arc::new(LocalObjectStorage::new(tmp.path().join("object-store")));
    let runtime = MockRuntime::new();
    let alert_service = Arc::new(AlertService::new(String::new()));

    let pipeline = ImagePipeline::new(
        database.clone(),
        storage.clone(),
        runtime.clone(),
        alert_service,
        config,
    );

    PipelineStack {
        _tmp: tmp,
        database,
        storage,
        runtime,
        pipeline,
    }
}

#[tokio::test]
async fn test_upload_then_full_pipeline_to_completed() {
    let stack = setup().await;
    let archive = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);

    let image = stack
        .pipeline
        .upload(7, "myapp", archive, &HashMap::new(), false)
        .await
        .unwrap();
    assert_eq!(image.state, ImageState::Pending);
    assert_eq!(image.version, 1);

    let processed = stack.pipeline.process_pending().await.unwrap();
    assert_eq!(processed, 1);

    let image = stack.database.get_image(image.id).await.unwrap();
    assert_eq!(image.state, ImageState::Completed);
    assert_eq!(image.image_tag.as_deref(), Some("customer-7/myapp:v1"));

    // Engine output landed in the build log, ordered by step
    let logs = stack.database.get_build_logs(image.id, 1000).await.unwrap();
    assert!(logs.iter().any(|l| l.step == "validate"));
    assert!(logs.iter().any(|l| l.step == "build" && l.line.contains("Successfully tagged")));

    let runtime_state = stack.runtime.state.lock().await;
    assert_eq!(runtime_state.built_tags, vec!["customer-7/myapp:v1"]);
}

#[tokio::test]
async fn test_upload_rejects_bad_archives_synchronously() {
    let stack = setup().await;

    // Not gzip
    assert!(stack
        .pipeline
        .upload(7, "a", b"plain text".to_vec(), &HashMap::new(), false)
        .await
        .is_err());
    // Empty
    assert!(stack
        .pipeline
        .upload(7, "b", Vec::new(), &HashMap::new(), false)
        .await
        .is_err());
    // Oversized (limit is 1 MiB in the test config)
    let huge = vec![0x1f; 2 * 1024 * 1024];
    assert!(stack
        .pipeline
        .upload(7, "c", huge, &HashMap::new(), false)
        .await
        .is_err());
    // Bad name
    let ok = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);
    assert!(stack
        .pipeline
        .upload(7, "../evil", ok, &HashMap::new(), false)
        .await
        .is_err());
}

#[tokio::test]
async fn test_missing_dockerfile_fails_at_validating() {
    let stack = setup().await;
    let archive = build_archive(&[("README.md", "nothing to build")]);

    let image = stack
        .pipeline
        .upload(7, "broken", archive, &HashMap::new(), false)
        .await
        .unwrap();
    stack.pipeline.process_pending().await.unwrap();

    let image = stack.database.get_image(image.id).await.unwrap();
    assert_eq!(image.state, ImageState::Failed);
    assert!(image
        .build_error
        .as_deref()
        .unwrap_or_default()
        .contains("no Dockerfile"));
    // The build step never ran
    let runtime_state = stack.runtime.state.lock().await;
    assert!(runtime_state.built_tags.is_empty());
}

#[tokio::test]
async fn test_build_failure_parks_failed_with_error() {
    let stack = setup().await;
    stack.runtime.fail_build.store(true, Ordering::SeqCst);

    let archive = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);
    let image = stack
        .pipeline
        .upload(7, "willfail", archive, &HashMap::new(), false)
        .await
        .unwrap();
    stack.pipeline.process_pending().await.unwrap();

    let image = stack.database.get_image(image.id).await.unwrap();
    assert_eq!(image.state, ImageState::Failed);
    assert!(image
        .build_error
        .as_deref()
        .unwrap_or_default()
        .contains("build failed"));
}

#[tokio::test]
async fn test_concurrent_same_name_uploads_get_unique_archive_keys() {
    let stack = setup().await;
    let archive = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);

    let first = stack
        .pipeline
        .upload(7, "shared", archive.clone(), &HashMap::new(), false)
        .await
        .unwrap();
    let second = stack
        .pipeline
        .upload(7, "shared", archive, &HashMap::new(), false)
        .await
        .unwrap();

    assert_ne!(first.archive_key, second.archive_key);
    // Both archives really exist in storage
    assert!(stack.storage.get(&first.archive_key).await.is_ok());
    assert!(stack.storage.get(&second.archive_key).await.is_ok());
}

#[tokio::test]
async fn test_rebuild_creates_version_chain_without_mutating_original() {
    let stack = setup().await;
    let archive = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);

    let original = stack
        .pipeline
        .upload(7, "chained", archive, &HashMap::new(), false)
        .await
        .unwrap();
    stack.pipeline.process_pending().await.unwrap();

    let rebuilt = stack.pipeline.rebuild(original.id).await.unwrap();
    assert_eq!(rebuilt.version, original.version + 1);
    assert_eq!(rebuilt.previous_version_id, Some(original.id));
    assert_eq!(rebuilt.state, ImageState::Pending);

    stack.pipeline.process_pending().await.unwrap();
    let rebuilt = stack.database.get_image(rebuilt.id).await.unwrap();
    assert_eq!(rebuilt.state, ImageState::Completed);
    assert_eq!(rebuilt.image_tag.as_deref(), Some("customer-7/chained:v2"));

    // The original row is untouched
    let original_after = stack.database.get_image(original.id).await.unwrap();
    assert_eq!(original_after.state, ImageState::Completed);
    assert_eq!(original_after.version, 1);
    assert_eq!(original_after.image_tag.as_deref(), Some("customer-7/chained:v1"));
}

#[tokio::test]
async fn test_approval_gate_and_rejection() {
    let stack = setup().await;
    let archive = build_archive(&[("Dockerfile", VALID_DOCKERFILE)]);

    let image = stack
        .pipeline
        .upload(7, "gated", archive, &HashMap::new(), true)
        .await
        .unwrap();

    // Approving before completion is an invariant violation
    assert!(stack.pipeline.approve(image.id, "admin").await.is_err());

    stack.pipeline.process_pending().await.unwrap();
    let approved = stack.pipeline.approve(image.id, "admin").await.unwrap();
    assert!(approved.approved_at.is_some());
    assert_eq!(approved.approved_by.as_deref(), Some("admin"));

    // A completed image may also be rejected, which is terminal
    let rejected = stack
        .pipeline
        .reject(image.id, "policy violation")
        .await
        .unwrap();
    assert_eq!(rejected.state, ImageState::Rejected);
    assert!(stack.pipeline.approve(image.id, "admin").await.is_err());
}
