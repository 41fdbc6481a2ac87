//! End-to-end pipeline tests against the local registry and cluster

mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{group, policy, FakeBuilder, FakeLauncher, ScriptedProber, TEMPLATE};
use deckhand::deploy::{ImageRegistry, ServiceDeployer, TaskDefinitionRegistry};
use deckhand::errors::DeckhandError;
use deckhand::local::cluster::LocalCluster;
use deckhand::local::registry::InMemoryRegistry;
use deckhand::balancer::target::TargetState;
use deckhand::models::image::{ImageDigest, ImageRef};
use deckhand::models::task_definition::TaskDefinition;
use deckhand::models::pipeline::TriggerEvent;
use deckhand::pipeline::executor::{Pipeline, PipelineTarget};
use deckhand::pipeline::fsm::PipelineState;

struct Harness {
    pipeline: Pipeline,
    cluster: Arc<LocalCluster>,
    registry: Arc<InMemoryRegistry>,
    builder: Arc<FakeBuilder>,
    launcher: Arc<FakeLauncher>,
    prober: Arc<ScriptedProber>,
    _dir: tempfile::TempDir,
}

fn target(dir: &Path) -> PipelineTarget {
    PipelineTarget {
        registry: "123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string(),
        repository: "web".to_string(),
        cluster: "main".to_string(),
        service: "web-svc".to_string(),
        task_definition_path: dir.join("task-definition.json"),
        container_name: "web".to_string(),
    }
}

fn harness_with_registry(registry: Arc<dyn ImageRegistry>, inner: Arc<InMemoryRegistry>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("task-definition.json"), TEMPLATE).unwrap();

    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let cluster = Arc::new(
        LocalCluster::new("main", policy(2, 100, 200), group(2, 2), launcher.clone(), prober.clone())
            .with_interval(Duration::from_millis(1)),
    );
    cluster.create_service("web-svc").unwrap();

    let builder = Arc::new(FakeBuilder::default());
    let pipeline = Pipeline::new(
        target(dir.path()),
        builder.clone(),
        registry,
        cluster.clone(),
        cluster.clone(),
    );

    Harness {
        pipeline,
        cluster,
        registry: inner,
        builder,
        launcher,
        prober,
        _dir: dir,
    }
}

fn harness() -> Harness {
    let registry = Arc::new(InMemoryRegistry::new());
    harness_with_registry(registry.clone(), registry)
}

#[tokio::test]
async fn test_push_deploys_commit() {
    let h = harness();

    let run = h.pipeline.run(TriggerEvent::push("abc123", "main")).await;

    assert!(run.is_success(), "{:?}", run.error);
    assert_eq!(run.state, PipelineState::RolloutStable);
    let image = run.image.clone().unwrap();
    assert_eq!(
        image.uri(),
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/web:abc123"
    );
    assert!(h.registry.contains(&image).await.unwrap());
    assert_eq!(run.revision.as_deref(), Some("web:1"));
    assert!(run.finished_at.is_some());

    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:1"));
    let revisions = h.cluster.revisions("web");
    assert_eq!(
        revisions[0].definition.image_for("web"),
        Some(image.uri().as_str())
    );
    let tasks = h.cluster.running_tasks("web-svc").await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.revision == "web:1"));
}

#[tokio::test]
async fn test_rerun_of_same_commit_is_idempotent() {
    let h = harness();

    let first = h.pipeline.run(TriggerEvent::push("abc123", "main")).await;
    let second = h.pipeline.run(TriggerEvent::push("abc123", "main")).await;

    assert!(first.is_success());
    assert!(second.is_success(), "{:?}", second.error);
    assert_eq!(first.digest, second.digest);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(second.revision.as_deref(), Some("web:2"));
    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:2"));
}

#[tokio::test]
async fn test_build_failure_publishes_nothing() {
    let h = harness();
    let good = h.pipeline.run(TriggerEvent::push("abc123", "main")).await;
    assert!(good.is_success());

    *h.builder.fail.lock().unwrap() = true;
    let run = h.pipeline.run(TriggerEvent::push("def456", "main")).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert_eq!(run.failed_stage, Some(PipelineState::Triggered));
    assert!(run.error.as_deref().unwrap().contains("npm ci failed"));
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.cluster.revisions("web").len(), 1);
    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:1"));
}

/// Registry that refuses every push
struct BrokenRegistry;

#[async_trait]
impl ImageRegistry for BrokenRegistry {
    async fn push(&self, _image: &ImageRef, _digest: &ImageDigest) -> Result<(), DeckhandError> {
        Err(DeckhandError::PublishError("denied: not authorized".to_string()))
    }

    async fn contains(&self, _image: &ImageRef) -> Result<bool, DeckhandError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_push_failure_stops_before_registration() {
    let h = harness_with_registry(Arc::new(BrokenRegistry), Arc::new(InMemoryRegistry::new()));

    let run = h.pipeline.run(TriggerEvent::push("abc123", "main")).await;

    assert_eq!(run.failed_stage, Some(PipelineState::ImageBuilt));
    assert!(run.error.as_deref().unwrap().contains("not authorized"));
    assert!(run.revision.is_none());
    assert!(h.cluster.revisions("web").is_empty());
    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap(), None);
}

#[tokio::test]
async fn test_unhealthy_release_keeps_previous_revision_serving() {
    let h = harness();
    assert!(h.pipeline.run(TriggerEvent::push("abc123", "main")).await.is_success());
    let before = h.cluster.running_tasks("web-svc").await.unwrap();

    // Every task of revision 2 fails its health checks
    h.prober.fail("web-2-");
    let run = h.pipeline.run(TriggerEvent::push("def456", "main")).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert_eq!(run.failed_stage, Some(PipelineState::ServiceUpdated));
    assert_eq!(run.revision.as_deref(), Some("web:2"));
    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:1"));
    assert_eq!(h.cluster.running_tasks("web-svc").await.unwrap(), before);
    assert_eq!(h.launcher.running().len(), 2);
    assert_eq!(h.cluster.target_group().healthy_count(), 2);
}

#[tokio::test]
async fn test_invalid_commit_fails_before_build() {
    let h = harness();

    let run = h.pipeline.run(TriggerEvent::push("latest", "main")).await;

    assert_eq!(run.failed_stage, Some(PipelineState::Triggered));
    assert!(run.image.is_none());
    assert_eq!(h.builder.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rollback_restores_previous_revision() {
    let h = harness();
    assert!(h.pipeline.run(TriggerEvent::push("abc123", "main")).await.is_success());
    assert!(h.pipeline.run(TriggerEvent::push("def456", "main")).await.is_success());

    let restored = h.cluster.rollback("web-svc").await.unwrap();

    assert_eq!(restored.id(), "web:1");
    assert_eq!(h.cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:1"));
    let tasks = h.cluster.running_tasks("web-svc").await.unwrap();
    assert!(tasks.iter().all(|t| t.revision == "web:1"));
    assert!(h.cluster.rollback("web-svc").await.is_err());
}

#[tokio::test]
async fn test_unknown_service_or_revision() {
    let h = harness();
    let revision = common::revision("web", 9);

    let err = h
        .cluster
        .update_service("main", "missing", &revision)
        .await
        .unwrap_err();
    assert!(matches!(err, DeckhandError::NotFound(_)));

    let err = h
        .cluster
        .update_service("main", "web-svc", &revision)
        .await
        .unwrap_err();
    assert!(matches!(err, DeckhandError::NotFound(_)));

    let err = h
        .cluster
        .update_service("other", "web-svc", &revision)
        .await
        .unwrap_err();
    assert!(matches!(err, DeckhandError::NotFound(_)));
}

#[tokio::test]
async fn test_runs_on_one_branch_are_serialized() {
    let h = Arc::new(harness());

    let a = {
        let h = h.clone();
        tokio::spawn(async move { h.pipeline.run(TriggerEvent::push("abc123", "main")).await })
    };
    let b = {
        let h = h.clone();
        tokio::spawn(async move { h.pipeline.run(TriggerEvent::push("def456", "main")).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.is_success() && b.is_success());
    let (first, second) = if a.started_at <= b.started_at { (a, b) } else { (b, a) };
    assert!(first.finished_at.unwrap() <= second.started_at);
    assert_eq!(h.cluster.revisions("web").len(), 2);
    assert_eq!(h.pipeline.active_branches(), 0);
}

#[tokio::test]
async fn test_finished_branches_release_their_lock() {
    let h = harness();

    for branch in ["main", "feature-a", "feature-b"] {
        h.pipeline.run(TriggerEvent::push("abc123", branch)).await;
        assert_eq!(h.pipeline.active_branches(), 0);
    }
}

#[tokio::test]
async fn test_other_services_do_not_count_toward_minimum_healthy() {
    let launcher = Arc::new(FakeLauncher::default());
    let prober = Arc::new(ScriptedProber::default());
    let cluster = LocalCluster::new("main", policy(1, 100, 200), group(2, 2), launcher.clone(), prober.clone())
        .with_interval(Duration::from_millis(1));
    cluster.create_service("api-svc").unwrap();
    cluster.create_service("web-svc").unwrap();

    let mut api = TaskDefinition::from_json(TEMPLATE).unwrap();
    api.family = "api".to_string();
    let web = TaskDefinition::from_json(TEMPLATE).unwrap();
    for (service, definition) in [("api-svc", &api), ("web-svc", &web)] {
        let revision = cluster.register(definition).await.unwrap();
        cluster.update_service("main", service, &revision).await.unwrap();
        cluster.wait_stable("main", service).await.unwrap();
    }
    let api_tasks = cluster.running_tasks("api-svc").await.unwrap();
    let web_tasks = cluster.running_tasks("web-svc").await.unwrap();

    // The api task is healthy but must not stand in for the web task
    prober.fail("web-2-");
    let revision = cluster.register(&web).await.unwrap();
    cluster.update_service("main", "web-svc", &revision).await.unwrap();
    assert!(cluster.wait_stable("main", "web-svc").await.is_err());

    assert_eq!(cluster.active_revision("web-svc").await.unwrap().as_deref(), Some("web:1"));
    assert_eq!(cluster.running_tasks("web-svc").await.unwrap(), web_tasks);
    assert_eq!(cluster.target_group().state(&web_tasks[0].id), Some(TargetState::Healthy));
    assert_eq!(cluster.running_tasks("api-svc").await.unwrap(), api_tasks);
    assert_eq!(launcher.running().len(), 2);
}
