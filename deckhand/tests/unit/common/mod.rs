//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deckhand::balancer::group::TargetGroup;
use deckhand::balancer::probe::{HealthCheckConfig, Prober, StatusMatcher};
use deckhand::balancer::target::{ProbeOutcome, Thresholds};
use deckhand::deploy::ImageBuilder;
use deckhand::errors::DeckhandError;
use deckhand::models::image::{ImageDigest, ImageRef};
use deckhand::models::task_definition::{TaskDefinition, TaskDefinitionRevision};
use deckhand::rollout::engine::{RunningTask, TaskLauncher};
use deckhand::rollout::policy::RolloutPolicy;

pub const TEMPLATE: &str = r#"{
    "family": "web",
    "networkMode": "awsvpc",
    "requiresCompatibilities": ["FARGATE"],
    "cpu": "256",
    "memory": "512",
    "containerDefinitions": [{
        "name": "web",
        "image": "placeholder",
        "portMappings": [{ "containerPort": 80 }]
    }]
}"#;

pub fn health_config(healthy: u32, unhealthy: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        path: "/health".to_string(),
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(40),
        thresholds: Thresholds { healthy, unhealthy },
        matcher: StatusMatcher::parse("200").unwrap(),
    }
}

pub fn group(healthy: u32, unhealthy: u32) -> Arc<TargetGroup> {
    Arc::new(TargetGroup::new(health_config(healthy, unhealthy)))
}

pub fn policy(desired: u32, min: u32, max: u32) -> RolloutPolicy {
    RolloutPolicy {
        desired_count: desired,
        minimum_healthy_percent: min,
        maximum_percent: max,
        max_intervals: 10,
        failed_task_threshold: 3,
    }
}

pub fn revision(family: &str, number: u32) -> TaskDefinitionRevision {
    TaskDefinitionRevision {
        family: family.to_string(),
        revision: number,
        definition: TaskDefinition::from_json(TEMPLATE).unwrap(),
        registered_at: chrono::Utc::now(),
    }
}

/// Launches nothing; tasks are names with a URL of `http://<family>-<rev>-<n>`
#[derive(Default)]
pub struct FakeLauncher {
    next: AtomicU32,
    pub running: Mutex<Vec<String>>,
    pub launched: AtomicUsize,
    pub fail_launch: Mutex<bool>,
}

impl FakeLauncher {
    pub fn running(&self) -> Vec<String> {
        self.running.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskLauncher for FakeLauncher {
    async fn launch(&self, revision: &TaskDefinitionRevision) -> Result<RunningTask, DeckhandError> {
        if *self.fail_launch.lock().unwrap() {
            return Err(DeckhandError::RolloutError("no capacity".to_string()));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}-{}", revision.family, revision.revision, n);
        self.running.lock().unwrap().push(id.clone());
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(RunningTask {
            url: format!("http://{}", id),
            id,
            revision: revision.id(),
        })
    }

    async fn stop(&self, task: &RunningTask) -> Result<(), DeckhandError> {
        self.running.lock().unwrap().retain(|id| id != &task.id);
        Ok(())
    }
}

/// Fails every target whose URL contains one of the `failing` markers
#[derive(Default)]
pub struct ScriptedProber {
    failing: Mutex<HashSet<String>>,
}

impl ScriptedProber {
    pub fn fail(&self, marker: &str) {
        self.failing.lock().unwrap().insert(marker.to_string());
    }

    pub fn heal(&self, marker: &str) {
        self.failing.lock().unwrap().remove(marker);
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target_url: &str) -> ProbeOutcome {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|m| target_url.contains(m.as_str())) {
            ProbeOutcome::Failure("unexpected status 500".to_string())
        } else {
            ProbeOutcome::Success
        }
    }
}

/// Digest is a function of the tag so reruns of a commit match
#[derive(Default)]
pub struct FakeBuilder {
    pub builds: AtomicUsize,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, image: &ImageRef) -> Result<ImageDigest, DeckhandError> {
        if *self.fail.lock().unwrap() {
            return Err(DeckhandError::BuildError("npm ci failed".to_string()));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ImageDigest::from_sha256_hex(&deckhand::utils::sha256_hash(
            image.tag.as_str().as_bytes(),
        )))
    }
}
