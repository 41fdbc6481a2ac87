//! A single-process cluster: task definition revisions, services and
//! rolling updates against a local target group

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::balancer::group::TargetGroup;
use crate::balancer::probe::Prober;
use crate::deploy::{ServiceDeployer, TaskDefinitionRegistry};
use crate::errors::DeckhandError;
use crate::models::task_definition::{TaskDefinition, TaskDefinitionRevision};
use crate::rollout::engine::{RollingUpdate, RunningTask, TaskLauncher};
use crate::rollout::policy::RolloutPolicy;

#[derive(Debug, Default)]
struct Service {
    /// Revision every running task belongs to once stable
    active: Option<TaskDefinitionRevision>,

    /// Revision requested by the last update, not yet rolled out
    pending: Option<TaskDefinitionRevision>,

    /// Revisions that were active, oldest first
    history: Vec<TaskDefinitionRevision>,

    tasks: Vec<RunningTask>,
}

/// Snapshot of a service
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub active: Option<String>,
    pub pending: Option<String>,
    pub tasks: Vec<RunningTask>,
}

pub struct LocalCluster {
    name: String,
    policy: RolloutPolicy,
    interval: Duration,
    group: Arc<TargetGroup>,
    launcher: Arc<dyn TaskLauncher>,
    prober: Arc<dyn Prober>,
    revisions: RwLock<HashMap<String, Vec<TaskDefinitionRevision>>>,
    services: RwLock<HashMap<String, Arc<Mutex<Service>>>>,
}

impl LocalCluster {
    pub fn new(
        name: impl Into<String>,
        policy: RolloutPolicy,
        group: Arc<TargetGroup>,
        launcher: Arc<dyn TaskLauncher>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let interval = group.config().interval;
        Self {
            name: name.into(),
            policy,
            interval,
            group,
            launcher,
            prober,
            revisions: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Override the pause between rollout intervals
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_group(&self) -> Arc<TargetGroup> {
        self.group.clone()
    }

    /// Create an empty service with no tasks
    pub fn create_service(&self, service: &str) -> Result<(), DeckhandError> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        if services.contains_key(service) {
            return Err(DeckhandError::ValidationError(format!(
                "service '{}' already exists",
                service
            )));
        }
        services.insert(service.to_string(), Arc::new(Mutex::new(Service::default())));
        info!("Created service {}/{}", self.name, service);
        Ok(())
    }

    /// Registered revisions of a family, oldest first
    pub fn revisions(&self, family: &str) -> Vec<TaskDefinitionRevision> {
        let revisions = self.revisions.read().unwrap_or_else(|e| e.into_inner());
        revisions.get(family).cloned().unwrap_or_default()
    }

    fn find_revision(&self, family: &str, revision: u32) -> Option<TaskDefinitionRevision> {
        let revisions = self.revisions.read().unwrap_or_else(|e| e.into_inner());
        revisions
            .get(family)
            .and_then(|list| list.iter().find(|r| r.revision == revision))
            .cloned()
    }

    fn service(&self, cluster: &str, service: &str) -> Result<Arc<Mutex<Service>>, DeckhandError> {
        if cluster != self.name {
            return Err(DeckhandError::NotFound(format!("cluster '{}'", cluster)));
        }
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .get(service)
            .cloned()
            .ok_or_else(|| DeckhandError::NotFound(format!("service '{}/{}'", cluster, service)))
    }

    pub async fn status(&self, service: &str) -> Result<ServiceStatus, DeckhandError> {
        let service = self.service(&self.name, service)?;
        let service = service.lock().await;
        Ok(ServiceStatus {
            active: service.active.as_ref().map(|r| r.id()),
            pending: service.pending.as_ref().map(|r| r.id()),
            tasks: service.tasks.clone(),
        })
    }

    pub async fn active_revision(&self, service: &str) -> Result<Option<String>, DeckhandError> {
        Ok(self.status(service).await?.active)
    }

    pub async fn running_tasks(&self, service: &str) -> Result<Vec<RunningTask>, DeckhandError> {
        Ok(self.status(service).await?.tasks)
    }

    /// Roll the service back to the revision that was active before the
    /// current one
    pub async fn rollback(&self, service: &str) -> Result<TaskDefinitionRevision, DeckhandError> {
        let handle = self.service(&self.name, service)?;
        let previous = {
            let state = handle.lock().await;
            state.history.last().cloned().ok_or_else(|| {
                DeckhandError::RolloutError(format!(
                    "service '{}' has no previous revision to roll back to",
                    service
                ))
            })?
        };

        warn!("Rolling back {}/{} to {}", self.name, service, previous.id());
        self.update_service(&self.name, service, &previous).await?;
        self.wait_stable(&self.name, service).await?;

        // Forget both the revision rolled back from and the one restored, so
        // a second rollback goes one step further back
        let mut state = handle.lock().await;
        let keep = state.history.len().saturating_sub(2);
        state.history.truncate(keep);
        Ok(previous)
    }

    /// Stop every task of every service
    pub async fn shutdown(&self) {
        let services: Vec<Arc<Mutex<Service>>> = {
            let services = self.services.read().unwrap_or_else(|e| e.into_inner());
            services.values().cloned().collect()
        };
        for service in services {
            let mut service = service.lock().await;
            for task in service.tasks.drain(..) {
                let _ = self.group.deregister(&task.id);
                if let Err(e) = self.launcher.stop(&task).await {
                    warn!("Failed to stop task {}: {}", task.id, e);
                }
                let _ = self.group.remove(&task.id);
            }
        }
    }
}

#[async_trait]
impl TaskDefinitionRegistry for LocalCluster {
    async fn register(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision, DeckhandError> {
        definition.validate()?;

        let mut revisions = self.revisions.write().unwrap_or_else(|e| e.into_inner());
        let family = revisions.entry(definition.family.clone()).or_default();
        let revision = TaskDefinitionRevision {
            family: definition.family.clone(),
            revision: family.len() as u32 + 1,
            definition: definition.clone(),
            registered_at: Utc::now(),
        };
        family.push(revision.clone());

        info!("Registered task definition {}", revision.id());
        Ok(revision)
    }
}

#[async_trait]
impl ServiceDeployer for LocalCluster {
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &TaskDefinitionRevision,
    ) -> Result<(), DeckhandError> {
        let handle = self.service(cluster, service)?;
        let registered = self
            .find_revision(&revision.family, revision.revision)
            .ok_or_else(|| DeckhandError::NotFound(format!("task definition {}", revision.id())))?;

        let mut state = handle.lock().await;
        state.pending = Some(registered);
        info!("Service {}/{} now targets {}", cluster, service, revision.id());
        Ok(())
    }

    async fn wait_stable(&self, cluster: &str, service: &str) -> Result<(), DeckhandError> {
        let handle = self.service(cluster, service)?;
        let mut state = handle.lock().await;

        let Some(target) = state.pending.take() else {
            // Nothing requested since the last rollout
            return Ok(());
        };

        let update = RollingUpdate::new(
            self.policy,
            self.interval,
            self.group.clone(),
            self.launcher.clone(),
            self.prober.clone(),
        );
        let old = std::mem::take(&mut state.tasks);

        match update.run(old, &target).await {
            Ok(tasks) => {
                if let Some(previous) = state.active.take() {
                    if previous != target {
                        state.history.push(previous);
                    }
                }
                state.active = Some(target);
                state.tasks = tasks;
                Ok(())
            }
            Err((err, old)) => {
                state.tasks = old;
                Err(err)
            }
        }
    }
}
