//! Rolling update: replace running tasks without dropping below the
//! minimum healthy count

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::balancer::group::TargetGroup;
use crate::balancer::probe::Prober;
use crate::balancer::target::TargetState;
use crate::errors::DeckhandError;
use crate::models::task_definition::TaskDefinitionRevision;
use crate::rollout::policy::RolloutPolicy;

/// A task started from some revision, reachable at `url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningTask {
    pub id: String,
    pub revision: String,
    pub url: String,
}

/// Starts and stops tasks
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(&self, revision: &TaskDefinitionRevision) -> Result<RunningTask, DeckhandError>;

    async fn stop(&self, task: &RunningTask) -> Result<(), DeckhandError>;
}

/// One rolling update of a service to a new revision
pub struct RollingUpdate {
    policy: RolloutPolicy,
    interval: Duration,
    group: Arc<TargetGroup>,
    launcher: Arc<dyn TaskLauncher>,
    prober: Arc<dyn Prober>,
}

impl RollingUpdate {
    pub fn new(
        policy: RolloutPolicy,
        interval: Duration,
        group: Arc<TargetGroup>,
        launcher: Arc<dyn TaskLauncher>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            policy,
            interval,
            group,
            launcher,
            prober,
        }
    }

    /// Replace `old` tasks with tasks of `revision`.
    ///
    /// On success the returned tasks are the service's new task set and no
    /// old task is left. On failure every new task is stopped and `old` is
    /// untouched apart from tasks already drained.
    pub async fn run(
        &self,
        old: Vec<RunningTask>,
        revision: &TaskDefinitionRevision,
    ) -> Result<Vec<RunningTask>, (DeckhandError, Vec<RunningTask>)> {
        let mut old = old;
        let mut new: Vec<RunningTask> = Vec::new();
        let mut failed_tasks = 0u32;
        let desired = self.policy.desired_count as usize;

        info!(
            "Rolling {} -> {} ({} tasks, min healthy {}, max {})",
            old.first().map(|t| t.revision.as_str()).unwrap_or("<none>"),
            revision.id(),
            desired,
            self.policy.min_healthy_tasks(),
            self.policy.max_tasks()
        );

        for interval in 1..=self.policy.max_intervals {
            // Replace new tasks that failed their health checks
            let mut kept = Vec::with_capacity(new.len());
            for task in new.drain(..) {
                if self.group.state(&task.id) == Some(TargetState::Unhealthy) {
                    failed_tasks += 1;
                    warn!(
                        "Task {} of {} failed health checks ({}/{})",
                        task.id,
                        revision.id(),
                        failed_tasks,
                        self.policy.failed_task_threshold
                    );
                    self.retire(&task).await;
                } else {
                    kept.push(task);
                }
            }
            new = kept;

            if failed_tasks >= self.policy.failed_task_threshold {
                let err = DeckhandError::RolloutError(format!(
                    "{} tasks of {} failed health checks",
                    failed_tasks,
                    revision.id()
                ));
                return Err(self.abort(err, new, old).await);
            }

            if let Err(e) = self.launch_up_to_capacity(&mut new, old.len(), revision).await {
                return Err(self.abort(e, new, old).await);
            }

            self.group.probe_all(self.prober.as_ref()).await;
            self.drain_old(&mut old, &new).await;

            let new_healthy = new
                .iter()
                .filter(|t| self.group.state(&t.id) == Some(TargetState::Healthy))
                .count();
            debug!(
                "Interval {}: {} old, {}/{} new healthy",
                interval,
                old.len(),
                new_healthy,
                desired
            );

            if old.is_empty() && new.len() == desired && new_healthy == desired {
                info!("Rollout of {} stable after {} intervals", revision.id(), interval);
                return Ok(new);
            }

            tokio::time::sleep(self.interval).await;
        }

        let err = DeckhandError::RolloutError(format!(
            "{} did not become stable within {} health check intervals",
            revision.id(),
            self.policy.max_intervals
        ));
        Err(self.abort(err, new, old).await)
    }

    async fn launch_up_to_capacity(
        &self,
        new: &mut Vec<RunningTask>,
        old_count: usize,
        revision: &TaskDefinitionRevision,
    ) -> Result<(), DeckhandError> {
        let desired = self.policy.desired_count as usize;
        let max_tasks = self.policy.max_tasks() as usize;

        while new.len() < desired && old_count + new.len() < max_tasks {
            let task = self.launcher.launch(revision).await?;
            if let Err(e) = self.group.register(&task.id, &task.url) {
                let _ = self.launcher.stop(&task).await;
                return Err(e);
            }
            debug!("Launched task {} at {}", task.id, task.url);
            new.push(task);
        }
        Ok(())
    }

    /// Stop old tasks while this service's healthy count stays at the
    /// minimum. Unhealthy old tasks carry no traffic and always go.
    async fn drain_old(&self, old: &mut Vec<RunningTask>, new: &[RunningTask]) {
        let min_healthy = self.policy.min_healthy_tasks() as usize;
        old.sort_by_key(|t| match self.group.state(&t.id) {
            Some(TargetState::Unhealthy) => 0,
            Some(TargetState::Healthy) => 2,
            _ => 1,
        });

        let mut healthy = old
            .iter()
            .chain(new)
            .filter(|t| self.group.state(&t.id) == Some(TargetState::Healthy))
            .count();

        while let Some(task) = old.first() {
            match self.group.state(&task.id) {
                Some(TargetState::Unhealthy) => {}
                Some(TargetState::Healthy) => {
                    if healthy <= min_healthy {
                        break;
                    }
                    healthy -= 1;
                }
                _ => {
                    if healthy < min_healthy {
                        break;
                    }
                }
            }

            let task = old.remove(0);
            info!("Draining old task {} ({})", task.id, task.revision);
            self.retire(&task).await;
        }
    }

    /// Deregister, stop and forget a task
    async fn retire(&self, task: &RunningTask) {
        if let Err(e) = self.group.deregister(&task.id) {
            debug!("Deregister {}: {}", task.id, e);
        }
        if let Err(e) = self.launcher.stop(task).await {
            warn!("Failed to stop task {}: {}", task.id, e);
        }
        if let Err(e) = self.group.remove(&task.id) {
            debug!("Remove {}: {}", task.id, e);
        }
    }

    async fn abort(
        &self,
        err: DeckhandError,
        new: Vec<RunningTask>,
        old: Vec<RunningTask>,
    ) -> (DeckhandError, Vec<RunningTask>) {
        warn!("Rollout failed, keeping previous tasks: {}", err);
        for task in &new {
            self.retire(task).await;
        }
        (err, old)
    }
}
