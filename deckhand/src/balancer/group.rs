//! Target group: registered targets and health-based routing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::balancer::probe::{HealthCheckConfig, Prober};
use crate::balancer::target::{TargetHealth, TargetState};
use crate::errors::DeckhandError;

struct Target {
    id: String,
    url: String,
    health: TargetHealth,
}

/// Point-in-time view of a target
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub id: String,
    pub url: String,
    pub state: TargetState,
    pub last_failure: Option<String>,
}

/// Targets behind one listener
pub struct TargetGroup {
    config: HealthCheckConfig,
    targets: RwLock<Vec<Target>>,
    cursor: AtomicUsize,
}

impl TargetGroup {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            targets: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Register a target; it starts in `Initial` and receives no traffic
    pub fn register(&self, id: &str, url: &str) -> Result<(), DeckhandError> {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());

        if targets.iter().any(|t| t.id == id) {
            return Err(DeckhandError::ValidationError(format!(
                "target '{}' is already registered",
                id
            )));
        }

        let mut health = TargetHealth::new(self.config.thresholds);
        health.register()?;
        targets.push(Target {
            id: id.to_string(),
            url: url.trim_end_matches('/').to_string(),
            health,
        });

        info!("Registered target {} ({})", id, url);
        Ok(())
    }

    /// Stop routing to a target
    pub fn deregister(&self, id: &str) -> Result<(), DeckhandError> {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        let target = targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| DeckhandError::NotFound(format!("target '{}'", id)))?;
        target.health.deregister()?;
        info!("Draining target {}", id);
        Ok(())
    }

    /// Finish draining and forget the target
    pub fn remove(&self, id: &str) -> Result<(), DeckhandError> {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        let index = targets
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| DeckhandError::NotFound(format!("target '{}'", id)))?;
        targets[index].health.drained()?;
        targets.remove(index);
        Ok(())
    }

    pub fn state(&self, id: &str) -> Option<TargetState> {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets.iter().find(|t| t.id == id).map(|t| t.health.state())
    }

    /// Probe every registered target once, concurrently
    pub async fn probe_all(&self, prober: &dyn Prober) -> Vec<TargetSnapshot> {
        let probed: Vec<(String, String)> = {
            let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
            targets
                .iter()
                .filter(|t| {
                    matches!(
                        t.health.state(),
                        TargetState::Initial | TargetState::Healthy | TargetState::Unhealthy
                    )
                })
                .map(|t| (t.id.clone(), t.url.clone()))
                .collect()
        };

        let outcomes = join_all(probed.iter().map(|(_, url)| prober.probe(url))).await;

        {
            let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
            for ((id, _), outcome) in probed.iter().zip(outcomes) {
                // The target may have been deregistered while probing
                if let Some(target) = targets.iter_mut().find(|t| &t.id == id) {
                    let before = target.health.state();
                    let after = target.health.record(outcome);
                    if before != after {
                        match after {
                            TargetState::Unhealthy => warn!(
                                "Target {} is unhealthy: {}",
                                id,
                                target.health.last_failure().unwrap_or("unknown")
                            ),
                            _ => info!("Target {} is now {:?}", id, after),
                        }
                    }
                }
            }
        }

        self.snapshot()
    }

    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets
            .iter()
            .map(|t| TargetSnapshot {
                id: t.id.clone(),
                url: t.url.clone(),
                state: t.health.state(),
                last_failure: t.health.last_failure().map(str::to_string),
            })
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets.iter().filter(|t| t.health.is_healthy()).count()
    }

    /// URLs of targets currently in `Healthy`
    pub fn healthy_targets(&self) -> Vec<String> {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets
            .iter()
            .filter(|t| t.health.is_healthy())
            .map(|t| t.url.clone())
            .collect()
    }

    /// Round-robin over healthy targets only
    pub fn next_target(&self) -> Option<String> {
        let healthy = self.healthy_targets();
        if healthy.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[index].clone())
    }
}
