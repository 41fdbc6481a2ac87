//! Rolling update policy

use crate::errors::DeckhandError;
use crate::storage::settings::RolloutSettings;

/// How far a rolling update may deviate from the desired task count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    pub desired_count: u32,
    pub minimum_healthy_percent: u32,
    pub maximum_percent: u32,
    pub max_intervals: u32,
    pub failed_task_threshold: u32,
}

impl RolloutPolicy {
    pub fn from_settings(settings: &RolloutSettings) -> Result<Self, DeckhandError> {
        let policy = Self {
            desired_count: settings.desired_count,
            minimum_healthy_percent: settings.minimum_healthy_percent,
            maximum_percent: settings.maximum_percent,
            max_intervals: settings.max_intervals,
            failed_task_threshold: settings.failed_task_threshold,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Healthy tasks that must remain while old tasks are drained
    pub fn min_healthy_tasks(&self) -> u32 {
        (self.desired_count * self.minimum_healthy_percent).div_ceil(100)
    }

    /// Upper bound on running tasks during the update
    pub fn max_tasks(&self) -> u32 {
        self.desired_count * self.maximum_percent / 100
    }

    pub fn validate(&self) -> Result<(), DeckhandError> {
        if self.desired_count == 0 {
            return Err(DeckhandError::ConfigError(
                "desired_count must be at least 1".to_string(),
            ));
        }
        if self.minimum_healthy_percent == 0 || self.minimum_healthy_percent > 100 {
            return Err(DeckhandError::ConfigError(format!(
                "minimum_healthy_percent must be in 1..=100, got {}",
                self.minimum_healthy_percent
            )));
        }
        if self.maximum_percent < 100 {
            return Err(DeckhandError::ConfigError(format!(
                "maximum_percent must be at least 100, got {}",
                self.maximum_percent
            )));
        }
        if self.max_tasks() <= self.desired_count && self.min_healthy_tasks() >= self.desired_count
        {
            return Err(DeckhandError::ConfigError(
                "rollout can neither start new tasks nor stop old ones; raise maximum_percent or lower minimum_healthy_percent".to_string(),
            ));
        }
        if self.max_intervals == 0 || self.failed_task_threshold == 0 {
            return Err(DeckhandError::ConfigError(
                "max_intervals and failed_task_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
