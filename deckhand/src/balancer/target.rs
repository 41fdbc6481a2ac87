//! Per-target health state machine

use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

/// Target health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Not registered with the group
    Unused,

    /// Registered, waiting for enough passing probes
    Initial,

    /// Receiving traffic
    Healthy,

    /// Failing probes, no traffic
    Unhealthy,

    /// Deregistered, finishing in-flight requests
    Draining,
}

/// Result of one health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// Consecutive-probe thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Consecutive successes to become healthy
    pub healthy: u32,

    /// Consecutive failures to become unhealthy
    pub unhealthy: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            healthy: 5,
            unhealthy: 2,
        }
    }
}

/// Health FSM for one target
#[derive(Debug, Clone)]
pub struct TargetHealth {
    state: TargetState,
    thresholds: Thresholds,
    consecutive_successes: u32,
    consecutive_failures: u32,
    last_failure: Option<String>,
}

impl TargetHealth {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            state: TargetState::Unused,
            thresholds,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state == TargetState::Healthy
    }

    /// Reason of the most recent failed probe
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Unused -> Initial
    pub fn register(&mut self) -> Result<(), DeckhandError> {
        match self.state {
            TargetState::Unused => {
                self.reset_streaks();
                self.state = TargetState::Initial;
                Ok(())
            }
            state => Err(DeckhandError::TransitionError(format!(
                "cannot register target in state {:?}",
                state
            ))),
        }
    }

    /// Any registered state -> Draining
    pub fn deregister(&mut self) -> Result<(), DeckhandError> {
        match self.state {
            TargetState::Initial | TargetState::Healthy | TargetState::Unhealthy => {
                self.state = TargetState::Draining;
                Ok(())
            }
            state => Err(DeckhandError::TransitionError(format!(
                "cannot deregister target in state {:?}",
                state
            ))),
        }
    }

    /// Draining -> Unused
    pub fn drained(&mut self) -> Result<(), DeckhandError> {
        match self.state {
            TargetState::Draining => {
                self.reset_streaks();
                self.state = TargetState::Unused;
                Ok(())
            }
            state => Err(DeckhandError::TransitionError(format!(
                "cannot finish draining target in state {:?}",
                state
            ))),
        }
    }

    /// Apply a probe result and return the resulting state.
    /// Probes against unregistered or draining targets are ignored.
    pub fn record(&mut self, outcome: ProbeOutcome) -> TargetState {
        if matches!(self.state, TargetState::Unused | TargetState::Draining) {
            return self.state;
        }

        match outcome {
            ProbeOutcome::Success => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);

                if self.state != TargetState::Healthy
                    && self.consecutive_successes >= self.thresholds.healthy
                {
                    self.state = TargetState::Healthy;
                }
            }
            ProbeOutcome::Failure(reason) => {
                self.consecutive_successes = 0;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure = Some(reason);

                if self.state != TargetState::Unhealthy
                    && self.consecutive_failures >= self.thresholds.unhealthy
                {
                    self.state = TargetState::Unhealthy;
                }
            }
        }

        self.state
    }

    fn reset_streaks(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.last_failure = None;
    }
}
