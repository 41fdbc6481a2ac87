//! Finite state machine for a release pipeline run

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Push received, nothing built yet
    Triggered,

    /// Image built locally
    ImageBuilt,

    /// Image published to the registry
    ImagePushed,

    /// New task definition revision registered
    TaskRegistered,

    /// Service pointed at the new revision
    ServiceUpdated,

    /// Every task of the new revision is healthy and old tasks are gone
    RolloutStable,

    /// A stage failed; nothing after it ran
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::RolloutStable | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Triggered => "triggered",
            PipelineState::ImageBuilt => "image-built",
            PipelineState::ImagePushed => "image-pushed",
            PipelineState::TaskRegistered => "task-registered",
            PipelineState::ServiceUpdated => "service-updated",
            PipelineState::RolloutStable => "rollout-stable",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Image build succeeded
    Built,

    /// Image push succeeded
    Pushed,

    /// Task definition registered
    Registered,

    /// Service update accepted
    ServiceUpdated,

    /// Rollout reached a steady state
    Stable,

    /// Current stage failed
    Failed(String),
}

/// Pipeline FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    state: PipelineState,
    failed_stage: Option<PipelineState>,
    error: Option<String>,
}

impl PipelineFsm {
    /// Create a new FSM in triggered state
    pub fn new() -> Self {
        Self {
            state: PipelineState::Triggered,
            failed_stage: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// State the run was in when it failed
    pub fn failed_stage(&self) -> Option<PipelineState> {
        self.failed_stage
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<PipelineState, DeckhandError> {
        let new_state = match (self.state, &event) {
            (PipelineState::Triggered, PipelineEvent::Built) => PipelineState::ImageBuilt,
            (PipelineState::ImageBuilt, PipelineEvent::Pushed) => PipelineState::ImagePushed,
            (PipelineState::ImagePushed, PipelineEvent::Registered) => PipelineState::TaskRegistered,
            (PipelineState::TaskRegistered, PipelineEvent::ServiceUpdated) => {
                PipelineState::ServiceUpdated
            }
            (PipelineState::ServiceUpdated, PipelineEvent::Stable) => PipelineState::RolloutStable,

            // Any stage may fail; terminal states accept nothing
            (state, PipelineEvent::Failed(err)) if !state.is_terminal() => {
                self.failed_stage = Some(state);
                self.error = Some(err.clone());
                PipelineState::Failed
            }

            (state, event) => {
                return Err(DeckhandError::TransitionError(format!(
                    "{} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
