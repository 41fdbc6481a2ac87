//! Pipeline run models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DeckhandError;
use crate::models::image::{ImageDigest, ImageRef};
use crate::pipeline::fsm::PipelineState;

/// Source push that starts a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Commit the run builds
    pub commit_sha: String,

    /// Branch the commit was pushed to
    pub branch: String,

    /// Repository slug, informational only
    #[serde(default)]
    pub repository: Option<String>,

    pub received_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn push(commit_sha: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            commit_sha: commit_sha.into(),
            branch: branch.into(),
            repository: None,
            received_at: Utc::now(),
        }
    }
}

/// Report of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub trigger: TriggerEvent,
    pub state: PipelineState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<ImageDigest>,

    /// Registered task definition revision (`family:revision`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// State the run was in when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<PipelineState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(trigger: TriggerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            state: PipelineState::Triggered,
            image: None,
            digest: None,
            revision: None,
            failed_stage: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == PipelineState::RolloutStable
    }

    /// The run as a result, failures classed by the stage that broke
    pub fn outcome(&self) -> Result<(), DeckhandError> {
        if self.is_success() {
            return Ok(());
        }

        let stage = self.failed_stage.unwrap_or(self.state);
        let message = format!(
            "pipeline stopped in {}: {}",
            stage,
            self.error.as_deref().unwrap_or("unknown error")
        );
        Err(match stage {
            PipelineState::Triggered => DeckhandError::BuildError(message),
            PipelineState::ImageBuilt => DeckhandError::PublishError(message),
            PipelineState::ImagePushed | PipelineState::TaskRegistered => {
                DeckhandError::RegistrationError(message)
            }
            _ => DeckhandError::RolloutError(message),
        })
    }
}
