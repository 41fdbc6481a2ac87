//! Deployment providers: the external services a release talks to

pub mod docker;
pub mod ecs;
pub mod process;

use async_trait::async_trait;

use crate::errors::DeckhandError;
use crate::models::image::{ImageDigest, ImageRef};
use crate::models::task_definition::{TaskDefinition, TaskDefinitionRevision};

/// Builds a container image
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build and tag `image`, returning its content digest
    async fn build(&self, image: &ImageRef) -> Result<ImageDigest, DeckhandError>;
}

/// Stores built images. Tags are immutable once pushed.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Publish a built image. Pushing the same digest under the same tag
    /// again is a no-op.
    async fn push(&self, image: &ImageRef, digest: &ImageDigest) -> Result<(), DeckhandError>;

    /// Whether the tag exists in the registry
    async fn contains(&self, image: &ImageRef) -> Result<bool, DeckhandError>;
}

/// Registers task definitions, one new revision per call
#[async_trait]
pub trait TaskDefinitionRegistry: Send + Sync {
    async fn register(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision, DeckhandError>;
}

/// Points a service at a revision and waits for the rollout
#[async_trait]
pub trait ServiceDeployer: Send + Sync {
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &TaskDefinitionRevision,
    ) -> Result<(), DeckhandError>;

    /// Resolve once the service runs only healthy tasks of the latest
    /// revision; fail if that does not happen within the rollout window
    async fn wait_stable(&self, cluster: &str, service: &str) -> Result<(), DeckhandError>;
}
