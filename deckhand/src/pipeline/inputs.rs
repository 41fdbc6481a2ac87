//! Pipeline inputs taken from the CI environment

use std::collections::HashMap;

use secrecy::SecretString;

use crate::deploy::ecs::AwsCredentials;
use crate::errors::DeckhandError;

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_REGION: &str = "AWS_REGION";
pub const ECR_REGISTRY: &str = "ECR_REGISTRY";
pub const ECR_REPOSITORY: &str = "ECR_REPOSITORY";
pub const ECS_CLUSTER: &str = "ECS_CLUSTER";
pub const ECS_SERVICE: &str = "ECS_SERVICE";
pub const ECS_TASK_DEFINITION: &str = "ECS_TASK_DEFINITION";
pub const CONTAINER_NAME: &str = "CONTAINER_NAME";

/// Everything a pipeline run needs from its environment. Values are opaque
/// strings; only their presence is checked.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub credentials: AwsCredentials,
    pub region: String,

    /// Registry host; empty when the repository name is fully qualified
    pub registry: String,
    pub repository: String,
    pub cluster: String,
    pub service: String,

    /// Path to the task definition template
    pub task_definition: String,
    pub container_name: String,
}

impl PipelineInputs {
    /// Read inputs from the process environment
    pub fn from_env() -> Result<Self, DeckhandError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, DeckhandError> {
        let required = |name: &str| -> Result<String, DeckhandError> {
            match vars.get(name) {
                Some(value) if !value.is_empty() => Ok(value.clone()),
                _ => Err(DeckhandError::ConfigError(format!(
                    "missing required environment variable {}",
                    name
                ))),
            }
        };

        Ok(Self {
            credentials: AwsCredentials {
                access_key_id: SecretString::from(required(AWS_ACCESS_KEY_ID)?),
                secret_access_key: SecretString::from(required(AWS_SECRET_ACCESS_KEY)?),
            },
            region: required(AWS_REGION)?,
            registry: vars.get(ECR_REGISTRY).cloned().unwrap_or_default(),
            repository: required(ECR_REPOSITORY)?,
            cluster: required(ECS_CLUSTER)?,
            service: required(ECS_SERVICE)?,
            task_definition: required(ECS_TASK_DEFINITION)?,
            container_name: required(CONTAINER_NAME)?,
        })
    }
}
