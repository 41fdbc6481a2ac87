//! Task definition documents and registered revisions

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

/// Port mapping for a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Log driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,

    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A single container inside a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default = "default_true")]
    pub essential: bool,

    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,

    /// Fields this crate does not model (environment, healthCheck, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Task definition as accepted by `register-task-definition`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub family: String,

    pub container_definitions: Vec<ContainerDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_compatibilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskDefinition {
    /// Parse a task definition document
    pub fn from_json(raw: &str) -> Result<Self, DeckhandError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> Result<String, DeckhandError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Copy of this definition with `container_name` pointed at `image_uri`
    pub fn with_image(&self, container_name: &str, image_uri: &str) -> Result<Self, DeckhandError> {
        let mut rendered = self.clone();
        let container = rendered
            .container_definitions
            .iter_mut()
            .find(|c| c.name == container_name)
            .ok_or_else(|| {
                DeckhandError::NotFound(format!(
                    "container '{}' in task definition '{}'",
                    container_name, self.family
                ))
            })?;
        container.image = image_uri.to_string();
        Ok(rendered)
    }

    /// Image currently configured for a container
    pub fn image_for(&self, container_name: &str) -> Option<&str> {
        self.container_definitions
            .iter()
            .find(|c| c.name == container_name)
            .map(|c| c.image.as_str())
    }

    /// Check the definition is complete enough to register
    pub fn validate(&self) -> Result<(), DeckhandError> {
        if self.family.trim().is_empty() {
            return Err(DeckhandError::ValidationError(
                "task definition family is empty".to_string(),
            ));
        }
        if self.container_definitions.is_empty() {
            return Err(DeckhandError::ValidationError(format!(
                "task definition '{}' has no containers",
                self.family
            )));
        }

        let mut names = HashSet::new();
        for container in &self.container_definitions {
            if !names.insert(container.name.as_str()) {
                return Err(DeckhandError::ValidationError(format!(
                    "duplicate container name '{}'",
                    container.name
                )));
            }
            if container.image.trim().is_empty() {
                return Err(DeckhandError::ValidationError(format!(
                    "container '{}' has no image",
                    container.name
                )));
            }
            if container.port_mappings.is_empty() {
                return Err(DeckhandError::ValidationError(format!(
                    "container '{}' exposes no ports",
                    container.name
                )));
            }
        }
        Ok(())
    }
}

/// A registered, immutable revision of a task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinitionRevision {
    pub family: String,
    pub revision: u32,
    pub definition: TaskDefinition,
    pub registered_at: DateTime<Utc>,
}

impl TaskDefinitionRevision {
    /// `family:revision`, the form services reference
    pub fn id(&self) -> String {
        format!("{}:{}", self.family, self.revision)
    }
}
