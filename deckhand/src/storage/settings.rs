//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::DeckhandError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "DECKHAND_CONFIG";

/// Default settings file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "deckhand.json";

/// Deckhand settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Backend service
    #[serde(default)]
    pub backend: BackendSettings,

    /// Reverse proxy in front of the backend
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Target health checks
    #[serde(default)]
    pub health_check: HealthCheckSettings,

    /// Rolling update policy
    #[serde(default)]
    pub rollout: RolloutSettings,

    /// Release pipeline
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Load balancer front
    #[serde(default)]
    pub balancer: BalancerSettings,
}

impl Settings {
    /// Load settings from an explicit path, `DECKHAND_CONFIG`, or
    /// `deckhand.json`. A missing default file yields defaults; a missing
    /// explicit file is an error.
    pub async fn load(explicit: Option<PathBuf>) -> Result<Self, DeckhandError> {
        let (path, required) = match explicit {
            Some(path) => (path, true),
            None => match std::env::var(CONFIG_ENV_VAR) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let file = File::new(path);
        if !file.exists().await {
            if required {
                return Err(DeckhandError::ConfigError(format!(
                    "settings file not found: {}",
                    file.path().display()
                )));
            }
            debug!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }

        info!("Loading settings from {}", file.path().display());
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that span sections
    pub fn validate(&self) -> Result<(), DeckhandError> {
        let probe_timeout = Duration::from_secs(self.health_check.timeout_secs);
        if self.proxy.health_timeout() >= probe_timeout {
            return Err(DeckhandError::ConfigError(format!(
                "proxy.health_timeout_ms ({}) must be below health_check.timeout_secs ({}s)",
                self.proxy.health_timeout_ms, self.health_check.timeout_secs
            )));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Backend service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Body served at `/`
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_backend_port() -> u16 {
    3000
}

fn default_greeting() -> String {
    "Hello from deckhand!".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_backend_port(),
            greeting: default_greeting(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Base URL of the backend the proxy forwards to
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Path forwarded with the short health timeout
    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Must stay below the load balancer's probe timeout
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

fn default_proxy_port() -> u16 {
    80
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_health_timeout_ms() -> u64 {
    2_000
}

impl ProxySettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            upstream_url: default_upstream_url(),
            health_path: default_health_path(),
            request_timeout_ms: default_request_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

/// Health check settings, mirroring a target group's health check block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default = "default_health_path")]
    pub path: String,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Status matcher, e.g. `200`, `200-299`, `200,204`
    #[serde(default = "default_success_codes")]
    pub success_codes: String,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    5
}

fn default_unhealthy_threshold() -> u32 {
    2
}

fn default_success_codes() -> String {
    "200".to_string()
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_probe_timeout_secs(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            success_codes: default_success_codes(),
        }
    }
}

/// Rolling update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSettings {
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    #[serde(default = "default_minimum_healthy_percent")]
    pub minimum_healthy_percent: u32,

    #[serde(default = "default_maximum_percent")]
    pub maximum_percent: u32,

    /// Health check intervals a rollout may take before it is failed
    #[serde(default = "default_max_intervals")]
    pub max_intervals: u32,

    /// Replacement tasks that may fail before the rollout is failed
    #[serde(default = "default_failed_task_threshold")]
    pub failed_task_threshold: u32,
}

fn default_desired_count() -> u32 {
    1
}

fn default_minimum_healthy_percent() -> u32 {
    100
}

fn default_maximum_percent() -> u32 {
    200
}

fn default_max_intervals() -> u32 {
    10
}

fn default_failed_task_threshold() -> u32 {
    3
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            desired_count: default_desired_count(),
            minimum_healthy_percent: default_minimum_healthy_percent(),
            maximum_percent: default_maximum_percent(),
            max_intervals: default_max_intervals(),
            failed_task_threshold: default_failed_task_threshold(),
        }
    }
}

/// Which providers the pipeline talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineBackend {
    /// docker + aws CLIs
    #[default]
    Aws,

    /// In-process registry and cluster
    Local,
}

/// Release pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub backend: PipelineBackend,

    /// Task definition template, overridden by `ECS_TASK_DEFINITION`
    #[serde(default = "default_task_definition_path")]
    pub task_definition_path: String,

    /// Container whose image is replaced, overridden by `CONTAINER_NAME`
    #[serde(default = "default_container_name")]
    pub container_name: String,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    #[serde(default = "default_context_dir")]
    pub context_dir: String,
}

fn default_task_definition_path() -> String {
    "deploy/task-definition.json".to_string()
}

fn default_container_name() -> String {
    "deckhand".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context_dir() -> String {
    ".".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            backend: PipelineBackend::default(),
            task_definition_path: default_task_definition_path(),
            container_name: default_container_name(),
            dockerfile: default_dockerfile(),
            context_dir: default_context_dir(),
        }
    }
}

/// Load balancer front settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_balancer_port")]
    pub port: u16,

    /// Target base URLs
    #[serde(default)]
    pub targets: Vec<String>,
}

fn default_balancer_port() -> u16 {
    8080
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_balancer_port(),
            targets: Vec::new(),
        }
    }
}
