//! Application configuration options

use std::time::Duration;

use crate::storage::settings::{
    BackendSettings, BalancerSettings, HealthCheckSettings, ProxySettings, Settings,
};

/// Which long-running servers to start
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Start the backend service
    pub enable_backend: bool,

    /// Start the reverse proxy. With the backend also enabled the proxy
    /// forwards to the backend's bound port.
    pub enable_proxy: bool,

    /// Start the load balancer front and its health checker
    pub enable_balancer: bool,

    pub backend: BackendSettings,
    pub proxy: ProxySettings,
    pub balancer: BalancerSettings,
    pub health_check: HealthCheckSettings,
}

impl AppOptions {
    /// Options with every server disabled; callers switch on what they run
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            enable_backend: false,
            enable_proxy: false,
            enable_balancer: false,
            backend: settings.backend.clone(),
            proxy: settings.proxy.clone(),
            balancer: settings.balancer.clone(),
            health_check: settings.health_check.clone(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            enable_backend: true,
            enable_proxy: true,
            ..Self::from_settings(&Settings::default())
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
