//! Health probes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::balancer::target::{ProbeOutcome, Thresholds};
use crate::errors::DeckhandError;
use crate::storage::settings::HealthCheckSettings;

/// Set of HTTP status codes counted as healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMatcher {
    ranges: Vec<(u16, u16)>,
}

impl StatusMatcher {
    /// Parse `200`, `200-299` or `200,204,301-302`
    pub fn parse(raw: &str) -> Result<Self, DeckhandError> {
        let mut ranges = Vec::new();

        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((lo, hi)) => (parse_code(lo)?, parse_code(hi)?),
                None => {
                    let code = parse_code(part)?;
                    (code, code)
                }
            };
            if range.0 > range.1 {
                return Err(DeckhandError::ConfigError(format!(
                    "invalid status range '{}'",
                    part
                )));
            }
            ranges.push(range);
        }

        if ranges.is_empty() {
            return Err(DeckhandError::ConfigError(
                "health check success codes are empty".to_string(),
            ));
        }
        Ok(Self { ranges })
    }

    pub fn matches(&self, status: u16) -> bool {
        self.ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&status))
    }
}

fn parse_code(raw: &str) -> Result<u16, DeckhandError> {
    let code: u16 = raw
        .trim()
        .parse()
        .map_err(|_| DeckhandError::ConfigError(format!("invalid status code '{}'", raw)))?;
    if !(200..=499).contains(&code) {
        return Err(DeckhandError::ConfigError(format!(
            "status code {} outside 200-499",
            code
        )));
    }
    Ok(code)
}

/// Health check configuration for a target group
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub thresholds: Thresholds,
    pub matcher: StatusMatcher,
}

impl HealthCheckConfig {
    pub fn from_settings(settings: &HealthCheckSettings) -> Result<Self, DeckhandError> {
        if !settings.path.starts_with('/') {
            return Err(DeckhandError::ConfigError(format!(
                "health check path '{}' must start with '/'",
                settings.path
            )));
        }
        if settings.healthy_threshold == 0 || settings.unhealthy_threshold == 0 {
            return Err(DeckhandError::ConfigError(
                "health check thresholds must be at least 1".to_string(),
            ));
        }
        if settings.timeout_secs >= settings.interval_secs {
            return Err(DeckhandError::ConfigError(format!(
                "health check timeout ({}s) must be shorter than the interval ({}s)",
                settings.timeout_secs, settings.interval_secs
            )));
        }

        Ok(Self {
            path: settings.path.clone(),
            interval: Duration::from_secs(settings.interval_secs),
            timeout: Duration::from_secs(settings.timeout_secs),
            thresholds: Thresholds {
                healthy: settings.healthy_threshold,
                unhealthy: settings.unhealthy_threshold,
            },
            matcher: StatusMatcher::parse(&settings.success_codes)?,
        })
    }
}

/// Something that can probe a target
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target_url: &str) -> ProbeOutcome;
}

/// Probes `GET <target><path>` over HTTP
pub struct HttpProber {
    client: Client,
    path: String,
    matcher: StatusMatcher,
}

impl HttpProber {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, DeckhandError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            path: config.path.clone(),
            matcher: config.matcher.clone(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target_url: &str) -> ProbeOutcome {
        let url = format!("{}{}", target_url.trim_end_matches('/'), self.path);

        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if self.matcher.matches(status) {
                    ProbeOutcome::Success
                } else {
                    debug!("Probe {} returned {}", url, status);
                    ProbeOutcome::Failure(format!("unexpected status {}", status))
                }
            }
            Err(e) if e.is_timeout() => ProbeOutcome::Failure("request timed out".to_string()),
            Err(e) => ProbeOutcome::Failure(format!("connection failed: {}", e)),
        }
    }
}
