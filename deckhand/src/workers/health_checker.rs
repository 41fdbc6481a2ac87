//! Health check worker for a target group

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::balancer::group::TargetGroup;
use crate::balancer::probe::Prober;

/// Health checker worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Probe interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Run the health checker worker: probe immediately, then every interval
pub async fn run<S, F>(
    options: &Options,
    group: Arc<TargetGroup>,
    prober: Arc<dyn Prober>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health checker worker starting...");

    loop {
        let snapshot = group.probe_all(prober.as_ref()).await;
        debug!(
            "Probed {} targets, {} healthy",
            snapshot.len(),
            group.healthy_count()
        );

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health checker worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
