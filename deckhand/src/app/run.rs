//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::balancer::group::TargetGroup;
use crate::balancer::probe::{HealthCheckConfig, HttpProber, Prober};
use crate::balancer::serve::BalancerState;
use crate::errors::DeckhandError;
use crate::server::state::{Readiness, ServerState};
use crate::storage::settings::ProxySettings;
use crate::workers::health_checker;
use crate::{balancer, proxy, server};

type ServerHandle = JoinHandle<Result<(), DeckhandError>>;

/// Run the enabled servers until a shutdown signal arrives or one of them
/// stops on its own. A server stopping on its own is an error so the
/// orchestrator replaces the task.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeckhandError> {
    info!("Initializing deckhand...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let (exited_tx, mut exited_rx) = mpsc::unbounded_channel::<&'static str>();
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, exited_tx, &mut shutdown_manager).await {
        error!("Failed to start deckhand: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    let exited = tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            None
        }
        Some(name) = exited_rx.recv() => {
            error!("The {} server stopped unexpectedly, shutting down...", name);
            Some(name)
        }
    };

    // Shutdown
    drop(shutdown_tx);
    let result = shutdown_manager.shutdown().await;
    match exited {
        Some(name) => {
            result?;
            Err(DeckhandError::ServerError(format!("{} server exited", name)))
        }
        None => result,
    }
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    exited_tx: mpsc::UnboundedSender<&'static str>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeckhandError> {
    let readiness = Arc::new(Readiness::new());
    let mut proxy_settings = options.proxy.clone();

    if options.enable_backend {
        info!("Initializing backend server...");
        let state = Arc::new(ServerState::new(readiness.clone(), &options.backend.greeting));
        let (addr, handle) =
            server::serve::serve(&options.backend, state, shutdown_future(shutdown_tx)).await?;
        shutdown_manager.with_backend_handle(watch("backend", handle, exited_tx.clone()))?;

        if options.enable_proxy {
            proxy_settings = ProxySettings {
                upstream_url: format!("http://127.0.0.1:{}", addr.port()),
                ..proxy_settings
            };
        }
    }

    if options.enable_proxy {
        info!("Initializing proxy server...");
        let (_, handle) = proxy::serve::serve(&proxy_settings, shutdown_future(shutdown_tx)).await?;
        shutdown_manager.with_proxy_handle(watch("proxy", handle, exited_tx.clone()))?;
    }

    if options.enable_balancer {
        init_balancer(options, shutdown_tx, exited_tx, shutdown_manager).await?;
    }

    readiness.mark_ready();
    info!("Startup complete");
    Ok(())
}

async fn init_balancer(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    exited_tx: mpsc::UnboundedSender<&'static str>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeckhandError> {
    info!("Initializing load balancer...");

    let config = HealthCheckConfig::from_settings(&options.health_check)?;
    let prober: Arc<dyn Prober> = Arc::new(HttpProber::new(&config)?);
    let interval = config.interval;
    let group = Arc::new(TargetGroup::new(config));
    for target in &options.balancer.targets {
        group.register(target, target)?;
    }

    let state = Arc::new(BalancerState::new(group.clone(), options.proxy.request_timeout())?);
    let (_, handle) =
        balancer::serve::serve(&options.balancer, state, shutdown_future(shutdown_tx)).await?;
    shutdown_manager.with_balancer_handle(watch("balancer", handle, exited_tx))?;

    let mut shutdown_rx = shutdown_tx.subscribe();
    let worker_options = health_checker::Options { interval };
    let health_checker_handle = tokio::spawn(async move {
        health_checker::run(
            &worker_options,
            group,
            prober,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });
    shutdown_manager.with_health_checker_handle(health_checker_handle)?;
    Ok(())
}

fn shutdown_future(
    shutdown_tx: &broadcast::Sender<()>,
) -> impl Future<Output = ()> + Send + 'static {
    let mut shutdown_rx = shutdown_tx.subscribe();
    async move {
        let _ = shutdown_rx.recv().await;
    }
}

/// Report the server's name once its task ends, whatever the reason
fn watch(
    name: &'static str,
    handle: ServerHandle,
    exited_tx: mpsc::UnboundedSender<&'static str>,
) -> ServerHandle {
    tokio::spawn(async move {
        let result = handle
            .await
            .map_err(|e| DeckhandError::ShutdownError(e.to_string()))
            .and_then(|r| r);
        let _ = exited_tx.send(name);
        result
    })
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    backend_handle: Option<ServerHandle>,
    proxy_handle: Option<ServerHandle>,
    balancer_handle: Option<ServerHandle>,
    health_checker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            backend_handle: None,
            proxy_handle: None,
            balancer_handle: None,
            health_checker_handle: None,
        }
    }

    pub fn with_backend_handle(&mut self, handle: ServerHandle) -> Result<(), DeckhandError> {
        if self.backend_handle.is_some() {
            return Err(DeckhandError::ShutdownError("backend_handle already set".to_string()));
        }
        self.backend_handle = Some(handle);
        Ok(())
    }

    pub fn with_proxy_handle(&mut self, handle: ServerHandle) -> Result<(), DeckhandError> {
        if self.proxy_handle.is_some() {
            return Err(DeckhandError::ShutdownError("proxy_handle already set".to_string()));
        }
        self.proxy_handle = Some(handle);
        Ok(())
    }

    pub fn with_balancer_handle(&mut self, handle: ServerHandle) -> Result<(), DeckhandError> {
        if self.balancer_handle.is_some() {
            return Err(DeckhandError::ShutdownError("balancer_handle already set".to_string()));
        }
        self.balancer_handle = Some(handle);
        Ok(())
    }

    pub fn with_health_checker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeckhandError> {
        if self.health_checker_handle.is_some() {
            return Err(DeckhandError::ShutdownError(
                "health_checker_handle already set".to_string(),
            ));
        }
        self.health_checker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeckhandError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeckhandError> {
        info!("Shutting down deckhand...");

        // 1. Health checker worker
        if let Some(handle) = self.health_checker_handle.take() {
            handle.await.map_err(|e| DeckhandError::ShutdownError(e.to_string()))?;
        }

        // 2. Balancer
        if let Some(handle) = self.balancer_handle.take() {
            handle.await.map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
        }

        // 3. Proxy, before the backend it forwards to
        if let Some(handle) = self.proxy_handle.take() {
            handle.await.map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
        }

        // 4. Backend
        if let Some(handle) = self.backend_handle.take() {
            handle.await.map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
