//! Launches tasks as in-process backend + proxy pairs on loopback ports

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::DeckhandError;
use crate::models::task_definition::TaskDefinitionRevision;
use crate::proxy;
use crate::rollout::engine::{RunningTask, TaskLauncher};
use crate::server;
use crate::server::state::{Readiness, ServerState};
use crate::storage::settings::{BackendSettings, ProxySettings};

struct TaskHandles {
    shutdown_tx: broadcast::Sender<()>,
    backend: JoinHandle<Result<(), DeckhandError>>,
    proxy: JoinHandle<Result<(), DeckhandError>>,
}

/// Each task is the container's two processes: the backend on an ephemeral
/// port and the proxy in front of it. The task URL is the proxy.
pub struct InProcessLauncher {
    greeting: String,
    proxy: ProxySettings,
    tasks: Mutex<HashMap<String, TaskHandles>>,
}

impl InProcessLauncher {
    pub fn new(greeting: impl Into<String>, proxy: ProxySettings) -> Self {
        Self {
            greeting: greeting.into(),
            proxy,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn running(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Stop every task still running
    pub async fn stop_all(&self) {
        let drained: Vec<(String, TaskHandles)> = self.tasks.lock().await.drain().collect();
        for (id, handles) in drained {
            if let Err(e) = shut_down(handles).await {
                warn!("Task {} did not stop cleanly: {}", id, e);
            }
        }
    }
}

fn shutdown_future(tx: &broadcast::Sender<()>) -> impl std::future::Future<Output = ()> + Send + 'static {
    let mut rx = tx.subscribe();
    async move {
        let _ = rx.recv().await;
    }
}

async fn shut_down(handles: TaskHandles) -> Result<(), DeckhandError> {
    let _ = handles.shutdown_tx.send(());
    handles
        .proxy
        .await
        .map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
    handles
        .backend
        .await
        .map_err(|e| DeckhandError::ShutdownError(e.to_string()))??;
    Ok(())
}

#[async_trait]
impl TaskLauncher for InProcessLauncher {
    async fn launch(&self, revision: &TaskDefinitionRevision) -> Result<RunningTask, DeckhandError> {
        let id = format!("{}-{}", revision.family, &Uuid::new_v4().simple().to_string()[..8]);
        let (shutdown_tx, _) = broadcast::channel(1);

        let readiness = Arc::new(Readiness::new());
        let state = Arc::new(ServerState::new(
            readiness.clone(),
            format!("{} [{}]", self.greeting, revision.id()),
        ));
        let backend_settings = BackendSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let (backend_addr, backend) =
            server::serve::serve(&backend_settings, state, shutdown_future(&shutdown_tx)).await?;

        let proxy_settings = ProxySettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            upstream_url: format!("http://{}", backend_addr),
            ..self.proxy.clone()
        };
        let (proxy_addr, proxy) =
            match proxy::serve::serve(&proxy_settings, shutdown_future(&shutdown_tx)).await {
                Ok(started) => started,
                Err(e) => {
                    let _ = shutdown_tx.send(());
                    let _ = backend.await;
                    return Err(e);
                }
            };
        readiness.mark_ready();

        let url = task_url(proxy_addr);
        info!("Started task {} ({}) at {}", id, revision.id(), url);
        self.tasks.lock().await.insert(
            id.clone(),
            TaskHandles {
                shutdown_tx,
                backend,
                proxy,
            },
        );

        Ok(RunningTask {
            id,
            revision: revision.id(),
            url,
        })
    }

    async fn stop(&self, task: &RunningTask) -> Result<(), DeckhandError> {
        let handles = self
            .tasks
            .lock()
            .await
            .remove(&task.id)
            .ok_or_else(|| DeckhandError::NotFound(format!("task '{}'", task.id)))?;
        debug!("Stopping task {}", task.id);
        shut_down(handles).await
    }
}

fn task_url(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}
