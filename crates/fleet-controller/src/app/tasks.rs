use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::infrastructure::metrics;

/// Slack on top of the controller's own drain period before tasks are abandoned.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let controller_task = self.spawn_controller_task(app);
        self.tasks.push(controller_task);

        let watcher_task = self.spawn_watcher_task(app);
        self.tasks.push(watcher_task);

        let metrics_task = self.spawn_metrics_task(app);
        self.tasks.push(metrics_task);

        let health_task = self.spawn_health_server_task(app);
        self.tasks.push(health_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self, shutdown_grace: Duration) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(shutdown_grace + SHUTDOWN_SLACK).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_controller_task(&self, app: &Application) -> JoinHandle<()> {
        let controller = app.services().controller.clone();
        let readiness = app.services().readiness.clone();
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting reconcile controller task");
            readiness.mark_controller_started();
            controller.run(token).await;
            tracing::info!("Reconcile controller task completed");
        })
    }

    fn spawn_watcher_task(&self, app: &Application) -> JoinHandle<()> {
        let watcher = app.services().watcher.clone();
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting cluster watcher task");
            watcher.run(token).await;
            tracing::info!("Cluster watcher task completed");
        })
    }

    fn spawn_metrics_task(&self, app: &Application) -> JoinHandle<()> {
        let args = app.run_args();
        let fleet_metrics = app.services().metrics.clone();
        let metrics_format = args.metrics_format.clone();
        let interval = Duration::from_secs(args.metrics_flush_secs.max(1));
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting metrics flush task");
            metrics::run_metrics(fleet_metrics, &metrics_format, interval, token).await;
            tracing::info!("Metrics flush task completed");
        })
    }

    fn spawn_health_server_task(&self, app: &Application) -> JoinHandle<()> {
        let health_server = app.services().health_server.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            if let Err(e) = health_server.run(token).await {
                tracing::error!("Health server failed: {e:?}");
            } else {
                tracing::info!("Health server completed");
            }
        })
    }
}
