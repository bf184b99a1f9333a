use std::sync::Arc;

use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::ControllerConfig;
use crate::config::RunArgs;
use crate::domain::queue::ExponentialBackoff;
use crate::domain::queue::WorkQueue;
use crate::domain::reconciler::engine::ReconcilerDeps;
use crate::domain::reconciler::Controller;
use crate::domain::reconciler::Reconciler;
use crate::domain::traits::AlertSink;
use crate::domain::traits::ClusterObserver;
use crate::domain::traits::SystemClock;
use crate::infrastructure::alert_sink::FanoutAlertSink;
use crate::infrastructure::alert_sink::LogAlertSink;
use crate::infrastructure::alert_sink::WebhookAlertSink;
use crate::infrastructure::health::HealthServer;
use crate::infrastructure::health::Readiness;
use crate::infrastructure::k8s::ClusterWatcher;
use crate::infrastructure::k8s::KubeCluster;
use crate::infrastructure::kube_client::init_kube_client;
use crate::infrastructure::metrics::FleetMetrics;

/// Application builder
pub struct ApplicationBuilder {
    run_args: RunArgs,
}

impl ApplicationBuilder {
    pub fn new(run_args: RunArgs) -> Self {
        Self { run_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");
        let config = ControllerConfig::from(&self.run_args);
        tracing::info!(?config, "controller configuration");

        let client = init_kube_client(self.run_args.kubeconfig.clone(), config.startup_retries)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Kubernetes: {e:?}"))?;

        let cluster = Arc::new(KubeCluster::new(client.clone()));
        let metrics = Arc::new(FleetMetrics::new());
        let queue = Arc::new(WorkQueue::new(ExponentialBackoff::new(
            config.backoff_base,
            config.backoff_max,
        )));

        let deps = ReconcilerDeps {
            observer: cluster.clone(),
            mutator: cluster.clone(),
            alerts: self.create_alert_sink()?,
            metrics: metrics.clone(),
            clock: Arc::new(SystemClock),
        };
        let reconciler = Arc::new(Reconciler::new(deps, config.clone()));

        let controller = Arc::new(Controller::new(
            queue.clone(),
            reconciler,
            metrics.clone(),
            config.workers,
            config.permanent_recheck,
            config.shutdown_grace,
        ));

        let readiness = Arc::new(Readiness::default());
        let watcher = Arc::new(ClusterWatcher::new(
            client,
            cluster as Arc<dyn ClusterObserver>,
            queue.clone(),
            config.namespace.clone(),
            config.relist_interval,
            config.gpu_resources.clone(),
            readiness.clone(),
        ));
        let health_server = Arc::new(HealthServer::new(
            self.run_args.health_listen_addr.clone(),
            readiness.clone(),
        ));

        let services = ApplicationServices {
            queue,
            controller,
            watcher,
            metrics,
            readiness,
            health_server,
        };
        Ok(Application::new(services, config, self.run_args))
    }

    fn create_alert_sink(&self) -> Result<Arc<dyn AlertSink>> {
        let Some(url) = &self.run_args.alert_webhook_url else {
            return Ok(Arc::new(LogAlertSink));
        };
        let webhook = WebhookAlertSink::new(url.clone())
            .map_err(|e| anyhow::anyhow!("Failed to set up alert webhook: {e:?}"))?;
        tracing::info!(url = %url, "Alert webhook enabled");
        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink), Arc::new(webhook)];
        Ok(Arc::new(FanoutAlertSink::new(sinks)))
    }
}
