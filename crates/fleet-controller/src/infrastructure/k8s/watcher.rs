use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::convert;
use super::crd;
use super::types::KubernetesError;
use crate::domain::error::ClusterError;
use crate::domain::inventory::FleetSummary;
use crate::domain::inventory::NodeInventory;
use crate::domain::queue::TriggerReason;
use crate::domain::queue::WorkQueue;
use crate::domain::traits::ClusterObserver;
use crate::domain::types::ClusterObject;
use crate::domain::types::Kind;
use crate::domain::types::ObjectKey;
use crate::domain::types::PodSnapshot;
use crate::infrastructure::health::Readiness;

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Turns watch events into work queue triggers.
///
/// Event payloads are only used to derive a key; the reconciler fetches
/// canonical state itself. A periodic relist re-enqueues every known key to
/// cover events lost while a watch was reconnecting.
pub struct ClusterWatcher {
    client: Client,
    observer: Arc<dyn ClusterObserver>,
    queue: Arc<WorkQueue>,
    namespace: Option<String>,
    relist_interval: Duration,
    gpu_resources: Vec<String>,
    readiness: Arc<Readiness>,
}

impl ClusterWatcher {
    pub fn new(
        client: Client,
        observer: Arc<dyn ClusterObserver>,
        queue: Arc<WorkQueue>,
        namespace: Option<String>,
        relist_interval: Duration,
        gpu_resources: Vec<String>,
        readiness: Arc<Readiness>,
    ) -> Self {
        Self {
            client,
            observer,
            queue,
            namespace,
            relist_interval,
            gpu_resources,
            readiness,
        }
    }

    /// Watch nodes, pods and GpuJobs until cancelled.
    #[tracing::instrument(skip_all, fields(namespace = ?self.namespace))]
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Starting cluster watcher");
        let nodes: Api<Node> = Api::all(self.client.clone());
        let pods: Api<Pod> = Api::all(self.client.clone());
        let jobs: Api<crd::GpuJob> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        tokio::join!(
            self.watch_kind(Kind::Node, nodes, convert::node_key, &cancellation_token),
            self.watch_kind(Kind::Pod, pods, convert::pod_node_key, &cancellation_token),
            self.watch_kind(Kind::GpuJob, jobs, convert::job_key, &cancellation_token),
            self.relist_loop(&cancellation_token),
        );
        info!("Cluster watcher stopped");
    }

    async fn watch_kind<K>(
        &self,
        kind: Kind,
        api: Api<K>,
        to_key: fn(&K) -> Option<ObjectKey>,
        cancellation_token: &CancellationToken,
    ) where
        K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    {
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!(%kind, "Watch shutdown requested");
                    break;
                }
                result = self.watch_stream(kind, api.clone(), to_key) => {
                    match result {
                        Ok(()) => {
                            warn!(%kind, "Watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!(%kind, "Watch failed: {e:?}");
                            select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn watch_stream<K>(
        &self,
        kind: Kind,
        api: Api<K>,
        to_key: fn(&K) -> Option<ObjectKey>,
    ) -> Result<(), Report<KubernetesError>>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    {
        let mut stream = watcher(api, Config::default()).boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Applied(object)) => self.trigger(to_key(&object), TriggerReason::Updated),
                Ok(Event::Deleted(object)) => self.trigger(to_key(&object), TriggerReason::Deleted),
                Ok(Event::Restarted(objects)) => {
                    debug!(%kind, count = objects.len(), "watch (re)started");
                    self.readiness.mark_synced(kind);
                    for object in &objects {
                        self.trigger(to_key(object), TriggerReason::Relist);
                    }
                }
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        kind: kind.to_string(),
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    fn trigger(&self, key: Option<ObjectKey>, reason: TriggerReason) {
        if let Some(key) = key {
            self.queue.add(key, reason);
        }
    }

    async fn relist_loop(&self, cancellation_token: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.relist_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // watchers perform the initial list
        ticker.tick().await;

        loop {
            select! {
                _ = cancellation_token.cancelled() => break,
                _ = ticker.tick() => {
                    match relist(
                        self.observer.as_ref(),
                        &self.queue,
                        self.namespace.as_deref(),
                        &self.gpu_resources,
                    )
                    .await
                    {
                        Ok(summary) => info!(
                            gpu_nodes = summary.gpu_nodes,
                            ready_gpu_nodes = summary.ready_gpu_nodes,
                            allocatable = summary.allocatable,
                            requested = summary.requested,
                            utilization_percent = summary.utilization() * 100.0,
                            "Fleet GPU summary"
                        ),
                        Err(e) => warn!("Relist failed: {e:?}"),
                    }
                }
            }
        }
    }
}

/// Enqueue every node and GpuJob, returning the fleet totals seen on the way.
pub async fn relist(
    observer: &dyn ClusterObserver,
    queue: &WorkQueue,
    namespace: Option<&str>,
    gpu_resources: &[String],
) -> Result<FleetSummary, Report<ClusterError>> {
    let nodes = observer.list(Kind::Node, None).await?;
    let pods: Vec<PodSnapshot> = observer
        .list(Kind::Pod, None)
        .await?
        .into_iter()
        .filter_map(|object| match object {
            ClusterObject::Pod(pod) => Some(pod),
            _ => None,
        })
        .collect();
    let jobs = observer.list(Kind::GpuJob, namespace).await?;

    let mut inventories = Vec::with_capacity(nodes.len());
    for object in &nodes {
        if let ClusterObject::Node(node) = object {
            inventories.push(NodeInventory::build(node, &pods, gpu_resources));
        }
        queue.add(object.key(), TriggerReason::Relist);
    }
    for job in &jobs {
        queue.add(job.key(), TriggerReason::Relist);
    }

    debug!(nodes = nodes.len(), jobs = jobs.len(), "relist enqueued");
    Ok(FleetSummary::from_inventories(&inventories))
}
