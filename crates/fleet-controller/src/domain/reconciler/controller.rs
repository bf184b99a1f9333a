use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ReconcileOutcome;
use super::Reconciler;
use crate::domain::error::ClusterError;
use crate::domain::error::ErrorClass;
use crate::domain::queue::TriggerReason;
use crate::domain::queue::WorkItem;
use crate::domain::queue::WorkQueue;
use crate::domain::traits::MetricsSink;
use crate::domain::types::ObjectKey;

/// Bounded worker pool draining the work queue into the reconciler.
pub struct Controller {
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<dyn MetricsSink>,
    workers: usize,
    permanent_recheck: Duration,
    shutdown_grace: Duration,
}

impl Controller {
    pub fn new(
        queue: Arc<WorkQueue>,
        reconciler: Arc<Reconciler>,
        metrics: Arc<dyn MetricsSink>,
        workers: usize,
        permanent_recheck: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            queue,
            reconciler,
            metrics,
            workers: workers.max(1),
            permanent_recheck,
            shutdown_grace,
        }
    }

    /// Run the worker pool until `token` is cancelled.
    ///
    /// On cancellation the queue stops handing out keys; in-flight reconciles
    /// get the grace period to finish before they are aborted.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let controller = self.clone();
            workers.spawn(async move { controller.work(worker_id).await });
        }
        info!(workers = self.workers, "controller started");

        token.cancelled().await;
        info!("shutdown requested, draining in-flight reconciles");
        self.queue.shut_down();

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace = ?self.shutdown_grace,
                in_flight = workers.len(),
                "grace period elapsed, cancelling outstanding reconciles"
            );
            workers.shutdown().await;
        }
        info!("controller stopped");
    }

    async fn work(&self, worker_id: usize) {
        debug!(worker_id, "worker started");
        while let Some(item) = self.queue.get().await {
            self.process(item).await;
        }
        debug!(worker_id, "worker stopped");
    }

    /// Reconcile one dequeued item and schedule its next visit.
    pub(crate) async fn process(&self, item: WorkItem) {
        let key = item.key.clone();
        let started = Instant::now();
        let result = AssertUnwindSafe(self.reconciler.reconcile(&item))
            .catch_unwind()
            .await;
        self.metrics
            .observe_reconcile_latency(key.kind, &key.namespace, started.elapsed());

        match result {
            Ok(Ok(outcome)) => self.apply_outcome(&key, outcome),
            Ok(Err(report)) => self.handle_error(&key, &report),
            Err(_) => {
                // the panic hook already logged the payload
                error!(%key, "reconcile panicked");
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
    }

    fn apply_outcome(&self, key: &ObjectKey, outcome: ReconcileOutcome) {
        self.queue.forget(key);
        match outcome {
            ReconcileOutcome::Done => debug!(%key, "reconciled"),
            ReconcileOutcome::RequeueAfter(delay) => {
                debug!(%key, ?delay, "reconciled, recheck scheduled");
                self.queue.add_after(key.clone(), delay);
            }
            ReconcileOutcome::Delegate(target) => {
                debug!(%key, %target, "delegated");
                self.queue.add(target, TriggerReason::Delegated);
            }
        }
    }

    fn handle_error(&self, key: &ObjectKey, report: &Report<ClusterError>) {
        match report.current_context().class() {
            ErrorClass::NotFound => {
                debug!(%key, "object vanished during reconcile");
                self.queue.forget(key);
            }
            ErrorClass::Conflict => {
                debug!(%key, "version conflict, retrying with fresh state");
                self.queue.add(key.clone(), TriggerReason::Conflict);
            }
            ErrorClass::Transient => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(%key, ?delay, error = ?report, "reconcile failed, backing off");
            }
            ErrorClass::Permanent => {
                error!(%key, error = ?report, "reconcile failed permanently");
                self.queue.forget(key);
                self.queue.add_after(key.clone(), self.permanent_recheck);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::domain::mock::FakeCluster;
    use crate::domain::mock::MockClock;
    use crate::domain::mock::RecordingAlertSink;
    use crate::domain::mock::RecordingMetrics;
    use crate::domain::queue::ExponentialBackoff;
    use crate::domain::reconciler::engine::ReconcilerDeps;
    use crate::domain::traits::ClusterObserver;
    use crate::domain::types::ClusterObject;
    use crate::domain::types::GpuJob;
    use crate::domain::types::Kind;
    use crate::domain::types::NodeSnapshot;
    use crate::domain::types::PodSnapshot;

    struct Harness {
        cluster: Arc<FakeCluster>,
        metrics: Arc<RecordingMetrics>,
        queue: Arc<WorkQueue>,
        controller: Arc<Controller>,
    }

    fn harness_with(observer: Option<Arc<dyn ClusterObserver>>) -> Harness {
        harness_configured(observer, ControllerConfig::default())
    }

    fn harness_configured(
        observer: Option<Arc<dyn ClusterObserver>>,
        config: ControllerConfig,
    ) -> Harness {
        let cluster = Arc::new(FakeCluster::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let deps = ReconcilerDeps {
            observer: observer.unwrap_or_else(|| cluster.clone() as Arc<dyn ClusterObserver>),
            mutator: cluster.clone(),
            alerts: Arc::new(RecordingAlertSink::default()),
            metrics: metrics.clone(),
            clock: Arc::new(MockClock::default()),
        };
        let queue = Arc::new(WorkQueue::new(ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
        )));
        let reconciler = Arc::new(Reconciler::new(deps, config.clone()));
        let controller = Arc::new(Controller::new(
            queue.clone(),
            reconciler,
            metrics.clone(),
            2,
            config.permanent_recheck,
            config.shutdown_grace,
        ));
        Harness {
            cluster,
            metrics,
            queue,
            controller,
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn gpu_node(name: &str) -> ClusterObject {
        let mut node = NodeSnapshot {
            name: name.to_string(),
            ready: true,
            ..Default::default()
        };
        node.allocatable.insert("nvidia.com/gpu".to_string(), 2);
        ClusterObject::Node(node)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_and_success_resets() {
        let h = harness();
        h.cluster.insert(gpu_node("gpu-1"));
        let key = ObjectKey::node("gpu-1");
        h.cluster
            .fail_reads(&key, ClusterError::transient("connection refused"), 3);

        h.queue.add(key.clone(), TriggerReason::Added);
        let mut delays = Vec::new();
        let mut last = Instant::now();
        for _ in 0..3 {
            let item = h.queue.get().await.unwrap();
            delays.push(item.not_before - last);
            last = item.not_before;
            h.controller.process(item).await;
        }
        assert_eq!(h.queue.attempts(&key), 3);

        let item = h.queue.get().await.unwrap();
        delays.push(item.not_before - last);
        h.controller.process(item).await;

        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
        assert_eq!(h.queue.attempts(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_retries_immediately_without_backoff() {
        let h = harness();
        h.cluster.insert(ClusterObject::GpuJob(GpuJob {
            namespace: "ml".to_string(),
            name: "train".to_string(),
            ..Default::default()
        }));
        let key = ObjectKey::gpu_job("ml", "train");
        h.cluster.race_next_write();

        h.queue.add(key.clone(), TriggerReason::Added);
        let first = h.queue.get().await.unwrap();
        h.controller.process(first).await;

        assert_eq!(h.queue.attempts(&key), 0);
        let retry = h.queue.get().await.unwrap();
        assert_eq!(retry.key, key);
        assert_eq!(retry.not_before - Instant::now(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_object_is_dropped() {
        let h = harness();
        let key = ObjectKey::gpu_job("ml", "deleted");

        h.queue.add(key.clone(), TriggerReason::Deleted);
        let item = h.queue.get().await.unwrap();
        h.controller.process(item).await;

        assert!(h.queue.is_empty());
        assert_eq!(h.metrics.latencies(), vec![(Kind::GpuJob, "ml".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_rechecks_slowly() {
        let h = harness();
        let key = ObjectKey::node("weird");
        h.cluster.fail_reads(
            &key,
            ClusterError::Permanent {
                message: "unprocessable".to_string(),
            },
            1,
        );

        h.queue.add(key.clone(), TriggerReason::Added);
        let started = Instant::now();
        let item = h.queue.get().await.unwrap();
        h.controller.process(item).await;

        let recheck = h.queue.get().await.unwrap();
        assert_eq!(recheck.key, key);
        assert_eq!(recheck.not_before - started, Duration::from_secs(600));
        assert_eq!(h.queue.attempts(&key), 0);
    }

    #[tokio::test]
    async fn pod_trigger_is_handed_to_its_node() {
        let h = harness();
        h.cluster.insert(ClusterObject::Pod(PodSnapshot {
            namespace: "ml".to_string(),
            name: "worker-0".to_string(),
            node_name: Some("gpu-3".to_string()),
            ..Default::default()
        }));

        h.queue
            .add(ObjectKey::pod("ml", "worker-0"), TriggerReason::Relist);
        let item = h.queue.get().await.unwrap();
        h.controller.process(item).await;

        let delegated = h.queue.get().await.unwrap();
        assert_eq!(delegated.key, ObjectKey::node("gpu-3"));
    }

    #[tokio::test]
    async fn one_failing_key_does_not_block_others() {
        let h = harness();
        h.cluster.insert(gpu_node("healthy"));
        let broken = ObjectKey::node("broken");
        h.cluster
            .fail_reads(&broken, ClusterError::transient("timeout"), 10);

        let token = CancellationToken::new();
        let run = tokio::spawn(h.controller.clone().run(token.clone()));
        h.queue.add(broken.clone(), TriggerReason::Added);
        h.queue.add(ObjectKey::node("healthy"), TriggerReason::Added);

        let healthy = ObjectKey::node("healthy");
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(ClusterObject::Node(node)) = h.cluster.object(&healthy) {
                    if !node.taints.is_empty() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        run.await.unwrap();
        assert!(h.queue.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_reconcile_is_aborted_after_grace_period() {
        let config = ControllerConfig {
            shutdown_grace: Duration::from_secs(5),
            call_timeout: Duration::from_secs(3600),
            ..Default::default()
        };
        let h = harness_configured(None, config);
        h.cluster.insert(gpu_node("slow"));
        h.cluster.stall_reads(Duration::from_secs(1800));

        let token = CancellationToken::new();
        let run = tokio::spawn(h.controller.clone().run(token.clone()));
        h.queue.add(ObjectKey::node("slow"), TriggerReason::Added);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.queue.in_flight(), 1);
        assert_eq!(h.cluster.get_count(), 1);

        let cancelled_at = Instant::now();
        token.cancel();
        run.await.unwrap();

        let waited = cancelled_at.elapsed();
        assert!(waited >= Duration::from_secs(5), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(60), "returned after {waited:?}");
        assert_eq!(h.cluster.mutation_count(), 0);
    }

    /// Observer that counts concurrent `get` calls per key.
    struct GatedObserver {
        inner: Arc<FakeCluster>,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClusterObserver for GatedObserver {
        async fn get(&self, key: &ObjectKey) -> Result<ClusterObject, Report<ClusterError>> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn list(
            &self,
            kind: Kind,
            namespace: Option<&str>,
        ) -> Result<Vec<ClusterObject>, Report<ClusterError>> {
            self.inner.list(kind, namespace).await
        }

        async fn pods_on_node(
            &self,
            node_name: &str,
        ) -> Result<Vec<PodSnapshot>, Report<ClusterError>> {
            self.inner.pods_on_node(node_name).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retriggers_while_in_flight_yield_one_more_reconcile() {
        let inner = Arc::new(FakeCluster::new());
        let observer = Arc::new(GatedObserver {
            inner: inner.clone(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let h = harness_with(Some(observer.clone() as Arc<dyn ClusterObserver>));
        // the harness cluster is only the mutator here; nothing is written
        let key = ObjectKey::gpu_job("ml", "missing");

        let token = CancellationToken::new();
        let run = tokio::spawn(h.controller.clone().run(token.clone()));

        h.queue.add(key.clone(), TriggerReason::Added);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.queue.add(key.clone(), TriggerReason::Updated);
        h.queue.add(key.clone(), TriggerReason::Updated);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(observer.peak.load(Ordering::SeqCst), 1);

        token.cancel();
        run.await.unwrap();
    }
}
