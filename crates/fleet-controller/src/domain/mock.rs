//! Test adapters implementing the collaborator traits
//!
//! In-memory stand-ins for the cluster, alert sink, metrics sink and clock,
//! used by the engine and controller tests.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use error_stack::Report;

use super::alerting::Alert;
use super::error::ClusterError;
use super::traits::AlertSink;
use super::traits::Clock;
use super::traits::ClusterMutator;
use super::traits::ClusterObserver;
use super::traits::MetricsSink;
use super::types::ClusterObject;
use super::types::CompletionSignal;
use super::types::JobPhase;
use super::types::Kind;
use super::types::ObjectKey;
use super::types::ObjectRef;
use super::types::PatchDoc;
use super::types::PodSnapshot;

/// In-memory cluster with optimistic concurrency on writes
pub struct FakeCluster {
    objects: Mutex<HashMap<ObjectKey, ClusterObject>>,
    read_failures: Mutex<HashMap<ObjectKey, VecDeque<ClusterError>>>,
    write_failures: Mutex<VecDeque<ClusterError>>,
    read_stall: Mutex<Option<Duration>>,
    race_next_write: AtomicBool,
    next_version: AtomicU64,
    gets: AtomicUsize,
    mutations: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            read_failures: Mutex::new(HashMap::new()),
            write_failures: Mutex::new(VecDeque::new()),
            read_stall: Mutex::new(None),
            race_next_write: AtomicBool::new(false),
            next_version: AtomicU64::new(1),
            gets: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
        }
    }

    fn bump_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Store an object as-is, assigning a version when it has none.
    pub fn insert(&self, mut object: ClusterObject) {
        let version = self.bump_version();
        set_version(&mut object, &version, false);
        self.objects.lock().unwrap().insert(object.key(), object);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ClusterObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Simulate the job executor reporting an outcome; bumps the version.
    pub fn set_completion(&self, key: &ObjectKey, signal: CompletionSignal) {
        let version = self.bump_version();
        let mut objects = self.objects.lock().unwrap();
        if let Some(ClusterObject::GpuJob(job)) = objects.get_mut(key) {
            job.status.completion = Some(signal);
            job.version = version;
        }
    }

    /// Fail the next `count` reads of `key` with `error`.
    pub fn fail_reads(&self, key: &ObjectKey, error: ClusterError, count: usize) {
        let mut failures = self.read_failures.lock().unwrap();
        let queue = failures.entry(key.clone()).or_default();
        queue.extend(std::iter::repeat(error).take(count));
    }

    /// Fail the next `count` writes with `error`.
    pub fn fail_writes(&self, error: ClusterError, count: usize) {
        self.write_failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat(error).take(count));
    }

    /// Delay every read by `stall`.
    pub fn stall_reads(&self, stall: Duration) {
        *self.read_stall.lock().unwrap() = Some(stall);
    }

    /// Let an out-of-band writer bump the target's version just before the
    /// next write lands.
    pub fn race_next_write(&self) {
        self.race_next_write.store(true, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of update and patch calls received, failed ones included.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn begin_write(&self, key: &ObjectKey) -> Result<(), Report<ClusterError>> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.write_failures.lock().unwrap().pop_front() {
            return Err(Report::new(error));
        }
        if self.race_next_write.swap(false, Ordering::SeqCst) {
            let version = self.bump_version();
            if let Some(object) = self.objects.lock().unwrap().get_mut(key) {
                set_version(object, &version, true);
            }
        }
        Ok(())
    }

    fn check_version(
        &self,
        key: &ObjectKey,
        expected: &str,
    ) -> Result<ClusterObject, Report<ClusterError>> {
        let Some(current) = self.object(key) else {
            return Err(Report::new(ClusterError::NotFound {
                key: key.to_string(),
            }));
        };
        if current.object_ref().version != expected {
            return Err(Report::new(ClusterError::Conflict {
                key: key.to_string(),
            }));
        }
        Ok(current)
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn set_version(object: &mut ClusterObject, version: &str, overwrite: bool) {
    let slot = match object {
        ClusterObject::Node(node) => &mut node.version,
        ClusterObject::Pod(pod) => &mut pod.version,
        ClusterObject::GpuJob(job) => &mut job.version,
    };
    if overwrite || slot.is_empty() {
        *slot = version.to_string();
    }
}

#[async_trait]
impl ClusterObserver for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<ClusterObject, Report<ClusterError>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let stall = *self.read_stall.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        let injected = self
            .read_failures
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            return Err(Report::new(error));
        }
        self.object(key).ok_or_else(|| {
            Report::new(ClusterError::NotFound {
                key: key.to_string(),
            })
        })
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
    ) -> Result<Vec<ClusterObject>, Report<ClusterError>> {
        let objects = self.objects.lock().unwrap();
        let mut listed: Vec<ClusterObject> = objects
            .values()
            .filter(|object| object.kind() == kind)
            .filter(|object| namespace.map_or(true, |ns| object.key().namespace == ns))
            .cloned()
            .collect();
        listed.sort_by_key(ClusterObject::key);
        Ok(listed)
    }

    async fn pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<PodSnapshot>, Report<ClusterError>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .values()
            .filter_map(|object| match object {
                ClusterObject::Pod(pod) if pod.node_name.as_deref() == Some(node_name) => {
                    Some(pod.clone())
                }
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl ClusterMutator for FakeCluster {
    async fn update(
        &self,
        object: &ClusterObject,
        expected_version: &str,
    ) -> Result<ClusterObject, Report<ClusterError>> {
        let key = object.key();
        self.begin_write(&key)?;
        self.check_version(&key, expected_version)?;

        let mut stored = object.clone();
        set_version(&mut stored, &self.bump_version(), true);
        self.objects.lock().unwrap().insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        object_ref: &ObjectRef,
        patch: &PatchDoc,
    ) -> Result<(), Report<ClusterError>> {
        let key = object_ref.key();
        self.begin_write(&key)?;
        let mut current = self.check_version(&key, &object_ref.version)?;

        match (&mut current, patch) {
            (ClusterObject::Node(node), PatchDoc::SetTaints(taints)) => {
                node.taints = taints.clone();
            }
            _ => {
                return Err(Report::new(ClusterError::Permanent {
                    message: format!("cannot apply {patch:?} to {key}"),
                }))
            }
        }
        set_version(&mut current, &self.bump_version(), true);
        self.objects.lock().unwrap().insert(key, current);
        Ok(())
    }
}

/// Alert sink recording every notification
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization_percent: f64,
        timestamp: DateTime<Utc>,
    ) {
        self.alerts.lock().unwrap().push(Alert {
            node_name: node_name.to_string(),
            resource_name: resource_name.to_string(),
            utilization_percent,
            timestamp,
        });
    }
}

/// Metrics sink recording every observation
#[derive(Default)]
pub struct RecordingMetrics {
    transitions: Mutex<Vec<(String, JobPhase)>>,
    utilization: Mutex<Vec<(String, String, f64)>>,
    latencies: Mutex<Vec<(Kind, String)>>,
}

impl RecordingMetrics {
    pub fn transitions(&self) -> Vec<(String, JobPhase)> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn utilization(&self) -> Vec<(String, String, f64)> {
        self.utilization.lock().unwrap().clone()
    }

    pub fn latencies(&self) -> Vec<(Kind, String)> {
        self.latencies.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_job_transition(&self, namespace: &str, phase: JobPhase) {
        self.transitions
            .lock()
            .unwrap()
            .push((namespace.to_string(), phase));
    }

    fn observe_utilization(&self, node_name: &str, resource_name: &str, utilization: f64) {
        self.utilization.lock().unwrap().push((
            node_name.to_string(),
            resource_name.to_string(),
            utilization,
        ));
    }

    fn observe_reconcile_latency(&self, kind: Kind, namespace: &str, _elapsed: Duration) {
        self.latencies
            .lock()
            .unwrap()
            .push((kind, namespace.to_string()));
    }
}

/// Manually driven clock
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
