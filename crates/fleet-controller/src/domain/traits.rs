//! Collaborator interfaces injected into the reconciler

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;

use super::error::ClusterError;
use super::types::ClusterObject;
use super::types::JobPhase;
use super::types::Kind;
use super::types::ObjectKey;
use super::types::ObjectRef;
use super::types::PatchDoc;
use super::types::PodSnapshot;

/// Read access to canonical cluster state
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    /// Fetch the current state of one object.
    ///
    /// # Errors
    ///
    /// - [`ClusterError::NotFound`] if the object does not exist
    /// - [`ClusterError::Transient`] if the API cannot be reached
    async fn get(&self, key: &ObjectKey) -> Result<ClusterObject, Report<ClusterError>>;

    /// List every object of a kind, optionally restricted to one namespace.
    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
    ) -> Result<Vec<ClusterObject>, Report<ClusterError>>;

    /// List the pods bound to a node.
    async fn pods_on_node(&self, node_name: &str)
        -> Result<Vec<PodSnapshot>, Report<ClusterError>>;
}

/// Write access to the cluster, guarded by optimistic concurrency
#[async_trait]
pub trait ClusterMutator: Send + Sync {
    /// Replace an object's persisted state if its version still matches.
    ///
    /// # Errors
    ///
    /// - [`ClusterError::Conflict`] if `expected_version` is stale
    async fn update(
        &self,
        object: &ClusterObject,
        expected_version: &str,
    ) -> Result<ClusterObject, Report<ClusterError>>;

    /// Apply a patch to the referenced object version.
    async fn patch(
        &self,
        object_ref: &ObjectRef,
        patch: &PatchDoc,
    ) -> Result<(), Report<ClusterError>>;
}

/// Receives utilization alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization_percent: f64,
        timestamp: DateTime<Utc>,
    );
}

/// Receives controller metrics
pub trait MetricsSink: Send + Sync {
    /// Count a job reaching `phase`.
    fn record_job_transition(&self, namespace: &str, phase: JobPhase);

    /// Sample GPU utilization (0..=1) for one node resource.
    fn observe_utilization(&self, node_name: &str, resource_name: &str, utilization: f64);

    /// Time spent reconciling one key.
    fn observe_reconcile_latency(&self, kind: Kind, namespace: &str, elapsed: Duration);
}

/// Trait for getting current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock time source
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
