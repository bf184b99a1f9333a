use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ReconcileOutcome;
use crate::config::ControllerConfig;
use crate::domain::alerting::ThresholdAlerting;
use crate::domain::error::ClusterError;
use crate::domain::error::ErrorClass;
use crate::domain::inventory::NodeInventory;
use crate::domain::lifecycle;
use crate::domain::lifecycle::Transition;
use crate::domain::queue::WorkItem;
use crate::domain::taint_policy;
use crate::domain::taint_policy::TaintDecision;
use crate::domain::traits::AlertSink;
use crate::domain::traits::Clock;
use crate::domain::traits::ClusterMutator;
use crate::domain::traits::ClusterObserver;
use crate::domain::traits::MetricsSink;
use crate::domain::types::ClusterObject;
use crate::domain::types::GpuJob;
use crate::domain::types::GpuJobStatus;
use crate::domain::types::JobCondition;
use crate::domain::types::Kind;
use crate::domain::types::ObjectKey;
use crate::domain::types::PatchDoc;

/// Condition type set on a GpuJob whose spec cannot be acted upon.
pub const SPEC_INVALID_CONDITION: &str = "SpecInvalid";

/// Collaborators injected into the reconciler.
#[derive(Clone)]
pub struct ReconcilerDeps {
    pub observer: Arc<dyn ClusterObserver>,
    pub mutator: Arc<dyn ClusterMutator>,
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

/// Reconciles one key against freshly fetched cluster state.
///
/// The engine holds no per-object state besides alert suppression; every
/// decision is made from the canonical object fetched at the start of the
/// call, so duplicate or stale triggers only cost a read.
pub struct Reconciler {
    deps: ReconcilerDeps,
    alerting: ThresholdAlerting,
    /// Jobs whose terminal status write already failed once.
    terminal_retries: Mutex<HashSet<ObjectKey>>,
    config: ControllerConfig,
}

impl Reconciler {
    pub fn new(deps: ReconcilerDeps, config: ControllerConfig) -> Self {
        Self {
            alerting: ThresholdAlerting::new(config.utilization_threshold, config.alert_cooldown),
            terminal_retries: Mutex::new(HashSet::new()),
            deps,
            config,
        }
    }

    pub fn alerting(&self) -> &ThresholdAlerting {
        &self.alerting
    }

    #[tracing::instrument(skip_all, fields(key = %item.key, attempt = item.attempt))]
    pub async fn reconcile(
        &self,
        item: &WorkItem,
    ) -> Result<ReconcileOutcome, Report<ClusterError>> {
        match item.key.kind {
            Kind::Node => self.reconcile_node(&item.key).await,
            Kind::Pod => self.reconcile_pod(&item.key).await,
            Kind::GpuJob => self.reconcile_job(item).await,
        }
    }

    async fn reconcile_node(
        &self,
        key: &ObjectKey,
    ) -> Result<ReconcileOutcome, Report<ClusterError>> {
        let Some(object) = self.fetch(key).await? else {
            debug!("node is gone, clearing its alert state");
            self.alerting.forget_node(&key.name);
            return Ok(ReconcileOutcome::Done);
        };
        let node = match object {
            ClusterObject::Node(node) => node,
            other => return Err(unexpected_kind(key, &other)),
        };

        let pods = self
            .call("pods_on_node", self.deps.observer.pods_on_node(&node.name))
            .await
            .attach_printable_lazy(|| format!("node: {}", node.name))?;
        let inventory = NodeInventory::build(&node, &pods, &self.config.gpu_resources);

        match taint_policy::evaluate(&node, &inventory) {
            TaintDecision::Patch(taints) => {
                info!(node = %node.name, "applying GPU isolation taint");
                self.call(
                    "patch",
                    self.deps
                        .mutator
                        .patch(&node.object_ref(), &PatchDoc::SetTaints(taints)),
                )
                .await?;
            }
            TaintDecision::Converged | TaintDecision::NotApplicable => {}
        }

        let now = self.deps.clock.now();
        for (resource, usage) in inventory.schedulable() {
            let utilization = usage.utilization();
            self.deps
                .metrics
                .observe_utilization(&node.name, resource, utilization);
            debug!(
                resource,
                requested = usage.requested,
                allocatable = usage.allocatable,
                "sampled GPU utilization"
            );

            if let Some(alert) = self.alerting.evaluate(&node.name, resource, utilization, now) {
                self.deps
                    .alerts
                    .notify(
                        &alert.node_name,
                        &alert.resource_name,
                        alert.utilization_percent,
                        alert.timestamp,
                    )
                    .await;
            }
        }

        Ok(ReconcileOutcome::RequeueAfter(self.config.node_recheck))
    }

    async fn reconcile_pod(
        &self,
        key: &ObjectKey,
    ) -> Result<ReconcileOutcome, Report<ClusterError>> {
        let Some(object) = self.fetch(key).await? else {
            return Ok(ReconcileOutcome::Done);
        };
        let pod = match object {
            ClusterObject::Pod(pod) => pod,
            other => return Err(unexpected_kind(key, &other)),
        };
        // pods only matter through the inventory of their node
        Ok(match pod.node_name {
            Some(node_name) => ReconcileOutcome::Delegate(ObjectKey::node(node_name)),
            None => ReconcileOutcome::Done,
        })
    }

    async fn reconcile_job(
        &self,
        item: &WorkItem,
    ) -> Result<ReconcileOutcome, Report<ClusterError>> {
        let Some(object) = self.fetch(&item.key).await? else {
            self.terminal_retries().remove(&item.key);
            return Ok(ReconcileOutcome::Done);
        };
        let job = match object {
            ClusterObject::GpuJob(job) => job,
            other => return Err(unexpected_kind(&item.key, &other)),
        };
        let now = self.deps.clock.now();

        if let Err(reason) = job.spec.validate(&self.config.gpu_resources) {
            warn!(%reason, "GpuJob spec is invalid");
            if let Some(status) = with_spec_invalid(&job.status, &reason, now) {
                self.write_status(&job, status).await?;
            }
            return Ok(ReconcileOutcome::RequeueAfter(self.config.permanent_recheck));
        }

        let mut status = job.status.clone();
        let had_condition = status.condition(SPEC_INVALID_CONDITION).is_some();
        status.conditions.retain(|c| c.type_ != SPEC_INVALID_CONDITION);

        match lifecycle::next(&status, now) {
            Transition::Advance(next) => {
                let phase = next.phase;
                match self.write_status(&job, next).await {
                    Ok(()) => {
                        self.terminal_retries().remove(&item.key);
                    }
                    Err(report)
                        if phase.is_terminal()
                            && report.current_context().class() != ErrorClass::Conflict =>
                    {
                        // one retry through backoff, then give up until the next relist
                        if self.terminal_retries().insert(item.key.clone()) {
                            return Err(report);
                        }
                        self.terminal_retries().remove(&item.key);
                        error!(
                            error = ?report,
                            %phase,
                            "retry of terminal status write failed, giving up"
                        );
                        return Ok(ReconcileOutcome::Done);
                    }
                    Err(report) => return Err(report),
                }

                info!(from = %job.status.phase, to = %phase, "GpuJob transitioned");
                self.deps
                    .metrics
                    .record_job_transition(&job.namespace, phase);

                if phase.is_terminal() {
                    Ok(ReconcileOutcome::Done)
                } else {
                    Ok(ReconcileOutcome::RequeueAfter(self.config.job_recheck))
                }
            }
            Transition::Hold => {
                if had_condition {
                    self.write_status(&job, status).await?;
                }
                Ok(ReconcileOutcome::RequeueAfter(self.config.job_recheck))
            }
            Transition::Halt => {
                if had_condition {
                    self.write_status(&job, status).await?;
                }
                Ok(ReconcileOutcome::Done)
            }
        }
    }

    fn terminal_retries(&self) -> MutexGuard<'_, HashSet<ObjectKey>> {
        self.terminal_retries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch canonical state, mapping NotFound to `None`.
    async fn fetch(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ClusterObject>, Report<ClusterError>> {
        match self.call("get", self.deps.observer.get(key)).await {
            Ok(object) => Ok(Some(object)),
            Err(report) if report.current_context().class() == ErrorClass::NotFound => Ok(None),
            Err(report) => Err(report),
        }
    }

    async fn write_status(
        &self,
        job: &GpuJob,
        status: GpuJobStatus,
    ) -> Result<(), Report<ClusterError>> {
        let updated = ClusterObject::GpuJob(GpuJob {
            status,
            ..job.clone()
        });
        self.call("update", self.deps.mutator.update(&updated, &job.version))
            .await
            .map(|_| ())
    }

    /// Bound a cluster call by the per-call timeout.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, Report<ClusterError>>>,
    ) -> Result<T, Report<ClusterError>> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Report::new(ClusterError::transient(format!(
                "{operation} timed out after {:?}",
                self.config.call_timeout
            )))),
        }
    }
}

/// Status with the SpecInvalid condition set, or `None` when the object
/// already carries the same condition.
fn with_spec_invalid(
    status: &GpuJobStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> Option<GpuJobStatus> {
    if let Some(existing) = status.condition(SPEC_INVALID_CONDITION) {
        if existing.status == "True" && existing.message == reason {
            return None;
        }
    }

    let mut status = status.clone();
    status.conditions.retain(|c| c.type_ != SPEC_INVALID_CONDITION);
    status.conditions.push(JobCondition {
        type_: SPEC_INVALID_CONDITION.to_string(),
        status: "True".to_string(),
        reason: "InvalidSpec".to_string(),
        message: reason.to_string(),
        last_transition_time: now,
    });
    Some(status)
}

fn unexpected_kind(key: &ObjectKey, object: &ClusterObject) -> Report<ClusterError> {
    Report::new(ClusterError::Permanent {
        message: format!("expected a {} for {key}, got a {}", key.kind, object.kind()),
    })
}
