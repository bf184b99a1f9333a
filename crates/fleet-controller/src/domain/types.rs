//! Typed snapshots of the cluster objects the controller reconciles.
//!
//! These are the only shapes the core understands. The Kubernetes adapter
//! converts API objects into them at the observer boundary, so nothing below
//! this module needs to know about `k8s-openapi` types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono::Utc;

/// Resource name to whole-unit quantity.
pub type ResourceList = BTreeMap<String, u64>;

/// The closed set of object kinds the controller handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum Kind {
    Node,
    Pod,
    GpuJob,
}

/// Stable identity of an object: what the work queue coalesces on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self::new(Kind::Node, String::new(), name)
    }

    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Kind::Pod, namespace, name)
    }

    pub fn gpu_job(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Kind::GpuJob, namespace, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// An object identity pinned to the version token observed at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl ObjectRef {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.namespace.clone(), self.name.clone())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key(), self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
    Other(String),
}

impl TaintEffect {
    pub fn as_str(&self) -> &str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
            TaintEffect::Other(effect) => effect,
        }
    }
}

impl From<&str> for TaintEffect {
    fn from(value: &str) -> Self {
        match value {
            "NoSchedule" => TaintEffect::NoSchedule,
            "PreferNoSchedule" => TaintEffect::PreferNoSchedule,
            "NoExecute" => TaintEffect::NoExecute,
            other => TaintEffect::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.key, self.value, self.effect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSnapshot {
    pub name: String,
    /// Version token observed when the snapshot was taken.
    pub version: String,
    pub ready: bool,
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    pub taints: Vec<Taint>,
}

impl NodeSnapshot {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: Kind::Node,
            namespace: String::new(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl PodPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Completed | PodPhase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodSnapshot {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub node_name: Option<String>,
    /// Requests summed over all containers of the pod.
    pub container_requests: ResourceList,
    pub phase: PodPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, derive_more::Display)]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(JobPhase::Pending),
            "Running" => Some(JobPhase::Running),
            "Completed" => Some(JobPhase::Completed),
            "Failed" => Some(JobPhase::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuJobSpec {
    pub gpu_resource: String,
    pub gpu_count: u64,
    pub image: Option<String>,
    pub command: Vec<String>,
}

impl Default for GpuJobSpec {
    fn default() -> Self {
        Self {
            gpu_resource: "nvidia.com/gpu".to_string(),
            gpu_count: 1,
            image: None,
            command: Vec::new(),
        }
    }
}

impl GpuJobSpec {
    /// Checks the spec against the tracked GPU families, returning the reason
    /// it is unusable.
    pub fn validate(&self, gpu_resources: &[String]) -> Result<(), String> {
        if self.gpu_count == 0 {
            return Err("spec.gpuCount must be greater than zero".to_string());
        }
        if !gpu_resources.iter().any(|r| r == &self.gpu_resource) {
            return Err(format!(
                "spec.gpuResource `{}` is not a tracked GPU resource ({})",
                self.gpu_resource,
                gpu_resources.join(", ")
            ));
        }
        Ok(())
    }
}

/// Outcome reported by the external job executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum CompletionOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSignal {
    pub outcome: CompletionOutcome,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCondition {
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpuJobStatus {
    pub phase: JobPhase,
    pub last_transition_time: Option<DateTime<Utc>>,
    pub reconcile_count: u32,
    pub conditions: Vec<JobCondition>,
    pub completion: Option<CompletionSignal>,
}

impl GpuJobStatus {
    pub fn condition(&self, type_: &str) -> Option<&JobCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpuJob {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub spec: GpuJobSpec,
    pub status: GpuJobStatus,
}

impl GpuJob {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::gpu_job(self.namespace.clone(), self.name.clone())
    }
}

/// Canonical state of one object as returned by the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterObject {
    Node(NodeSnapshot),
    Pod(PodSnapshot),
    GpuJob(GpuJob),
}

impl ClusterObject {
    pub fn kind(&self) -> Kind {
        match self {
            ClusterObject::Node(_) => Kind::Node,
            ClusterObject::Pod(_) => Kind::Pod,
            ClusterObject::GpuJob(_) => Kind::GpuJob,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        match self {
            ClusterObject::Node(node) => node.object_ref(),
            ClusterObject::Pod(pod) => ObjectRef {
                kind: Kind::Pod,
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                version: pod.version.clone(),
            },
            ClusterObject::GpuJob(job) => ObjectRef {
                kind: Kind::GpuJob,
                namespace: job.namespace.clone(),
                name: job.name.clone(),
                version: job.version.clone(),
            },
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.object_ref().key()
    }
}

/// Mutations the core asks the cluster to apply via `patch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchDoc {
    /// Replace the node's taint list. The patch is guarded by the version of
    /// the referenced object.
    SetTaints(Vec<Taint>),
}
