//! Conversion between Kubernetes API objects and the domain snapshots.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

use super::crd;
use crate::domain::types::ClusterObject;
use crate::domain::types::CompletionOutcome;
use crate::domain::types::CompletionSignal;
use crate::domain::types::GpuJob;
use crate::domain::types::GpuJobSpec;
use crate::domain::types::GpuJobStatus;
use crate::domain::types::JobCondition;
use crate::domain::types::JobPhase;
use crate::domain::types::NodeSnapshot;
use crate::domain::types::ObjectKey;
use crate::domain::types::PodPhase;
use crate::domain::types::PodSnapshot;
use crate::domain::types::ResourceList;
use crate::domain::types::Taint;
use crate::domain::types::TaintEffect;

/// Parse a Kubernetes quantity into whole units, rounding down.
///
/// Returns `None` for negative or malformed values.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);

    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp[1..].parse::<i32>().ok()?),
        _ => return None,
    };

    let value: f64 = number.parse().ok()?;
    let whole = (value * multiplier).floor();
    if !whole.is_finite() || whole < 0.0 {
        return None;
    }
    // float to int casts saturate
    Some(whole as u64)
}

fn resource_list(
    quantities: Option<&BTreeMap<String, Quantity>>,
    object: &str,
) -> ResourceList {
    let mut resources = ResourceList::new();
    for (name, quantity) in quantities.into_iter().flatten() {
        let value = parse_quantity(&quantity.0).unwrap_or_else(|| {
            warn!(object, resource = %name, quantity = %quantity.0, "unparseable quantity, using 0");
            0
        });
        resources.insert(name.clone(), value);
    }
    resources
}

pub fn node_snapshot(node: &Node) -> NodeSnapshot {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    let taints = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| {
                    Taint::new(
                        t.key.clone(),
                        t.value.clone().unwrap_or_default(),
                        TaintEffect::from(t.effect.as_str()),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    NodeSnapshot {
        version: node.metadata.resource_version.clone().unwrap_or_default(),
        ready,
        capacity: resource_list(status.and_then(|s| s.capacity.as_ref()), &name),
        allocatable: resource_list(status.and_then(|s| s.allocatable.as_ref()), &name),
        taints,
        name,
    }
}

pub fn pod_snapshot(pod: &Pod) -> PodSnapshot {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let object = format!("{namespace}/{name}");

    let mut container_requests = ResourceList::new();
    for container in pod.spec.iter().flat_map(|spec| spec.containers.iter()) {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };
        let mut requests = resource_list(resources.requests.as_ref(), &object);
        // extended resources default their request to the limit
        for (resource, limit) in resource_list(resources.limits.as_ref(), &object) {
            requests.entry(resource).or_insert(limit);
        }
        for (resource, quantity) in requests {
            let total = container_requests.entry(resource).or_insert(0);
            *total = total.saturating_add(quantity);
        }
    }

    let phase = match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Completed,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Pending,
    };

    PodSnapshot {
        version: pod.metadata.resource_version.clone().unwrap_or_default(),
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        container_requests,
        phase,
        namespace,
        name,
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn gpu_job(job: &crd::GpuJob) -> GpuJob {
    let namespace = job.metadata.namespace.clone().unwrap_or_default();
    let name = job.metadata.name.clone().unwrap_or_default();
    let status = job.status.clone().unwrap_or_default();

    let phase = match status.phase.as_deref() {
        None => JobPhase::Pending,
        Some(raw) => JobPhase::parse(raw).unwrap_or_else(|| {
            warn!(job = %format!("{namespace}/{name}"), phase = raw, "unknown phase, treating as Pending");
            JobPhase::Pending
        }),
    };

    let completion = status.completion.and_then(|c| {
        let outcome = match c.outcome.as_str() {
            "Succeeded" | "Completed" => CompletionOutcome::Succeeded,
            "Failed" => CompletionOutcome::Failed,
            _ => return None,
        };
        Some(CompletionSignal {
            outcome,
            message: c.message,
        })
    });

    GpuJob {
        version: job.metadata.resource_version.clone().unwrap_or_default(),
        spec: GpuJobSpec {
            gpu_resource: job.spec.gpu_resource.clone(),
            gpu_count: job.spec.gpu_count,
            image: job.spec.image.clone(),
            command: job.spec.command.clone(),
        },
        status: GpuJobStatus {
            phase,
            last_transition_time: status.last_transition_time.as_deref().and_then(parse_time),
            reconcile_count: status.reconcile_count,
            conditions: status
                .conditions
                .into_iter()
                .map(|c| JobCondition {
                    last_transition_time: parse_time(&c.last_transition_time).unwrap_or_default(),
                    type_: c.type_,
                    status: c.status,
                    reason: c.reason,
                    message: c.message,
                })
                .collect(),
            completion,
        },
        namespace,
        name,
    }
}

pub fn crd_status(status: &GpuJobStatus) -> crd::GpuJobStatus {
    crd::GpuJobStatus {
        phase: Some(status.phase.to_string()),
        last_transition_time: status.last_transition_time.map(format_time),
        reconcile_count: status.reconcile_count,
        conditions: status
            .conditions
            .iter()
            .map(|c| crd::GpuJobCondition {
                type_: c.type_.clone(),
                status: c.status.clone(),
                reason: c.reason.clone(),
                message: c.message.clone(),
                last_transition_time: format_time(c.last_transition_time),
            })
            .collect(),
        completion: status.completion.as_ref().map(|c| crd::GpuJobCompletion {
            outcome: c.outcome.to_string(),
            message: c.message.clone(),
        }),
    }
}

/// Rebuild the custom resource carrying `job`'s status, pinned to `version`.
pub fn crd_job(job: &GpuJob, version: &str) -> crd::GpuJob {
    let mut resource = crd::GpuJob::new(
        &job.name,
        crd::GpuJobSpec {
            gpu_resource: job.spec.gpu_resource.clone(),
            gpu_count: job.spec.gpu_count,
            image: job.spec.image.clone(),
            command: job.spec.command.clone(),
        },
    );
    resource.metadata.namespace = Some(job.namespace.clone());
    resource.metadata.resource_version = Some(version.to_string());
    resource.status = Some(crd_status(&job.status));
    resource
}

pub fn k8s_taint(taint: &Taint) -> k8s_openapi::api::core::v1::Taint {
    k8s_openapi::api::core::v1::Taint {
        key: taint.key.clone(),
        value: (!taint.value.is_empty()).then(|| taint.value.clone()),
        effect: taint.effect.as_str().to_string(),
        time_added: None,
    }
}

pub fn node_key(node: &Node) -> Option<ObjectKey> {
    node.metadata.name.clone().map(ObjectKey::node)
}

/// Pods are tracked through the node they are bound to.
pub fn pod_node_key(pod: &Pod) -> Option<ObjectKey> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .map(ObjectKey::node)
}

pub fn job_key(job: &crd::GpuJob) -> Option<ObjectKey> {
    let name = job.metadata.name.clone()?;
    let namespace = job.metadata.namespace.clone()?;
    Some(ObjectKey::gpu_job(namespace, name))
}

pub fn cluster_node(node: &Node) -> ClusterObject {
    ClusterObject::Node(node_snapshot(node))
}

pub fn cluster_pod(pod: &Pod) -> ClusterObject {
    ClusterObject::Pod(pod_snapshot(pod))
}

pub fn cluster_job(job: &crd::GpuJob) -> ClusterObject {
    ClusterObject::GpuJob(gpu_job(job))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::NodeCondition;
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::api::core::v1::NodeStatus;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    fn quantities(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn quantities_cover_plain_decimal_and_binary_suffixes() {
        assert_eq!(parse_quantity("4"), Some(4));
        assert_eq!(parse_quantity("2k"), Some(2000));
        assert_eq!(parse_quantity("1Ki"), Some(1024));
        assert_eq!(parse_quantity("1.5Gi"), Some(1_610_612_736));
        assert_eq!(parse_quantity("1500m"), Some(1));
        assert_eq!(parse_quantity("250m"), Some(0));
        assert_eq!(parse_quantity("1e3"), Some(1000));
        assert_eq!(parse_quantity("-1"), None);
        assert_eq!(parse_quantity("lots"), None);
        assert_eq!(parse_quantity("3Xi"), None);
    }

    #[test]
    fn node_conversion_reads_readiness_resources_and_taints() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("gpu-1".to_string()),
                resource_version: Some("812".to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                taints: Some(vec![k8s_openapi::api::core::v1::Taint {
                    key: "gpu".to_string(),
                    value: Some("true".to_string()),
                    effect: "NoSchedule".to_string(),
                    time_added: None,
                }]),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                capacity: Some(quantities(&[("nvidia.com/gpu", "8"), ("memory", "64Gi")])),
                allocatable: Some(quantities(&[("nvidia.com/gpu", "7"), ("cpu", "bogus")])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };

        let snapshot = node_snapshot(&node);
        assert_eq!(snapshot.name, "gpu-1");
        assert_eq!(snapshot.version, "812");
        assert!(snapshot.ready);
        assert_eq!(snapshot.capacity["nvidia.com/gpu"], 8);
        assert_eq!(snapshot.allocatable["nvidia.com/gpu"], 7);
        assert_eq!(snapshot.allocatable["cpu"], 0);
        assert_eq!(
            snapshot.taints,
            vec![Taint::new("gpu", "true", TaintEffect::NoSchedule)]
        );
        assert_eq!(node_key(&node), Some(ObjectKey::node("gpu-1")));
    }

    fn gpu_container(requests: &[(&str, &str)], limits: &[(&str, &str)]) -> Container {
        Container {
            name: "main".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(quantities(requests)),
                limits: Some(quantities(limits)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_requests_sum_containers_and_fall_back_to_limits() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("trainer".to_string()),
                namespace: Some("ml".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("gpu-1".to_string()),
                containers: vec![
                    gpu_container(&[("nvidia.com/gpu", "2")], &[("nvidia.com/gpu", "2")]),
                    gpu_container(&[], &[("nvidia.com/gpu", "1")]),
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                ..Default::default()
            }),
        };

        let snapshot = pod_snapshot(&pod);
        assert_eq!(snapshot.container_requests["nvidia.com/gpu"], 3);
        assert_eq!(snapshot.phase, PodPhase::Completed);
        assert_eq!(pod_node_key(&pod), Some(ObjectKey::node("gpu-1")));
    }

    #[test]
    fn unscheduled_pod_has_no_node_key_and_is_pending() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("queued".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod_node_key(&pod), None);
        assert_eq!(pod_snapshot(&pod).phase, PodPhase::Pending);
    }

    #[test]
    fn job_status_round_trips_through_the_resource() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let job = GpuJob {
            namespace: "ml".to_string(),
            name: "train".to_string(),
            version: "41".to_string(),
            spec: GpuJobSpec::default(),
            status: GpuJobStatus {
                phase: JobPhase::Running,
                last_transition_time: Some(at),
                reconcile_count: 1,
                conditions: Vec::new(),
                completion: Some(CompletionSignal {
                    outcome: CompletionOutcome::Failed,
                    message: Some("exit 1".to_string()),
                }),
            },
        };

        let resource = crd_job(&job, "41");
        assert_eq!(
            resource.status.as_ref().unwrap().last_transition_time.as_deref(),
            Some("2024-05-01T08:00:00Z")
        );
        assert_eq!(gpu_job(&resource), job);
        assert_eq!(job_key(&resource), Some(ObjectKey::gpu_job("ml", "train")));
    }

    #[test]
    fn missing_status_is_pending_and_unknown_outcome_is_ignored() {
        let mut resource = crd::GpuJob::new(
            "train",
            crd::GpuJobSpec {
                gpu_resource: "amd.com/gpu".to_string(),
                gpu_count: 2,
                image: None,
                command: Vec::new(),
            },
        );
        assert_eq!(gpu_job(&resource).status, GpuJobStatus::default());

        resource.status = Some(crd::GpuJobStatus {
            phase: Some("Running".to_string()),
            completion: Some(crd::GpuJobCompletion {
                outcome: "Paused".to_string(),
                message: None,
            }),
            ..Default::default()
        });
        let job = gpu_job(&resource);
        assert_eq!(job.status.phase, JobPhase::Running);
        assert_eq!(job.status.completion, None);
    }

    #[test]
    fn empty_taint_value_is_omitted() {
        let taint = k8s_taint(&Taint::new("dedicated", "", TaintEffect::NoExecute));
        assert_eq!(taint.value, None);
        assert_eq!(taint.effect, "NoExecute");
    }
}
