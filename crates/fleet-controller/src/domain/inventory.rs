//! Per-node GPU capacity, allocation and utilization.

use std::collections::BTreeMap;

use super::types::NodeSnapshot;
use super::types::PodSnapshot;

/// GPU resource families tracked when none are configured.
pub const DEFAULT_GPU_RESOURCES: [&str; 3] = ["nvidia.com/gpu", "amd.com/gpu", "intel.com/gpu"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuResourceUsage {
    pub capacity: u64,
    pub allocatable: u64,
    /// Sum of requests from non-terminal pods bound to the node.
    pub requested: u64,
}

impl GpuResourceUsage {
    /// `requested / allocatable` clamped to `[0, 1]`; 0 when nothing is allocatable.
    pub fn utilization(&self) -> f64 {
        if self.allocatable == 0 {
            return 0.0;
        }
        (self.requested as f64 / self.allocatable as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeInventory {
    pub node_name: String,
    pub ready: bool,
    resources: BTreeMap<String, GpuResourceUsage>,
}

impl NodeInventory {
    /// Builds the GPU table of `node` from the pods observed on it.
    ///
    /// Pods bound to other nodes are ignored, so the caller may pass a wider
    /// listing than strictly needed.
    pub fn build(node: &NodeSnapshot, pods: &[PodSnapshot], gpu_resources: &[String]) -> Self {
        let mut resources = BTreeMap::new();

        for resource in gpu_resources {
            let capacity = node.capacity.get(resource).copied().unwrap_or(0);
            let allocatable = node.allocatable.get(resource).copied().unwrap_or(0);
            if capacity == 0 && allocatable == 0 {
                continue;
            }

            let requested = pods
                .iter()
                .filter(|pod| pod.node_name.as_deref() == Some(node.name.as_str()))
                .filter(|pod| !pod.phase.is_terminal())
                .filter_map(|pod| pod.container_requests.get(resource))
                .fold(0u64, |acc, quantity| acc.saturating_add(*quantity));

            resources.insert(
                resource.clone(),
                GpuResourceUsage {
                    capacity,
                    allocatable,
                    requested,
                },
            );
        }

        Self {
            node_name: node.name.clone(),
            ready: node.ready,
            resources,
        }
    }

    /// A node is a GPU node when any tracked family has allocatable capacity.
    pub fn is_gpu_node(&self) -> bool {
        self.resources.values().any(|usage| usage.allocatable > 0)
    }

    pub fn get(&self, resource: &str) -> Option<&GpuResourceUsage> {
        self.resources.get(resource)
    }

    /// Tracked resources with allocatable capacity, the ones that take part
    /// in policy and alerting.
    pub fn schedulable(&self) -> impl Iterator<Item = (&str, &GpuResourceUsage)> {
        self.resources
            .iter()
            .filter(|(_, usage)| usage.allocatable > 0)
            .map(|(name, usage)| (name.as_str(), usage))
    }
}

/// Fleet-wide GPU totals across every inventoried GPU node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetSummary {
    pub gpu_nodes: usize,
    pub ready_gpu_nodes: usize,
    pub allocatable: u64,
    pub requested: u64,
}

impl FleetSummary {
    pub fn from_inventories<'a>(inventories: impl IntoIterator<Item = &'a NodeInventory>) -> Self {
        let mut summary = Self::default();
        for inventory in inventories.into_iter().filter(|i| i.is_gpu_node()) {
            summary.gpu_nodes += 1;
            if inventory.ready {
                summary.ready_gpu_nodes += 1;
            }
            for (_, usage) in inventory.schedulable() {
                summary.allocatable = summary.allocatable.saturating_add(usage.allocatable);
                summary.requested = summary.requested.saturating_add(usage.requested);
            }
        }
        summary
    }

    pub fn utilization(&self) -> f64 {
        GpuResourceUsage {
            capacity: self.allocatable,
            allocatable: self.allocatable,
            requested: self.requested,
        }
        .utilization()
    }
}
