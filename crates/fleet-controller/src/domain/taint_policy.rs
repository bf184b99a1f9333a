//! GPU isolation taint policy.
//!
//! Every node with allocatable GPU capacity carries exactly one
//! `gpu=true:NoSchedule` taint. The policy only ever adds or normalizes that
//! taint; a node that stops reporting GPUs keeps whatever it has until an
//! operator removes it.

use super::inventory::NodeInventory;
use super::types::NodeSnapshot;
use super::types::Taint;
use super::types::TaintEffect;

pub const GPU_TAINT_KEY: &str = "gpu";
pub const GPU_TAINT_VALUE: &str = "true";

pub fn gpu_isolation_taint() -> Taint {
    Taint::new(GPU_TAINT_KEY, GPU_TAINT_VALUE, TaintEffect::NoSchedule)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaintDecision {
    /// Not a GPU node; nothing is added and nothing is removed.
    NotApplicable,
    /// The node already carries exactly one isolation taint.
    Converged,
    /// Replace the node's taints with this list.
    Patch(Vec<Taint>),
}

pub fn evaluate(node: &NodeSnapshot, inventory: &NodeInventory) -> TaintDecision {
    if !inventory.is_gpu_node() {
        return TaintDecision::NotApplicable;
    }

    let desired = gpu_isolation_taint();
    // the API server keys taints by (key, effect)
    let slot = |t: &Taint| t.key == desired.key && t.effect == desired.effect;

    let occupying: Vec<&Taint> = node.taints.iter().filter(|t| slot(t)).collect();
    if occupying.len() == 1 && occupying[0].value == desired.value {
        return TaintDecision::Converged;
    }

    let mut taints = Vec::with_capacity(node.taints.len() + 1);
    let mut placed = false;
    for taint in &node.taints {
        if !slot(taint) {
            taints.push(taint.clone());
        } else if !placed {
            taints.push(desired.clone());
            placed = true;
        }
    }
    if !placed {
        taints.push(desired);
    }
    TaintDecision::Patch(taints)
}
