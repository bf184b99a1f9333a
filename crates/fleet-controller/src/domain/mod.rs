//! Core reconciliation logic, independent of the Kubernetes client.

pub mod alerting;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod queue;
pub mod reconciler;
pub mod taint_policy;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;
