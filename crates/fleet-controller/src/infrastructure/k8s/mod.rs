//! Kubernetes integration module.
//!
//! The main components are:
//! - [`KubeCluster`]: cluster observer and mutator over the API server
//! - [`ClusterWatcher`]: turns watch streams into work queue triggers
//! - [`crd`]: the `GpuJob` custom resource definition

pub mod cluster;
pub mod convert;
pub mod crd;
pub mod types;
pub mod watcher;

pub use cluster::KubeCluster;
pub use types::KubernetesError;
pub use watcher::ClusterWatcher;
