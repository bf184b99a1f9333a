//! GPU-aware fleet reconciliation for Kubernetes.
//!
//! Watches nodes, pods and `GpuJob` custom resources, keeps GPU nodes
//! tainted for isolation, alerts on GPU saturation and drives `GpuJob`
//! objects through their lifecycle.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
