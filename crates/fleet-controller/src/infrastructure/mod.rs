pub mod alert_sink;
pub mod health;
pub mod k8s;
pub mod kube_client;
pub mod logging;
pub mod metrics;
