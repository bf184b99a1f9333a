use std::sync::Arc;

use crate::domain::queue::WorkQueue;
use crate::domain::reconciler::Controller;
use crate::infrastructure::health::HealthServer;
use crate::infrastructure::health::Readiness;
use crate::infrastructure::k8s::ClusterWatcher;
use crate::infrastructure::metrics::FleetMetrics;

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub queue: Arc<WorkQueue>,
    pub controller: Arc<Controller>,
    pub watcher: Arc<ClusterWatcher>,
    pub metrics: Arc<FleetMetrics>,
    pub readiness: Arc<Readiness>,
    pub health_server: Arc<HealthServer>,
}
