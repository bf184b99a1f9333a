pub mod cli;
pub mod run;

use std::time::Duration;

pub use cli::Cli;
pub use cli::Commands;
pub use run::CrdArgs;
pub use run::RunArgs;

use crate::domain::inventory::DEFAULT_GPU_RESOURCES;

/// Settings consumed by the library, independent of how they were supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Restricts GpuJob watching to one namespace.
    pub namespace: Option<String>,
    pub workers: usize,
    /// Utilization ratio in `[0, 1]`.
    pub utilization_threshold: f64,
    pub alert_cooldown: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub node_recheck: Duration,
    pub job_recheck: Duration,
    pub permanent_recheck: Duration,
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
    pub relist_interval: Duration,
    pub startup_retries: u32,
    pub gpu_resources: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: 4,
            utilization_threshold: 0.9,
            alert_cooldown: Duration::from_secs(300),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            node_recheck: Duration::from_secs(30),
            job_recheck: Duration::from_secs(10),
            permanent_recheck: Duration::from_secs(600),
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            relist_interval: Duration::from_secs(300),
            startup_retries: 5,
            gpu_resources: DEFAULT_GPU_RESOURCES.map(String::from).to_vec(),
        }
    }
}

impl From<&RunArgs> for ControllerConfig {
    fn from(args: &RunArgs) -> Self {
        let backoff_base = Duration::from_millis(args.backoff_base_ms.max(1));
        let gpu_resources: Vec<String> = args
            .gpu_resources
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        Self {
            namespace: args.namespace.clone().filter(|ns| !ns.is_empty()),
            workers: args.workers.max(1),
            utilization_threshold: (args.utilization_threshold / 100.0).clamp(0.0, 1.0),
            alert_cooldown: Duration::from_secs(args.alert_cooldown_secs),
            backoff_base,
            backoff_max: Duration::from_secs(args.backoff_max_secs).max(backoff_base),
            node_recheck: Duration::from_secs(args.node_recheck_secs.max(1)),
            job_recheck: Duration::from_secs(args.job_recheck_secs.max(1)),
            permanent_recheck: Duration::from_secs(args.permanent_recheck_secs.max(1)),
            call_timeout: Duration::from_secs(args.call_timeout_secs.max(1)),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
            relist_interval: Duration::from_secs(args.relist_interval_secs.max(1)),
            startup_retries: args.startup_retries.max(1),
            gpu_resources: if gpu_resources.is_empty() {
                Self::default().gpu_resources
            } else {
                gpu_resources
            },
        }
    }
}
