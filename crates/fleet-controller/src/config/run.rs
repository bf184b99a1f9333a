use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "FLEET_NAMESPACE",
        help = "Namespace to watch GpuJobs in (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "FLEET_WORKERS",
        default_value = "4",
        help = "Number of concurrent reconcile workers"
    )]
    pub workers: usize,

    #[arg(
        long,
        env = "FLEET_UTILIZATION_THRESHOLD",
        default_value = "90",
        help = "GPU utilization percentage at or above which an alert fires"
    )]
    pub utilization_threshold: f64,

    #[arg(
        long,
        default_value = "300",
        help = "Minimum seconds between two alerts for the same node resource"
    )]
    pub alert_cooldown_secs: u64,

    #[arg(
        long,
        default_value = "1000",
        help = "Initial retry delay in milliseconds after a transient error"
    )]
    pub backoff_base_ms: u64,

    #[arg(long, default_value = "300", help = "Maximum retry delay in seconds")]
    pub backoff_max_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds between utilization re-samples of a node"
    )]
    pub node_recheck_secs: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between rechecks of a non terminal GpuJob"
    )]
    pub job_recheck_secs: u64,

    #[arg(
        long,
        default_value = "600",
        help = "Seconds between rechecks of an object with a permanent error"
    )]
    pub permanent_recheck_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Timeout in seconds for a single cluster API call"
    )]
    pub call_timeout_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds in-flight reconciles get to finish on shutdown"
    )]
    pub shutdown_grace_secs: u64,

    #[arg(
        long,
        default_value = "300",
        help = "Seconds between full relists of every watched kind"
    )]
    pub relist_interval_secs: u64,

    #[arg(
        long,
        default_value = "5",
        help = "API server connectivity probes before giving up at startup"
    )]
    pub startup_retries: u32,

    #[arg(
        long = "gpu-resource",
        env = "FLEET_GPU_RESOURCES",
        value_delimiter = ',',
        default_values_t = crate::domain::inventory::DEFAULT_GPU_RESOURCES.map(String::from),
        help = "Extended resource names tracked as GPUs"
    )]
    pub gpu_resources: Vec<String>,

    #[arg(
        long,
        env = "FLEET_ALERT_WEBHOOK_URL",
        help = "POST utilization alerts as JSON to this URL"
    )]
    pub alert_webhook_url: Option<String>,

    #[arg(
        long,
        env = "FLEET_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for printing controller metrics, e.g. /logs/metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,

    #[arg(
        long,
        env = "FLEET_METRICS_FORMAT",
        default_value = "influx",
        help = "Metrics format, either 'influx' or 'json'"
    )]
    pub metrics_format: String,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between two metrics flushes"
    )]
    pub metrics_flush_secs: u64,

    #[arg(
        long,
        env = "FLEET_HEALTH_ADDR",
        default_value = "0.0.0.0:8084",
        help = "Listen address of the /health and /ready endpoints"
    )]
    pub health_listen_addr: String,
}

#[derive(Parser, Clone, Debug)]
pub struct CrdArgs {}
