//! In-process metrics sink flushed as encoded lines on the `metrics` target.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::traits::MetricsSink;
use crate::domain::types::JobPhase;
use crate::domain::types::Kind;

pub mod encoders;
use encoders::create_encoder;
use encoders::MetricsEncoder;
use encoders::SummaryValues;
use encoders::Tags;

const UTILIZATION_MEASUREMENT: &str = "fleet_gpu_utilization";
const LATENCY_MEASUREMENT: &str = "fleet_reconcile_latency_seconds";

#[derive(Debug, Clone, Copy)]
struct Summary {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Summary {
    fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn values(&self) -> SummaryValues {
        SummaryValues {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Default)]
struct MetricsState {
    /// Cumulative since start, keyed by (namespace, phase).
    job_transitions: BTreeMap<(String, JobPhase), u64>,
    /// Per flush window, keyed by (node, resource).
    utilization: BTreeMap<(String, String), Summary>,
    /// Per flush window, keyed by (kind, namespace).
    latency: BTreeMap<(Kind, String), Summary>,
}

/// Counters and histogram summaries accumulated between flushes.
#[derive(Default)]
pub struct FleetMetrics {
    state: Mutex<MetricsState>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every metric and reset the windowed summaries.
    pub fn flush(&self, encoder: &dyn MetricsEncoder, timestamp: i64) -> Vec<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines = Vec::new();

        for ((namespace, phase), total) in &state.job_transitions {
            lines.push(encoder.encode_job_counter(
                namespace,
                &phase.to_string(),
                *total,
                timestamp,
            ));
        }

        for ((node, resource), summary) in std::mem::take(&mut state.utilization) {
            let tags = Tags::from([
                ("node".to_string(), node),
                ("resource".to_string(), resource),
            ]);
            lines.push(encoder.encode_summary(
                UTILIZATION_MEASUREMENT,
                &tags,
                &summary.values(),
                timestamp,
            ));
        }

        for ((kind, namespace), summary) in std::mem::take(&mut state.latency) {
            let mut tags = Tags::from([("kind".to_string(), kind.to_string())]);
            if !namespace.is_empty() {
                tags.insert("namespace".to_string(), namespace);
            }
            lines.push(encoder.encode_summary(
                LATENCY_MEASUREMENT,
                &tags,
                &summary.values(),
                timestamp,
            ));
        }

        lines
    }
}

impl MetricsSink for FleetMetrics {
    fn record_job_transition(&self, namespace: &str, phase: JobPhase) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state
            .job_transitions
            .entry((namespace.to_string(), phase))
            .or_insert(0) += 1;
    }

    fn observe_utilization(&self, node_name: &str, resource_name: &str, utilization: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .utilization
            .entry((node_name.to_string(), resource_name.to_string()))
            .and_modify(|s| s.observe(utilization))
            .or_insert_with(|| Summary::new(utilization));
    }

    fn observe_reconcile_latency(&self, kind: Kind, namespace: &str, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .latency
            .entry((kind, namespace.to_string()))
            .and_modify(|s| s.observe(seconds))
            .or_insert_with(|| Summary::new(seconds));
    }
}

/// Flush `metrics` every `interval` until cancelled, then once more.
pub async fn run_metrics(
    metrics: Arc<FleetMetrics>,
    metrics_format: &str,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    let encoder = create_encoder(metrics_format);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Metrics flush shutdown requested");
                emit(metrics.flush(encoder.as_ref(), current_time()));
                break;
            }
            _ = ticker.tick() => {
                emit(metrics.flush(encoder.as_ref(), current_time()));
            }
        }
    }
}

fn emit(lines: Vec<String>) {
    for line in lines {
        tracing::info!(target: "metrics", msg = %line);
    }
}

pub fn current_time() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::encoders::influx::InfluxEncoder;
    use super::*;

    #[test]
    fn flush_reports_counters_and_resets_windows() {
        let metrics = FleetMetrics::new();
        metrics.record_job_transition("ml", JobPhase::Running);
        metrics.record_job_transition("ml", JobPhase::Running);
        metrics.observe_utilization("gpu-1", "nvidia.com/gpu", 0.5);
        metrics.observe_utilization("gpu-1", "nvidia.com/gpu", 1.0);
        metrics.observe_reconcile_latency(Kind::Node, "", Duration::from_millis(250));

        let lines = metrics.flush(&InfluxEncoder, 1000);
        assert_eq!(
            lines,
            vec![
                "fleet_gpujob_transitions,namespace=ml,phase=Running total=2u 1000\n".to_string(),
                "fleet_gpu_utilization,node=gpu-1,resource=nvidia.com/gpu count=2u,max=1,mean=0.75,min=0.5,sum=1.5 1000\n".to_string(),
                "fleet_reconcile_latency_seconds,kind=Node count=1u,max=0.25,mean=0.25,min=0.25,sum=0.25 1000\n".to_string(),
            ]
        );

        let lines = metrics.flush(&InfluxEncoder, 2000);
        assert_eq!(
            lines,
            vec!["fleet_gpujob_transitions,namespace=ml,phase=Running total=2u 2000\n".to_string()]
        );
    }

    #[test]
    fn latency_is_tagged_with_namespace_when_present() {
        let metrics = FleetMetrics::new();
        metrics.observe_reconcile_latency(Kind::GpuJob, "ml", Duration::from_secs(1));

        let lines = metrics.flush(&InfluxEncoder, 1);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("fleet_reconcile_latency_seconds,kind=GpuJob,namespace=ml "));
    }

    #[tokio::test(start_paused = true)]
    async fn run_metrics_stops_on_cancel() {
        let metrics = Arc::new(FleetMetrics::new());
        let token = CancellationToken::new();
        let task = tokio::spawn(run_metrics(
            metrics.clone(),
            "influx",
            Duration::from_secs(10),
            token.clone(),
        ));

        metrics.observe_utilization("gpu-1", "nvidia.com/gpu", 0.1);
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        task.await.unwrap();
    }
}
