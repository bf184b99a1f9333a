use std::collections::BTreeMap;

pub mod influx;
pub mod json;

/// Tag set of one metrics line, kept sorted for stable output.
pub type Tags = BTreeMap<String, String>;
pub type Fields = BTreeMap<String, FieldValue>;

/// Represents a field value that can be encoded in metrics
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Count, sum and extremes of the samples observed during one flush window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryValues {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

/// Trait for encoding metrics data into different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encode metrics with measurement name, tags, fields, and timestamp
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags,
        fields: &Fields,
        timestamp: i64,
    ) -> String;

    /// Encode the running total of GpuJob transitions into one phase.
    fn encode_job_counter(&self, namespace: &str, phase: &str, total: u64, timestamp: i64) -> String {
        let tags = Tags::from([
            ("namespace".to_string(), namespace.to_string()),
            ("phase".to_string(), phase.to_string()),
        ]);
        let fields = Fields::from([("total".to_string(), total.into())]);
        self.encode_metrics("fleet_gpujob_transitions", &tags, &fields, timestamp)
    }

    /// Encode a histogram summary under `measurement`.
    fn encode_summary(
        &self,
        measurement: &str,
        tags: &Tags,
        summary: &SummaryValues,
        timestamp: i64,
    ) -> String {
        let mean = if summary.count == 0 {
            0.0
        } else {
            summary.sum / summary.count as f64
        };
        let fields = Fields::from([
            ("count".to_string(), summary.count.into()),
            ("sum".to_string(), summary.sum.into()),
            ("min".to_string(), summary.min.into()),
            ("max".to_string(), summary.max.into()),
            ("mean".to_string(), mean.into()),
        ]);
        self.encode_metrics(measurement, tags, &fields, timestamp)
    }
}

/// Factory function to create encoders based on format string
pub fn create_encoder(format: &str) -> Box<dyn MetricsEncoder> {
    match format.to_lowercase().as_str() {
        "json" => Box::new(json::JsonEncoder),
        _ => Box::new(influx::InfluxEncoder),
    }
}
