//! Alert sink adapters: structured log lines and an optional JSON webhook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use core::error::Error;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;

use crate::domain::traits::AlertSink;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, derive_more::Display)]
pub enum AlertSinkError {
    #[display("Failed to build webhook client for {url}")]
    ClientBuild { url: String },
}

impl Error for AlertSinkError {}

/// Emits every alert as a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization_percent: f64,
        timestamp: DateTime<Utc>,
    ) {
        tracing::warn!(
            node = node_name,
            resource = resource_name,
            utilization_percent,
            %timestamp,
            "GPU utilization above threshold"
        );
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct AlertPayload<'a> {
    node: &'a str,
    resource: &'a str,
    utilization_percent: f64,
    timestamp: DateTime<Utc>,
}

/// POSTs alerts as JSON. Delivery is best effort: failures are logged and
/// never reach the reconciler.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, Report<AlertSinkError>> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .change_context_lazy(|| AlertSinkError::ClientBuild { url: url.clone() })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization_percent: f64,
        timestamp: DateTime<Utc>,
    ) {
        let payload = AlertPayload {
            node: node_name,
            resource: resource_name,
            utilization_percent,
            timestamp,
        };
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %self.url, node = node_name, "alert delivered");
            }
            Ok(response) => {
                tracing::warn!(url = %self.url, status = %response.status(), "alert webhook rejected alert");
            }
            Err(e) => {
                tracing::warn!(url = %self.url, "alert webhook unreachable: {e}");
            }
        }
    }
}

/// Forwards each alert to every inner sink in order.
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn notify(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization_percent: f64,
        timestamp: DateTime<Utc>,
    ) {
        for sink in &self.sinks {
            sink.notify(node_name, resource_name, utilization_percent, timestamp)
                .await;
        }
    }
}
