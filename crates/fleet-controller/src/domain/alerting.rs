//! Utilization threshold alerting with cool-down suppression.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertState {
    pub node_name: String,
    pub resource_name: String,
    pub last_fired: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub node_name: String,
    pub resource_name: String,
    pub utilization_percent: f64,
    pub timestamp: DateTime<Utc>,
}

/// Alert state per (node, resource). Process-local: it resets on restart.
pub struct ThresholdAlerting {
    threshold: f64,
    cooldown: Duration,
    states: Mutex<HashMap<(String, String), AlertState>>,
}

impl ThresholdAlerting {
    /// `threshold` is a utilization ratio in `[0, 1]`.
    pub fn new(threshold: f64, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one utilization sample; returns the alert to emit, if any.
    pub fn evaluate(
        &self,
        node_name: &str,
        resource_name: &str,
        utilization: f64,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry((node_name.to_string(), resource_name.to_string()))
            .or_insert_with(|| AlertState {
                node_name: node_name.to_string(),
                resource_name: resource_name.to_string(),
                last_fired: None,
            });

        if utilization < self.threshold {
            state.last_fired = None;
            return None;
        }

        if let Some(last_fired) = state.last_fired {
            let elapsed = now.signed_duration_since(last_fired);
            // a clock stepping backwards keeps the alert suppressed
            if elapsed.to_std().map_or(true, |elapsed| elapsed < self.cooldown) {
                return None;
            }
        }

        state.last_fired = Some(now);
        Some(Alert {
            node_name: node_name.to_string(),
            resource_name: resource_name.to_string(),
            utilization_percent: utilization * 100.0,
            timestamp: now,
        })
    }

    /// Drop every entry of a node that no longer exists.
    pub fn forget_node(&self, node_name: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(node, _), _| node != node_name);
    }

    pub fn state(&self, node_name: &str, resource_name: &str) -> Option<AlertState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(node_name.to_string(), resource_name.to_string()))
            .cloned()
    }
}
