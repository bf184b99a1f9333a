//! Reconcile loop: the per-key engine and the worker pool that drives it.

pub mod controller;
pub mod engine;

use std::time::Duration;

pub use controller::Controller;
pub use engine::Reconciler;

use super::types::ObjectKey;

/// What the worker does with a key after a successful reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; drop the key and reset its backoff.
    Done,
    /// Converged for now; look again after the delay.
    RequeueAfter(Duration),
    /// The key is handled through another key, which is enqueued instead.
    Delegate(ObjectKey),
}
