//! GpuJob lifecycle: `Pending -> Running -> {Completed, Failed}`.
//!
//! Phases only move forward, one step per reconcile. The terminal step is
//! taken when the executor's completion signal shows up in the fetched
//! status; it is never inferred locally.

use chrono::DateTime;
use chrono::Utc;

use super::types::CompletionOutcome;
use super::types::GpuJobStatus;
use super::types::JobPhase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Persist this status.
    Advance(GpuJobStatus),
    /// Nothing to write yet; check again later.
    Hold,
    /// Terminal; no further work.
    Halt,
}

pub fn next(status: &GpuJobStatus, now: DateTime<Utc>) -> Transition {
    let to = match (status.phase, &status.completion) {
        (JobPhase::Pending, _) => JobPhase::Running,
        (JobPhase::Running, Some(signal)) => match signal.outcome {
            CompletionOutcome::Succeeded => JobPhase::Completed,
            CompletionOutcome::Failed => JobPhase::Failed,
        },
        (JobPhase::Running, None) => return Transition::Hold,
        (JobPhase::Completed | JobPhase::Failed, _) => return Transition::Halt,
    };

    let mut advanced = status.clone();
    advanced.phase = to;
    advanced.last_transition_time = Some(now);
    advanced.reconcile_count = status.reconcile_count.saturating_add(1);
    Transition::Advance(advanced)
}
