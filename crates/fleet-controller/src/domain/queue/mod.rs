//! Work queue that coalesces reconcile triggers by object key.

pub mod backoff;
pub mod work_queue;

pub use backoff::ExponentialBackoff;
pub use work_queue::TriggerReason;
pub use work_queue::WorkItem;
pub use work_queue::WorkQueue;
