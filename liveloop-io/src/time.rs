//! Timing helpers for the event loop

use std::time::Duration;

/// Longest a single step may block regardless of what the caller asks for
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Default period of the scheduler tick that bounds trigger latency
pub const DEFAULT_SCHEDULER_GRANULARITY: Duration = Duration::from_millis(10);

/// Bound for one readiness wait
///
/// The smallest of the caller's limit, the global cap and the time left
/// until the next delayed task (`None` meaning no task is pending).
pub fn effective_wait(
    requested: Duration,
    cap: Duration,
    next_deadline: Option<Duration>,
) -> Duration {
    let bound = requested.min(cap);
    match next_deadline {
        Some(remaining) => bound.min(remaining),
        None => bound,
    }
}
