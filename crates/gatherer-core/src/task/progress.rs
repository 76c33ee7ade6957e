//! Progress clamp: non-decreasing, below 100 until the task completes.

/// Highest value a non-completed task may report.
pub const PROGRESS_CEILING: f64 = 99.9;

/// Value reported when a task completes.
pub const PROGRESS_COMPLETE: f64 = 100.0;

/// Apply `delta` to `current`, keeping the result in `[current, PROGRESS_CEILING]`.
///
/// Negative or non-finite deltas leave the value unchanged.
pub fn clamp_progress(current: f64, delta: f64) -> f64 {
    if !delta.is_finite() {
        return current;
    }
    let target = (current + delta).clamp(0.0, PROGRESS_CEILING);
    target.max(current)
}
