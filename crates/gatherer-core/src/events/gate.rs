//! Per-task progress throttle.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(super) struct ProgressGate {
    last_sent_at: Option<Instant>,
    last_sent: f64,
    pending: Option<f64>,
}

impl ProgressGate {
    /// Returns the value to emit now, if any.
    pub(super) fn offer(&mut self, progress: f64, interval: Duration) -> Option<f64> {
        let high = self.pending.unwrap_or(self.last_sent).max(self.last_sent);
        if !progress.is_finite() || progress <= high {
            return None;
        }
        let due = self
            .last_sent_at
            .map_or(true, |at| at.elapsed() >= interval);
        if due {
            self.pending = None;
            self.last_sent = progress;
            self.last_sent_at = Some(Instant::now());
            Some(progress)
        } else {
            self.pending = Some(progress);
            None
        }
    }

    pub(super) fn take_pending(&mut self) -> Option<f64> {
        let pending = self.pending.take()?;
        self.last_sent = pending;
        Some(pending)
    }

    pub(super) fn last_sent(&self) -> f64 {
        self.last_sent
    }
}
