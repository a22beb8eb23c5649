//! Wall-clock source driven by the tokio timer.
//!
//! Scheduled times are expressed as UTC timestamps, but elapsed time is
//! measured with [`tokio::time::Instant`] so that paused-time tests can
//! advance the clock deterministically.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Maps tokio instants onto UTC timestamps.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_wall: DateTime<Utc>,
    base_instant: Instant,
}

impl Clock {
    /// Anchor a clock at the current time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor a clock at a fixed wall time (tests).
    pub fn starting_at(base_wall: DateTime<Utc>) -> Self {
        Self {
            base_wall,
            base_instant: Instant::now(),
        }
    }

    /// Current UTC time.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.base_instant);
        self.base_wall + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
