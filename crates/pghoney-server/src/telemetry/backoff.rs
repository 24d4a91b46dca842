//! Linear reconnect backoff: 1, 2, 3, … units, capped at 20.

use std::time::Duration;

/// Largest multiple of the unit ever waited.
pub const MAX_BACKOFF_STEPS: u32 = 20;

#[derive(Debug, Clone)]
pub struct LinearBackoff {
    unit: Duration,
    step: u32,
}

impl LinearBackoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit, step: 0 }
    }

    /// Delay before the next attempt. Grows by one unit per call until the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.step = (self.step + 1).min(MAX_BACKOFF_STEPS);
        self.unit * self.step
    }

    /// Start over from one unit.
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
