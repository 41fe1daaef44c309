use std::time::Duration;

/// Exponential reconnect backoff.
///
/// Each failed attempt doubles the wait up to `max`; a successful connect
/// resets it to `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Record a failed attempt and return how many happened in a row.
    pub fn mark_failure(&mut self) -> u32 {
        self.failures += 1;
        self.failures
    }

    /// Reset after a successful connect.
    pub fn mark_success(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }
}
