//! # Fibonacci Backoff
//!
//! Progressive retry intervals for failed reconciliations. Intervals grow along the
//! Fibonacci sequence in units of `min` (1m, 1m, 2m, 3m, 5m, ...) and are capped at `max`.

const SECS_PER_MINUTE: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_secs = min_minutes.max(1).saturating_mul(SECS_PER_MINUTE);
        let max_secs = max_minutes.saturating_mul(SECS_PER_MINUTE).max(min_secs);
        Self {
            max_secs,
            previous: 0,
            current: min_secs,
        }
    }

    /// Next interval in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let value = self.current.min(self.max_secs);
        if self.current < self.max_secs {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        value
    }
}
