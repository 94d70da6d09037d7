use std::time::Duration;

/// Reconnect delay schedule: `min(max, base * 2^attempt)`
///
/// There is no retry cap; the live subscription keeps trying until shutdown.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        assert!(!base.is_zero(), "backoff base delay must be positive");
        assert!(max >= base, "backoff max delay must be >= base delay");
        Self {
            base_delay: base,
            max_delay: max,
            current_attempt: 0,
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Delay for the current attempt without advancing
    pub fn peek(&self) -> Duration {
        2u32.checked_pow(self.current_attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns `(attempt, delay)` for this failure and advances the counter
    pub fn next_delay(&mut self) -> (u32, Duration) {
        let attempt = self.current_attempt;
        let delay = self.peek();
        self.current_attempt = self.current_attempt.saturating_add(1);
        (attempt, delay)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
