/// file: src/reconnect.rs
/// description: pure retry/delay decisions for transport reconnection
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    max_delay: Duration,
    backoff: Backoff,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            max_delay: DEFAULT_MAX_DELAY,
            backoff: Backoff::Linear,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Decide what to do after a failure, given how many reconnect attempts
    /// have already been made since the last successful open.
    pub fn decide(&self, attempts_made: u32) -> ReconnectDecision {
        if !self.should_retry(attempts_made) {
            return ReconnectDecision::GiveUp;
        }
        let attempt = attempts_made + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for_attempt(attempt),
        }
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = saturating_millis(self.base_delay);
        let multiplier = match self.backoff {
            Backoff::Linear => u64::from(attempt),
            Backoff::Exponential => 1_u64 << (attempt - 1).min(20),
        };
        let bounded = Duration::from_millis(base_ms.saturating_mul(multiplier));
        bounded.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub fn saturating_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
