use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Backoff for caller-driven reconnects.
///
/// The session never retries by itself; a host that wants to reconnect
/// after a drop asks this policy how long to wait first.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    /// None = never give up
    max_attempts: Option<u32>,
    /// Fraction (0.0 to 1.0) of the delay added as random jitter
    jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts,
            jitter_factor: config.jitter.clamp(0.0, 1.0),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before reconnect attempt `attempt` (1-indexed), or None once
    /// the attempt budget is spent
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        // base * 2^(attempt-1), exponent capped to stay clear of overflow
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };

        Some((delay + jitter).min(self.max_delay))
    }
}

/// Consecutive-failure bookkeeping for the reconnect loop
#[derive(Debug)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    consecutive_failures: u32,
    total_connections: u64,
    total_reconnects: u64,
    last_error: Option<String>,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            total_connections: 0,
            total_reconnects: 0,
            last_error: None,
        }
    }

    pub fn record_success(&mut self) {
        if self.total_connections > 0 {
            self.total_reconnects += 1;
        }
        self.consecutive_failures = 0;
        self.total_connections += 1;
        self.last_error = None;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
    }

    /// Wait before the next attempt, or None to give up
    pub fn next_delay(&self) -> Option<Duration> {
        self.policy
            .delay_for_attempt(self.consecutive_failures.max(1))
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }

    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
