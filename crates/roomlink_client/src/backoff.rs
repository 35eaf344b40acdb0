//! Reconnect backoff with a stability window

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Reconnect policy configuration
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum consecutive reconnect attempts; `None` retries forever
    pub max_retries: Option<u32>,
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between attempts; values below 1.0 are treated as 1.0
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction in 0.0..=1.0
    /// (0.0 disables)
    pub jitter: f64,
    /// A connection open this long resets the attempt counter
    pub stable_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            stable_after: Duration::from_secs(30),
        }
    }
}

/// Tracks consecutive failures and computes the next delay
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
    current: Duration,
    connected_at: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.initial_delay;
        Self {
            policy,
            attempts: 0,
            current,
            connected_at: None,
        }
    }

    /// Called when a connection opens
    pub fn on_connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    /// Called when a connection attempt fails or an open connection drops.
    /// Returns the delay before the next attempt, or None when exhausted.
    pub fn on_disconnect(&mut self) -> Option<Duration> {
        if let Some(connected_at) = self.connected_at.take() {
            if connected_at.elapsed() >= self.policy.stable_after {
                self.reset();
            }
        }

        self.attempts += 1;
        if self
            .policy
            .max_retries
            .is_some_and(|max| self.attempts > max)
        {
            return None;
        }

        let delay = self.current;
        // f64::max discards NaN
        let multiplier = self.policy.multiplier.max(1.0);
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * multiplier).min(self.policy.max_delay.as_secs_f64()),
        );

        Some(self.jittered(delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.policy.jitter.is_nan() || self.policy.jitter <= 0.0 {
            return delay;
        }
        let spread = self.policy.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        Duration::from_secs_f64(delay.as_secs_f64() * factor).min(self.policy.max_delay)
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.policy.initial_delay;
    }

    /// Consecutive failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
