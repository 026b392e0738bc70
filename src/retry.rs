use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::Response;

/// Decides whether a response should be retried.
pub type RetryPredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Randomization applied to computed backoff delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Sleep exactly the computed delay.
    #[default]
    None,
    /// Sleep a uniformly random fraction of the computed delay.
    Full,
}

/// Retry policy for a request.
///
/// The delay before attempt `n + 1` is `interval * backoff_rate^n`, capped at
/// `max_delay`, then scaled by a fresh `uniform(0, 1)` draw under
/// [`JitterStrategy::Full`].
#[derive(Clone)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: usize,
    backoff_rate: f64,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_rate", &self.backoff_rate)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 1,
            backoff_rate: 1.0,
            max_delay: None,
            jitter: JitterStrategy::None,
            predicate: Arc::new(default_retry_predicate),
        }
    }

    /// Fixed `interval` between up to `max_attempts` attempts, no jitter.
    pub fn constant_backoff(interval: Duration, max_attempts: usize) -> Self {
        Self::new()
            .with_interval(interval)
            .with_max_attempts(max_attempts)
            .with_backoff_rate(1.0)
            .with_jitter(JitterStrategy::None)
    }

    /// Delay grows by `rate` per attempt, starting at `interval`.
    pub fn exponential_backoff(interval: Duration, max_attempts: usize, rate: f64) -> Self {
        Self::new()
            .with_interval(interval)
            .with_max_attempts(max_attempts)
            .with_backoff_rate(rate)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Total attempts including the first one; clamped to at least 1.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Non-finite or negative rates fall back to constant backoff.
    pub fn with_backoff_rate(mut self, rate: f64) -> Self {
        self.backoff_rate = if rate.is_finite() && rate >= 0.0 {
            rate
        } else {
            1.0
        };
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the default "4xx or 5xx" predicate.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff_rate(&self) -> f64 {
        self.backoff_rate
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn jitter(&self) -> JitterStrategy {
        self.jitter
    }

    /// `true` when the policy allows more than one attempt.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    pub fn should_retry(&self, response: &Response) -> bool {
        (self.predicate)(response)
    }

    /// Delay after the zero-based `attempt`, capped but without jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let cap = self.max_delay.unwrap_or(Duration::MAX);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.interval.as_secs_f64() * self.backoff_rate.powi(exponent);
        if !seconds.is_finite() || seconds >= cap.as_secs_f64() {
            return cap;
        }
        Duration::try_from_secs_f64(seconds).map_or(cap, |delay| delay.min(cap))
    }

    /// Delay actually slept after the zero-based `attempt`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let computed = self.delay_for_attempt(attempt);
        match self.jitter {
            JitterStrategy::None => computed,
            JitterStrategy::Full => {
                let fraction: f64 = rand::thread_rng().gen();
                Duration::try_from_secs_f64(computed.as_secs_f64() * fraction)
                    .map_or(computed, |delay| delay.min(computed))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Retries any 4xx or 5xx response.
pub fn default_retry_predicate(response: &Response) -> bool {
    response.status().is_error()
}
