//! Circuit breaker and retry-policy primitives shared by the LLM client (C3).
//!
//! The Gemini request path does not use a generic retry loop — spec §4.3
//! requires a bespoke state machine keyed on HTTP status (503 triggers model
//! fallback, 429 triggers exponential backoff, other errors fail fast) that
//! lives directly in [`crate::llm_client`]. What survives from the teacher's
//! generic retry executor is the policy/circuit-breaker pair: `RetryPolicy`
//! supplies the backoff shape (initial/max delay, multiplier, timeouts) and
//! `CircuitBreaker` protects a saturated provider across consecutive batches,
//! exactly as the teacher used them, just without the generic `execute()` loop.

use crate::logging::{log_debug, log_warn};

use std::time::{Duration, Instant};

/// Retry policy configuration for LLM requests.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum total operation time.
    pub total_timeout: Duration,
    /// Request timeout for individual attempts.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay for the given attempt number (1-indexed),
    /// with up to 10% jitter to avoid thundering-herd retries.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_seconds =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi((attempt.max(1) - 1) as i32);
        let delay = Duration::from_secs_f64(delay_seconds.min(self.max_delay.as_secs_f64()));
        let jitter = fastrand::f64() * 0.1;
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing, blocking requests.
    Open,
    /// Testing if the service recovered.
    HalfOpen,
}

/// Circuit breaker guarding the LLM client against hammering a provider that
/// is already failing across consecutive batches (spec §4.3, §9).
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreaker {
    /// Whether a request should be let through right now.
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.check_recovery_timeout(),
            CircuitState::HalfOpen => true,
        }
    }

    fn check_recovery_timeout(&mut self) -> bool {
        let Some(last_failure) = self.last_failure_time else {
            return false;
        };
        if last_failure.elapsed() >= self.recovery_timeout {
            log_debug!(
                circuit_breaker = "transitioning_to_half_open",
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "circuit breaker attempting recovery"
            );
            self.state = CircuitState::HalfOpen;
            true
        } else {
            false
        }
    }

    /// Record a successful request, closing the circuit.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                log_debug!(circuit_breaker = "recovered", "circuit breaker closed after recovery");
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {
                self.failure_count = 0;
                self.last_failure_time = None;
            }
        }
    }

    /// Record a failed request, opening the circuit once the threshold is reached.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        if self.failure_count >= self.failure_threshold {
            if self.state != CircuitState::Open {
                log_warn!(
                    circuit_breaker = "opened",
                    failure_count = self.failure_count,
                    failure_threshold = self.failure_threshold,
                    recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                    "circuit breaker opened due to repeated failures"
                );
            }
            self.state = CircuitState::Open;
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps_at_max() {
        let policy = RetryPolicy::default();
        let d1 = policy.calculate_delay(1).as_secs_f64();
        let d2 = policy.calculate_delay(2).as_secs_f64();
        assert!(d1 >= 1.0 && d1 < 1.2);
        assert!(d2 >= 2.0 && d2 < 2.3);
        let d_large = policy.calculate_delay(20).as_secs_f64();
        assert!(d_large <= policy.max_delay.as_secs_f64() * 1.1);
    }

    #[test]
    fn circuit_opens_after_threshold_failures_and_blocks() {
        let mut cb = CircuitBreaker::default();
        for _ in 0..5 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow_request());
    }

    #[test]
    fn circuit_recovers_to_closed_on_success_after_half_open() {
        let mut cb = CircuitBreaker {
            recovery_timeout: Duration::from_millis(1),
            ..CircuitBreaker::default()
        };
        for _ in 0..5 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.should_allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
