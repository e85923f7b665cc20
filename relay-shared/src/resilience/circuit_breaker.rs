//! A concrete, lock-based circuit breaker.
//!
//! Three-state breaker (closed → open → half-open → closed) with a fixed failure
//! threshold and a cooldown before probing again. Used to wrap the broker, the bus,
//! and the database pool so a downstream outage degrades to fast failures instead of
//! piling up timed-out requests.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::behavior::{CircuitBreakerBehavior, CircuitState};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Metrics snapshot, cheap to clone for logging/health endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerMetrics {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_failures: u64,
    pub total_successes: u64,
}

struct Inner {
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

/// A named circuit breaker (name is used only for log attribution).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Inner,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Inner {
                state: Mutex::new(CircuitState::Closed),
                opened_at: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
                total_failures: AtomicU64::new(0),
                total_successes: AtomicU64::new(0),
            },
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.inner.consecutive_successes.load(Ordering::Relaxed),
            total_failures: self.inner.total_failures.load(Ordering::Relaxed),
            total_successes: self.inner.total_successes.load(Ordering::Relaxed),
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state != new_state {
            debug!(breaker = %self.name, from = ?*state, to = ?new_state, "circuit breaker transition");
            *state = new_state;
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn should_allow(&self) -> bool {
        let current = *self.inner.state.lock().unwrap_or_else(|p| p.into_inner());
        match current {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = *self.inner.opened_at.lock().unwrap_or_else(|p| p.into_inner());
                match opened_at {
                    Some(at) if at.elapsed() >= self.config.open_timeout => {
                        self.transition_to(CircuitState::HalfOpen);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn record_success(&self) {
        self.inner.total_successes.fetch_add(1, Ordering::Relaxed);
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        let successes = self
            .inner
            .consecutive_successes
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        if self.state() == CircuitState::HalfOpen && successes >= self.config.success_threshold {
            self.transition_to(CircuitState::Closed);
            self.inner.consecutive_successes.store(0, Ordering::Relaxed);
        }
    }

    fn record_failure(&self) {
        self.inner.total_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.consecutive_successes.store(0, Ordering::Relaxed);
        let failures = self
            .inner
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        if failures >= self.config.failure_threshold && self.state() != CircuitState::Open {
            warn!(breaker = %self.name, failures, "circuit breaker opening");
            *self.inner.opened_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
            self.transition_to(CircuitState::Open);
        }
    }

    fn state(&self) -> CircuitState {
        *self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn force_open(&self) {
        *self.inner.opened_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        self.transition_to(CircuitState::Open);
    }

    fn force_closed(&self) {
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);
        self.inner.consecutive_successes.store(0, Ordering::Relaxed);
        self.transition_to(CircuitState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                open_timeout: Duration::from_millis(20),
            },
        )
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker();
        assert!(cb.should_allow());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.should_allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
    }

    #[test]
    fn half_opens_after_timeout_and_closes_after_successes() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn a_single_success_in_half_open_does_not_fully_close_below_threshold() {
        let cb = breaker();
        cb.force_open();
        // open_timeout is 20ms; force a half-open probe manually via state churn.
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.should_allow());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn force_closed_resets_counters() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }
}
