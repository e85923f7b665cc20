//! Circuit breaker trait — the object-safe surface shared by every concrete breaker.

use std::time::Duration;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Requests are short-circuited without attempting the call.
    Open,
    /// A probe request is allowed through to test recovery.
    HalfOpen,
}

/// Behavior every circuit breaker implements, kept small and object-safe so call
/// sites can hold `&dyn CircuitBreakerBehavior` where a concrete type would otherwise
/// leak into an unrelated module.
pub trait CircuitBreakerBehavior: Send + Sync {
    fn should_allow(&self) -> bool;
    fn record_success(&self);
    fn record_failure(&self);
    fn record_success_manual(&self, elapsed: Duration) {
        let _ = elapsed;
        self.record_success();
    }
    fn record_failure_manual(&self, elapsed: Duration) {
        let _ = elapsed;
        self.record_failure();
    }
    fn state(&self) -> CircuitState;
    fn force_open(&self);
    fn force_closed(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOpen;
    impl CircuitBreakerBehavior for AlwaysOpen {
        fn should_allow(&self) -> bool {
            false
        }
        fn record_success(&self) {}
        fn record_failure(&self) {}
        fn state(&self) -> CircuitState {
            CircuitState::Open
        }
        fn force_open(&self) {}
        fn force_closed(&self) {}
    }

    fn _assert_object_safe(_: &dyn CircuitBreakerBehavior) {}

    #[test]
    fn always_open_never_allows() {
        let cb = AlwaysOpen;
        assert!(!cb.should_allow());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
