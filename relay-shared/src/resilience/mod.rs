pub mod behavior;
pub mod circuit_breaker;

pub use behavior::{CircuitBreakerBehavior, CircuitState};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
