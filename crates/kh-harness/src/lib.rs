pub mod circuit_breaker;
pub mod retry;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::retry_with_jitter;
pub use shutdown::{DrainResult, ShutdownGuard, ShutdownSignal};
