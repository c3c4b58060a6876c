pub mod circuit_breaker;
pub mod connection_pool;
pub mod retry;
pub mod service_runtime;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use connection_pool::{ConnectionPool, ConnectionPriority};
pub use retry::{RetryConfig, RetryEngine, RetryStrategy};
pub use service_runtime::ServiceRuntime;
