use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::clock::Clock;
use crate::domain::errors::MidplaneError;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::infrastructure::core::connection_pool::{ConnectionPool, ConnectionPoolConfig, ConnectionPriority};
use crate::infrastructure::core::retry::{RetryConfig, RetryEngine, RetryStrategy};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub priority: ConnectionPriority,
    pub retry: RetryConfig,
    pub circuit_failure_threshold: usize,
    pub circuit_success_threshold: usize,
    pub circuit_timeout: Duration,
    pub pool: ConnectionPoolConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            priority: ConnectionPriority::Normal,
            retry: RetryConfig::connection(),
            circuit_failure_threshold: 5,
            circuit_success_threshold: 2,
            circuit_timeout: Duration::from_secs(60),
            pool: ConnectionPoolConfig::default(),
        }
    }
}

impl ServiceConfig {
    fn named(priority: ConnectionPriority, max_attempts: u32, strategy: RetryStrategy, circuit_timeout: Duration) -> Self {
        let mut retry = RetryConfig::connection();
        retry.max_attempts = max_attempts;
        retry.strategy = strategy;
        Self {
            priority,
            retry,
            circuit_timeout,
            ..Self::default()
        }
    }
}

/// Health score bucket matching the runtime's 0-100 weighted formula:
/// operational >= 90, slow >= 70, failing >= 50, down otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Operational,
    Slow,
    Failing,
    Down,
}

impl ServiceStatus {
    fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            ServiceStatus::Operational
        } else if score >= 70.0 {
            ServiceStatus::Slow
        } else if score >= 50.0 {
            ServiceStatus::Failing
        } else {
            ServiceStatus::Down
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub health_score: f64,
    pub status: ServiceStatus,
}

struct RegisteredService {
    config: ServiceConfig,
    pool: Arc<ConnectionPool>,
    breaker: CircuitBreaker,
    retry: RetryEngine,
}

/// Wraps every named broker-bound call with its own connection pool,
/// circuit breaker, and retry engine, looked up by service name. Registers
/// the midplane's standing services (`market_data`, `historical_data`,
/// `order_management`, `data_persistence`, `ml_signal_execution`,
/// `ml_risk_management`) by default; callers can register additional names.
pub struct ServiceRuntime {
    clock: Arc<dyn Clock>,
    services: HashMap<String, RegisteredService>,
}

impl ServiceRuntime {
    /// An empty runtime with no registered services — useful for tests that
    /// only want a single named service.
    pub fn empty(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            services: HashMap::new(),
        }
    }

    /// A runtime pre-registered with the midplane's six standing services,
    /// each tuned per its own retry/priority profile.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        let mut runtime = Self::empty(clock);
        for (name, config) in Self::default_registry() {
            runtime.register(name, config);
        }
        runtime
    }

    fn default_registry() -> Vec<(&'static str, ServiceConfig)> {
        vec![
            (
                "market_data",
                ServiceConfig::named(
                    ConnectionPriority::Critical,
                    3,
                    RetryStrategy::JitteredExponential,
                    Duration::from_secs(10),
                ),
            ),
            (
                "historical_data",
                ServiceConfig::named(
                    ConnectionPriority::High,
                    5,
                    RetryStrategy::ExponentialBackoff,
                    Duration::from_secs(60),
                ),
            ),
            (
                "order_management",
                ServiceConfig::named(
                    ConnectionPriority::Critical,
                    2,
                    RetryStrategy::JitteredExponential,
                    Duration::from_secs(5),
                ),
            ),
            (
                "data_persistence",
                ServiceConfig::named(
                    ConnectionPriority::Normal,
                    3,
                    RetryStrategy::JitteredExponential,
                    Duration::from_secs(30),
                ),
            ),
            (
                "ml_signal_execution",
                ServiceConfig::named(
                    ConnectionPriority::High,
                    2,
                    RetryStrategy::JitteredExponential,
                    Duration::from_secs(10),
                ),
            ),
            (
                "ml_risk_management",
                ServiceConfig::named(
                    ConnectionPriority::High,
                    2,
                    RetryStrategy::JitteredExponential,
                    Duration::from_secs(10),
                ),
            ),
        ]
    }

    /// Registers (or replaces) a named service's policy.
    pub fn register(&mut self, name: impl Into<String>, config: ServiceConfig) {
        let name = name.into();
        let service = RegisteredService {
            pool: Arc::new(ConnectionPool::new(self.clock.clone(), config.pool.clone())),
            breaker: CircuitBreaker::new(
                name.clone(),
                self.clock.clone(),
                config.circuit_failure_threshold,
                config.circuit_success_threshold,
                config.circuit_timeout,
            ),
            retry: RetryEngine::new(name.clone(), config.retry.clone()),
            config,
        };
        self.services.insert(name, service);
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Looks up `name`, acquires a pooled session at its configured priority,
    /// then runs `op` under that service's circuit breaker and retry policy.
    /// Unknown names fail fast with [`MidplaneError::UnknownService`].
    pub async fn execute<F, Fut, T>(&self, name: &str, op_name: &str, mut op: F) -> Result<T, MidplaneError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MidplaneError>>,
    {
        let svc = self
            .services
            .get(name)
            .ok_or_else(|| MidplaneError::UnknownService { name: name.to_string() })?;

        let started = self.clock.monotonic_now();
        let _lease = svc.pool.acquire(svc.config.priority).await?;

        let result = svc
            .retry
            .execute_with_retry(|| async {
                match svc.breaker.call(op()).await {
                    Ok(value) => Ok(value),
                    Err(CircuitBreakerError::Open(_)) => Err(MidplaneError::CircuitOpen {
                        name: name.to_string(),
                        retry_after: svc.config.circuit_timeout,
                    }),
                    Err(CircuitBreakerError::Inner(err)) => Err(err),
                }
            })
            .await;

        if let Err(ref err) = result {
            let duration = self.clock.monotonic_now().saturating_duration_since(started);
            let health = self.health_score(name).await.map(|h| h.health_score).unwrap_or(0.0);
            error!(
                service = name,
                op = op_name,
                duration_ms = duration.as_millis() as u64,
                health_score = health,
                "service call failed: {err}"
            );
        }

        result
    }

    /// Weighted 0-100 health score: success rate (40%), responsiveness
    /// (20%, `max(0, 100 - avg_response_ms * 10)`), pool health (20%,
    /// average slot uptime), and circuit state (20%, open scores 0).
    pub async fn health_score(&self, name: &str) -> Result<ServiceHealth, MidplaneError> {
        let svc = self
            .services
            .get(name)
            .ok_or_else(|| MidplaneError::UnknownService { name: name.to_string() })?;

        let stats = svc.retry.stats().await;
        let success_rate = if stats.total_operations == 0 {
            100.0
        } else {
            stats.success_rate() * 100.0
        };

        let slot_metrics = svc.pool.metrics_by_slot().await;
        let avg_response_ms = if slot_metrics.is_empty() {
            0.0
        } else {
            slot_metrics.values().map(|m| m.average_response_time_ms).sum::<f64>() / slot_metrics.len() as f64
        };
        let responsiveness = (100.0 - avg_response_ms * 10.0).max(0.0);

        let pool_health = if slot_metrics.is_empty() {
            100.0
        } else {
            slot_metrics.values().map(|m| m.uptime_pct).sum::<f64>() / slot_metrics.len() as f64
        };

        let breaker_score = if svc.breaker.state().await == CircuitState::Open { 0.0 } else { 100.0 };

        let score = success_rate * 0.4 + responsiveness * 0.2 + pool_health * 0.2 + breaker_score * 0.2;

        Ok(ServiceHealth {
            name: name.to_string(),
            health_score: score,
            status: ServiceStatus::from_score(score),
        })
    }

    pub async fn stats(&self, name: &str) -> Result<crate::infrastructure::core::retry::RetryStats, MidplaneError> {
        let svc = self
            .services
            .get(name)
            .ok_or_else(|| MidplaneError::UnknownService { name: name.to_string() })?;
        Ok(svc.retry.stats().await)
    }

    pub async fn circuit_snapshot(
        &self,
        name: &str,
    ) -> Result<crate::infrastructure::core::circuit_breaker::CircuitBreakerSnapshot, MidplaneError> {
        let svc = self
            .services
            .get(name)
            .ok_or_else(|| MidplaneError::UnknownService { name: name.to_string() })?;
        Ok(svc.breaker.snapshot().await)
    }
}

pub type SharedServiceRuntime = Arc<ServiceRuntime>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runtime_with_one(name: &str, config: ServiceConfig) -> ServiceRuntime {
        let mut runtime = ServiceRuntime::empty(Arc::new(SystemClock));
        runtime.register(name, config);
        runtime
    }

    #[tokio::test]
    async fn execute_succeeds_through_full_stack() {
        let runtime = runtime_with_one("broker", ServiceConfig::default());
        let result = runtime
            .execute("broker", "place_order", || async { Ok::<_, MidplaneError>(1) })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn execute_retries_transient_faults() {
        let mut config = ServiceConfig::default();
        config.retry.base_delay = Duration::from_millis(1);
        config.retry.max_delay = Duration::from_millis(5);
        let runtime = runtime_with_one("broker", config);
        let calls = AtomicU32::new(0);
        let result = runtime
            .execute("broker", "place_order", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(MidplaneError::Timeout { duration_ms: 5 })
                } else {
                    Ok::<_, MidplaneError>(9)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn unknown_service_name_is_argument_error() {
        let runtime = ServiceRuntime::empty(Arc::new(SystemClock));
        let result = runtime.execute("nonexistent", "op", || async { Ok::<_, MidplaneError>(1) }).await;
        assert!(matches!(result, Err(MidplaneError::UnknownService { .. })));
    }

    #[tokio::test]
    async fn defaults_registers_six_standing_services() {
        let runtime = ServiceRuntime::with_defaults(Arc::new(SystemClock));
        let mut names = runtime.service_names();
        names.sort();
        assert_eq!(
            names,
            vec![
                "data_persistence",
                "historical_data",
                "market_data",
                "ml_risk_management",
                "ml_signal_execution",
                "order_management",
            ]
        );
    }

    #[tokio::test]
    async fn health_score_is_high_for_untouched_service() {
        let runtime = runtime_with_one("broker", ServiceConfig::default());
        let health = runtime.health_score("broker").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Operational);
    }

    #[tokio::test]
    async fn health_score_drops_after_repeated_failures() {
        let mut config = ServiceConfig::default();
        config.retry.max_attempts = 1;
        let runtime = runtime_with_one("broker", config);
        for _ in 0..5 {
            let _ = runtime
                .execute("broker", "op", || async {
                    Err::<(), _>(MidplaneError::OrderRejected {
                        order_id: "o1".into(),
                        reason: "bad".into(),
                    })
                })
                .await;
        }
        let health = runtime.health_score("broker").await.unwrap();
        assert!(health.health_score < 90.0);
    }
}
