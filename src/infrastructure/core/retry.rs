use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{ErrorCategory, MidplaneError};

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    FixedDelay,
    LinearBackoff,
    ExponentialBackoff,
    JitteredExponential,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
    pub backoff_multiplier: f64,
    /// Error categories always retried, taking priority over `non_retryable_kinds`.
    pub retryable_kinds: HashSet<ErrorCategory>,
    /// Error categories never retried, regardless of `MidplaneError::is_retryable()`.
    pub non_retryable_kinds: HashSet<ErrorCategory>,
}

impl RetryConfig {
    fn default_retryable_kinds() -> HashSet<ErrorCategory> {
        [ErrorCategory::Connection].into_iter().collect()
    }

    fn default_non_retryable_kinds() -> HashSet<ErrorCategory> {
        [ErrorCategory::Validation, ErrorCategory::Configuration].into_iter().collect()
    }

    /// Tuned for broker connection faults: aggressive jittered backoff,
    /// capped at 30s.
    pub fn connection() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs_f64(1.0),
            max_delay: Duration::from_secs_f64(30.0),
            strategy: RetryStrategy::JitteredExponential,
            jitter: true,
            backoff_multiplier: 2.0,
            retryable_kinds: Self::default_retryable_kinds(),
            non_retryable_kinds: Self::default_non_retryable_kinds(),
        }
    }

    /// Tuned for rate-limit backoff: patient linear delay, up to 5 minutes.
    pub fn rate_limit() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs_f64(5.0),
            max_delay: Duration::from_secs_f64(300.0),
            strategy: RetryStrategy::LinearBackoff,
            jitter: true,
            backoff_multiplier: 2.0,
            retryable_kinds: Self::default_retryable_kinds(),
            non_retryable_kinds: Self::default_non_retryable_kinds(),
        }
    }

    /// Tuned for bulk data downloads: moderate exponential backoff, few
    /// attempts.
    pub fn data_download() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs_f64(2.0),
            max_delay: Duration::from_secs_f64(60.0),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
            backoff_multiplier: 3.0,
            retryable_kinds: Self::default_retryable_kinds(),
            non_retryable_kinds: Self::default_non_retryable_kinds(),
        }
    }

    /// Computes the delay before the given attempt (1-indexed), then
    /// clamps to `[100ms, max_delay]`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let mut delay = match self.strategy {
            RetryStrategy::FixedDelay => base,
            RetryStrategy::LinearBackoff => base * attempt as f64,
            RetryStrategy::ExponentialBackoff => base * self.backoff_multiplier.powi(attempt as i32 - 1),
            RetryStrategy::JitteredExponential => {
                let exp = base * self.backoff_multiplier.powi(attempt as i32 - 1);
                let jitter_frac = rand::rng().random_range(-0.25..=0.25);
                exp * (1.0 + jitter_frac)
            }
        };

        if self.jitter && self.strategy != RetryStrategy::JitteredExponential {
            let jitter_frac = rand::rng().random_range(-0.10..=0.10);
            delay *= 1.0 + jitter_frac;
        }

        delay = delay.clamp(0.1, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay)
    }

    /// Whether `err` should be retried under this config: `non_retryable_kinds`
    /// wins over `retryable_kinds`, which wins over `MidplaneError::is_retryable()`.
    fn retryable(&self, err: &MidplaneError) -> bool {
        let category = err.category();
        if self.non_retryable_kinds.contains(&category) {
            return false;
        }
        if self.retryable_kinds.contains(&category) {
            return true;
        }
        err.is_retryable()
    }
}

/// Per-failure-kind and per-attempt-count counters, matching `RetryStats`.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_attempts: u64,
    pub total_retry_time: Duration,
    pub retry_counts: HashMap<u32, u64>,
    pub failure_categories: HashMap<String, u64>,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }

    pub fn average_attempts(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.total_attempts as f64 / self.total_operations as f64
        }
    }
}

/// Optional overrides for a single `execute_with_retry` call: a predicate
/// that takes priority over the config's kind sets, and lifecycle hooks
/// fired on each retry, on final failure, and on eventual success.
#[derive(Default)]
pub struct RetryHooks<'a> {
    predicate: Option<Box<dyn Fn(&MidplaneError) -> bool + Send + Sync + 'a>>,
    on_retry: Option<Box<dyn Fn(u32, &MidplaneError) + Send + Sync + 'a>>,
    on_failure: Option<Box<dyn Fn(&MidplaneError) + Send + Sync + 'a>>,
    on_success: Option<Box<dyn Fn(u32) + Send + Sync + 'a>>,
}

impl<'a> RetryHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the config's retryable/non-retryable kind sets for this call.
    pub fn predicate(mut self, f: impl Fn(&MidplaneError) -> bool + Send + Sync + 'a) -> Self {
        self.predicate = Some(Box::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(u32, &MidplaneError) + Send + Sync + 'a) -> Self {
        self.on_retry = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl Fn(&MidplaneError) + Send + Sync + 'a) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(u32) + Send + Sync + 'a) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }
}

/// Drives an async operation through up to `max_attempts`, retrying only
/// faults classified as retryable by the config's kind sets (or a custom
/// predicate), sleeping according to `config`'s strategy between attempts.
pub struct RetryEngine {
    config: RetryConfig,
    stats: Arc<Mutex<RetryStats>>,
    name: String,
}

impl RetryEngine {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            config,
            stats: Arc::new(Mutex::new(RetryStats::default())),
            name: name.into(),
        }
    }

    pub async fn stats(&self) -> RetryStats {
        self.stats.lock().await.clone()
    }

    /// Executes `op` with the config's default retryability and no hooks.
    pub async fn execute_with_retry<F, Fut, T>(&self, op: F) -> Result<T, MidplaneError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MidplaneError>>,
    {
        self.execute_with_hooks(op, RetryHooks::new()).await
    }

    /// Executes `op`, consulting `hooks.predicate` instead of the config's
    /// kind sets when present, and firing `on_retry`/`on_failure`/`on_success`.
    pub async fn execute_with_hooks<F, Fut, T>(&self, mut op: F, hooks: RetryHooks<'_>) -> Result<T, MidplaneError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MidplaneError>>,
    {
        let mut attempt: u32 = 0;
        let start = std::time::Instant::now();
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    let mut stats = self.stats.lock().await;
                    stats.total_operations += 1;
                    stats.successful_operations += 1;
                    stats.total_attempts += attempt as u64;
                    *stats.retry_counts.entry(attempt).or_insert(0) += 1;
                    stats.total_retry_time += start.elapsed();
                    drop(stats);
                    if let Some(on_success) = &hooks.on_success {
                        on_success(attempt);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = match &hooks.predicate {
                        Some(pred) => pred(&err),
                        None => self.config.retryable(&err),
                    };
                    let exhausted = attempt >= self.config.max_attempts;

                    if !retryable || exhausted {
                        let mut stats = self.stats.lock().await;
                        stats.total_operations += 1;
                        stats.failed_operations += 1;
                        stats.total_attempts += attempt as u64;
                        *stats.failure_categories.entry(err.category().to_string()).or_insert(0) += 1;
                        stats.total_retry_time += start.elapsed();
                        drop(stats);
                        warn!(
                            "RetryEngine [{}]: giving up after {attempt} attempt(s): {err}",
                            self.name
                        );
                        if let Some(on_failure) = &hooks.on_failure {
                            on_failure(&err);
                        }
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    info!(
                        "RetryEngine [{}]: attempt {attempt} failed ({err}), retrying in {delay:?}",
                        self.name
                    );
                    if let Some(on_retry) = &hooks.on_retry {
                        on_retry(attempt, &err);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let engine = RetryEngine::new("t", RetryConfig::connection());
        let calls = AtomicU32::new(0);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_faults_until_success() {
        let mut config = RetryConfig::connection();
        config.base_delay = Duration::from_millis(1);
        config.max_delay = Duration::from_millis(5);
        let engine = RetryEngine::new("t", config);
        let calls = AtomicU32::new(0);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_retry(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(MidplaneError::ConnectionLost { reason: "x".into() })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_faults() {
        let engine = RetryEngine::new("t", RetryConfig::connection());
        let calls = AtomicU32::new(0);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MidplaneError::InvalidConfig { reason: "bad".into() })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_after_max_attempts_and_records_stats() {
        let mut config = RetryConfig::connection();
        config.max_attempts = 3;
        config.base_delay = Duration::from_millis(1);
        config.max_delay = Duration::from_millis(5);
        let engine = RetryEngine::new("t", config);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_retry(|| async { Err(MidplaneError::Timeout { duration_ms: 10 }) })
            .await;
        assert!(result.is_err());
        let stats = engine.stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.total_attempts, 3);
    }

    #[tokio::test]
    async fn custom_predicate_overrides_default_kind_sets() {
        let engine = RetryEngine::new("t", RetryConfig::connection());
        let calls = AtomicU32::new(0);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_hooks(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(MidplaneError::InvalidConfig { reason: "bad".into() })
                },
                RetryHooks::new().predicate(|_| true),
            )
            .await;
        assert!(result.is_err());
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn hooks_fire_on_retry_and_failure() {
        let mut config = RetryConfig::connection();
        config.max_attempts = 2;
        config.base_delay = Duration::from_millis(1);
        config.max_delay = Duration::from_millis(5);
        let engine = RetryEngine::new("t", config);
        let retries_seen = AtomicU32::new(0);
        let failures_seen = AtomicU32::new(0);
        let result: Result<u32, MidplaneError> = engine
            .execute_with_hooks(
                || async { Err(MidplaneError::Timeout { duration_ms: 1 }) },
                RetryHooks::new()
                    .on_retry(|_attempt, _err| {
                        retries_seen.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_failure(|_err| {
                        failures_seen.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(retries_seen.load(Ordering::SeqCst), 1);
        assert_eq!(failures_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fixed_delay_formula_matches_base() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs_f64(1.0),
            max_delay: Duration::from_secs_f64(60.0),
            strategy: RetryStrategy::FixedDelay,
            jitter: false,
            backoff_multiplier: 2.0,
            retryable_kinds: HashSet::new(),
            non_retryable_kinds: HashSet::new(),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs_f64(1.0));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs_f64(1.0));
    }

    #[test]
    fn exponential_formula_matches_multiplier_power() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs_f64(2.0),
            max_delay: Duration::from_secs_f64(60.0),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
            backoff_multiplier: 3.0,
            retryable_kinds: HashSet::new(),
            non_retryable_kinds: HashSet::new(),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs_f64(2.0));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs_f64(6.0));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs_f64(18.0));
    }

    #[test]
    fn non_retryable_kind_wins_over_retryable_kind() {
        let mut config = RetryConfig::connection();
        config.retryable_kinds.insert(ErrorCategory::Validation);
        config.non_retryable_kinds.insert(ErrorCategory::Validation);
        let err = MidplaneError::InvalidSignal {
            signal_id: "s1".into(),
            reason: "bad".into(),
        };
        assert!(!config.retryable(&err));
    }
}
