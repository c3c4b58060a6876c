use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::errors::MidplaneError;

/// Who's asking for a connection. `Critical` requesters may advisorily
/// preempt a long-running `Normal`/`Low` holder (logged, never forced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub connection_timeout: Duration,
    pub acquire_poll_interval: Duration,
    pub health_check_interval: Duration,
    pub critical_preemption_threshold: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            connection_timeout: Duration::from_secs(30),
            acquire_poll_interval: Duration::from_millis(100),
            health_check_interval: Duration::from_secs(30),
            critical_preemption_threshold: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub uptime_pct: f64,
}

struct Slot {
    id: usize,
    busy: bool,
    acquired_at: Option<Instant>,
    metrics: ConnectionMetrics,
}

/// A bounded pool of logical broker connections, acquired by priority and
/// health-checked on a timer. Connections aren't real sockets here — the
/// pool tracks slot occupancy and health so the service runtime can bound
/// concurrent broker calls; the actual broker client lives behind
/// [`crate::infrastructure::broker_port::BrokerPort`].
pub struct ConnectionPool {
    slots: Arc<RwLock<Vec<Slot>>>,
    clock: Arc<dyn Clock>,
    config: ConnectionPoolConfig,
    acquire_lock: Mutex<()>,
    shutdown: Arc<AtomicBool>,
}

pub struct ConnectionLease<'a> {
    pool: &'a ConnectionPool,
    slot_id: usize,
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        let pool = self.pool;
        let slot_id = self.slot_id;
        tokio::spawn(async move {
            pool.return_connection(slot_id, false).await;
        });
    }
}

impl ConnectionPool {
    pub fn new(clock: Arc<dyn Clock>, config: ConnectionPoolConfig) -> Self {
        let slots = (0..config.min_connections)
            .map(|id| Slot {
                id,
                busy: false,
                acquired_at: None,
                metrics: ConnectionMetrics::default(),
            })
            .collect();
        Self {
            slots: Arc::new(RwLock::new(slots)),
            clock,
            config,
            acquire_lock: Mutex::new(()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquires a slot, growing the pool up to `max_connections` if none is
    /// idle, and advisorily logging when a `Critical` request finds every
    /// slot busy past `critical_preemption_threshold` (never force-evicts).
    pub async fn acquire(&self, priority: ConnectionPriority) -> Result<ConnectionLease<'_>, MidplaneError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(MidplaneError::PoolExhausted {
                capacity: self.config.max_connections,
            });
        }
        let deadline = self.clock.monotonic_now() + self.config.connection_timeout;
        loop {
            {
                let _guard = self.acquire_lock.lock().await;
                let mut slots = self.slots.write().await;

                if let Some(slot) = slots.iter_mut().find(|s| !s.busy) {
                    slot.busy = true;
                    slot.acquired_at = Some(self.clock.monotonic_now());
                    let id = slot.id;
                    return Ok(ConnectionLease { pool: self, slot_id: id });
                }

                if slots.len() < self.config.max_connections {
                    let id = slots.len();
                    slots.push(Slot {
                        id,
                        busy: true,
                        acquired_at: Some(self.clock.monotonic_now()),
                        metrics: ConnectionMetrics::default(),
                    });
                    return Ok(ConnectionLease { pool: self, slot_id: id });
                }

                if priority == ConnectionPriority::Critical {
                    self.warn_on_longest_running(&slots);
                }
            }

            if self.clock.monotonic_now() >= deadline {
                return Err(MidplaneError::PoolExhausted {
                    capacity: self.config.max_connections,
                });
            }
            tokio::time::sleep(self.config.acquire_poll_interval).await;
        }
    }

    fn warn_on_longest_running(&self, slots: &[Slot]) {
        let now = self.clock.monotonic_now();
        if let Some(longest) = slots
            .iter()
            .filter_map(|s| s.acquired_at.map(|t| (s.id, now.saturating_duration_since(t))))
            .max_by_key(|(_, elapsed)| *elapsed)
        {
            if longest.1 > self.config.critical_preemption_threshold {
                warn!(
                    "ConnectionPool: critical request waiting, slot {} busy for {:?} (advisory only, not preempting)",
                    longest.0, longest.1
                );
            }
        }
    }

    async fn return_connection(&self, slot_id: usize, had_error: bool) {
        let mut slots = self.slots.write().await;
        let now = self.clock.monotonic_now();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            let elapsed = slot.acquired_at.take().map(|t| now.saturating_duration_since(t));
            slot.busy = false;

            let m = &mut slot.metrics;
            m.total_requests += 1;
            if had_error {
                m.failed_requests += 1;
                m.consecutive_failures += 1;
            } else {
                m.successful_requests += 1;
                m.consecutive_failures = 0;
            }
            if let Some(elapsed) = elapsed {
                let sample_ms = elapsed.as_secs_f64() * 1000.0;
                m.average_response_time_ms = if m.total_requests <= 1 {
                    sample_ms
                } else {
                    m.average_response_time_ms * 0.9 + sample_ms * 0.1
                };
            }
            m.uptime_pct = if m.total_requests == 0 {
                100.0
            } else {
                (m.successful_requests as f64 / m.total_requests as f64) * 100.0
            };
        }
    }

    /// Evicts chronically unhealthy slots (3+ consecutive failures or
    /// uptime below 80%) then tops the pool back up to `min_connections`.
    pub async fn run_health_check(&self) {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|s| !s.busy && (s.metrics.consecutive_failures < 3 && s.metrics.uptime_pct >= 80.0) || s.busy || s.metrics.total_requests == 0);
        let evicted = before - slots.len();
        if evicted > 0 {
            info!("ConnectionPool: health check evicted {evicted} unhealthy slot(s)");
        }
        while slots.len() < self.config.min_connections {
            let id = slots.len();
            slots.push(Slot {
                id,
                busy: false,
                acquired_at: None,
                metrics: ConnectionMetrics::default(),
            });
        }
    }

    /// Spawns the background health loop on `health_check_interval`, running
    /// [`Self::run_health_check`] until [`Self::shutdown`] is called. The
    /// pool must be held behind an `Arc` so the loop can outlive the caller.
    pub fn spawn_health_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            loop {
                ticker.tick().await;
                if pool.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                pool.run_health_check().await;
            }
        })
    }

    /// Stops accepting new acquisitions and signals the health loop to exit
    /// on its next tick. Existing leases are unaffected.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub async fn metrics_by_slot(&self) -> HashMap<usize, ConnectionMetrics> {
        self.slots
            .read()
            .await
            .iter()
            .map(|s| (s.id, s.metrics.clone()))
            .collect()
    }

    pub async fn size(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn acquire_grows_pool_up_to_max() {
        let pool = ConnectionPool::new(
            Arc::new(SystemClock),
            ConnectionPoolConfig {
                max_connections: 2,
                min_connections: 0,
                ..Default::default()
            },
        );
        let a = pool.acquire(ConnectionPriority::Normal).await.unwrap();
        let b = pool.acquire(ConnectionPriority::Normal).await.unwrap();
        assert_eq!(pool.size().await, 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = ConnectionPool::new(
            Arc::new(SystemClock),
            ConnectionPoolConfig {
                max_connections: 1,
                min_connections: 0,
                connection_timeout: Duration::from_millis(50),
                acquire_poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let _held = pool.acquire(ConnectionPriority::Normal).await.unwrap();
        let result = pool.acquire(ConnectionPriority::Normal).await;
        assert!(matches!(result, Err(MidplaneError::PoolExhausted { .. })));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_acquisitions() {
        let pool = ConnectionPool::new(
            Arc::new(SystemClock),
            ConnectionPoolConfig {
                max_connections: 2,
                min_connections: 0,
                ..Default::default()
            },
        );
        pool.shutdown();
        let result = pool.acquire(ConnectionPriority::Normal).await;
        assert!(matches!(result, Err(MidplaneError::PoolExhausted { .. })));
    }

    #[tokio::test]
    async fn health_check_tops_up_to_min_connections() {
        let pool = ConnectionPool::new(
            Arc::new(SystemClock),
            ConnectionPoolConfig {
                max_connections: 5,
                min_connections: 2,
                ..Default::default()
            },
        );
        assert_eq!(pool.size().await, 2);
        pool.run_health_check().await;
        assert_eq!(pool.size().await, 2);
    }
}
