use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::domain::errors::MidplaneError;
use crate::domain::risk::RiskLimits;
use crate::domain::signal::Signal;

const MAX_SIGNAL_AGE: ChronoDuration = ChronoDuration::seconds(300);
const RATE_LIMIT_WINDOW: ChronoDuration = ChronoDuration::hours(1);

/// Stable tag vocabulary for rejected signals. Callers match on these
/// instead of parsing free-form reason strings.
pub const TAG_CONFIDENCE_BELOW_THRESHOLD: &str = "confidence_below_threshold";
pub const TAG_RATE_LIMITED: &str = "rate_limited";
pub const TAG_SIGNAL_STALE: &str = "signal_stale";
pub const TAG_DAILY_LIMIT_EXCEEDED: &str = "daily_limit_exceeded";
pub const TAG_MODEL_PERFORMANCE_LOW: &str = "model_performance_low";
pub const TAG_ZERO_TARGET_QUANTITY: &str = "zero_target_quantity";

fn rejected(tag: &str) -> MidplaneError {
    MidplaneError::SignalRejected { reason: tag.to_string() }
}

/// Gate between signal receipt and execution: confidence threshold, signal
/// age, per-hour rate limit, concurrent-signal cap, daily trade/loss
/// budgets, and cached model performance. Mirrors `_validate_signal` + the
/// rate-limiting half of `MLRiskManager.validate_signal`.
pub struct SignalValidator {
    limits: RiskLimits,
    clock: Arc<dyn Clock>,
    signal_history: RwLock<VecDeque<DateTime<Utc>>>,
    concurrent_signals: RwLock<u32>,
    daily_pnl: RwLock<Decimal>,
    daily_trade_count: RwLock<u32>,
    daily_counters_date: RwLock<NaiveDate>,
    model_performance: RwLock<f64>,
}

impl SignalValidator {
    pub fn new(limits: RiskLimits, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now_utc().date_naive();
        Self {
            limits,
            clock,
            signal_history: RwLock::new(VecDeque::new()),
            concurrent_signals: RwLock::new(0),
            daily_pnl: RwLock::new(Decimal::ZERO),
            daily_trade_count: RwLock::new(0),
            daily_counters_date: RwLock::new(today),
            model_performance: RwLock::new(1.0),
        }
    }

    async fn reset_daily_counters_if_new_day(&self) {
        let now = self.clock.now_utc().date_naive();
        let mut date = self.daily_counters_date.write().await;
        if *date != now {
            *date = now;
            *self.daily_pnl.write().await = Decimal::ZERO;
            *self.daily_trade_count.write().await = 0;
        }
    }

    pub async fn record_realized_pnl(&self, delta: Decimal) {
        self.reset_daily_counters_if_new_day().await;
        *self.daily_pnl.write().await += delta;
    }

    pub async fn record_trade_admitted(&self) {
        self.reset_daily_counters_if_new_day().await;
        *self.daily_trade_count.write().await += 1;
    }

    /// Updates the cached model performance score consulted by the
    /// `model_performance_low` gate. Typically fed from
    /// [`crate::application::performance_monitor::PerformanceMonitor`].
    pub async fn set_model_performance(&self, score: f64) {
        *self.model_performance.write().await = score;
    }

    pub async fn mark_executing(&self) {
        *self.concurrent_signals.write().await += 1;
    }

    pub async fn mark_done(&self) {
        let mut count = self.concurrent_signals.write().await;
        *count = count.saturating_sub(1);
    }

    /// Validates `signal` against every gate, admitting it into the
    /// signal-history window and daily trade counter on success. Returns
    /// the [`MidplaneError`] for the first gate that fails, carrying one of
    /// the stable `TAG_*` reasons.
    pub async fn validate(&self, signal: &Signal) -> Result<(), MidplaneError> {
        self.reset_daily_counters_if_new_day().await;

        if signal.side.requires_quantity() && signal.quantity <= Decimal::ZERO {
            return Err(rejected(TAG_ZERO_TARGET_QUANTITY));
        }

        let age = signal.age(self.clock.now_utc());
        if age > MAX_SIGNAL_AGE {
            return Err(rejected(TAG_SIGNAL_STALE));
        }

        if signal.confidence < self.limits.min_confidence_threshold {
            return Err(rejected(TAG_CONFIDENCE_BELOW_THRESHOLD));
        }

        if *self.model_performance.read().await < self.limits.min_model_performance_score {
            return Err(rejected(TAG_MODEL_PERFORMANCE_LOW));
        }

        {
            let mut history = self.signal_history.write().await;
            let now = self.clock.now_utc();
            while let Some(front) = history.front() {
                if now - *front > RATE_LIMIT_WINDOW {
                    history.pop_front();
                } else {
                    break;
                }
            }
            if history.len() as u32 >= self.limits.max_signals_per_hour {
                return Err(rejected(TAG_RATE_LIMITED));
            }
            history.push_back(now);
        }

        let concurrent = *self.concurrent_signals.read().await;
        if concurrent >= self.limits.max_concurrent_signals {
            return Err(rejected(TAG_RATE_LIMITED));
        }

        let daily_trades = *self.daily_trade_count.read().await;
        if daily_trades >= self.limits.max_daily_trades {
            return Err(rejected(TAG_DAILY_LIMIT_EXCEEDED));
        }

        let daily_pnl = *self.daily_pnl.read().await;
        if -daily_pnl > self.limits.max_daily_loss {
            return Err(MidplaneError::RiskLimitBreached {
                limit: "max_daily_loss".into(),
                current: (-daily_pnl).to_string(),
                max: self.limits.max_daily_loss.to_string(),
            });
        }

        self.record_trade_admitted().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size: dec!(10000),
            max_portfolio_exposure: 0.8,
            max_sector_exposure: 0.3,
            max_single_stock_weight: 0.1,
            min_confidence_threshold: 0.6,
            max_signals_per_hour: 2,
            max_concurrent_signals: 2,
            max_daily_trades: 3,
            min_model_performance_score: 0.5,
            max_daily_loss: dec!(500),
            max_position_loss: dec!(200),
            stop_loss_threshold: 0.05,
            max_correlation_exposure: 0.6,
            max_strategy_allocation: 0.4,
        }
    }

    fn signal(clock: &FixedClock, confidence: f64) -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            instrument: "AAPL".into(),
            side: crate::domain::signal::Side::Buy,
            quantity: dec!(10),
            confidence,
            urgency: crate::domain::signal::Urgency::Normal,
            model_version: "v1".into(),
            strategy_name: "momentum".into(),
            predicted_price: None,
            emitted_at: clock.now_utc(),
            max_exec: std::time::Duration::from_secs(60),
        }
    }

    fn reason_of(err: &MidplaneError) -> &str {
        match err {
            MidplaneError::SignalRejected { reason } => reason,
            _ => panic!("expected SignalRejected, got {err:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_low_confidence() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        let sig = signal(&clock, 0.1);
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_CONFIDENCE_BELOW_THRESHOLD);
    }

    #[tokio::test]
    async fn rejects_stale_signal() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        let mut sig = signal(&clock, 0.9);
        sig.emitted_at = clock.now_utc() - ChronoDuration::seconds(301);
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_SIGNAL_STALE);
    }

    #[tokio::test]
    async fn enforces_hourly_rate_limit() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        let sig = signal(&clock, 0.9);
        validator.validate(&sig).await.unwrap();
        validator.validate(&sig).await.unwrap();
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_RATE_LIMITED);
    }

    #[tokio::test]
    async fn rejects_when_daily_loss_limit_breached() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        validator.record_realized_pnl(dec!(-600)).await;
        let sig = signal(&clock, 0.9);
        let err = validator.validate(&sig).await.unwrap_err();
        assert!(matches!(err, MidplaneError::RiskLimitBreached { .. }));
    }

    #[tokio::test]
    async fn rejects_zero_quantity_buy_signal() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        let mut sig = signal(&clock, 0.9);
        sig.quantity = Decimal::ZERO;
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_ZERO_TARGET_QUANTITY);
    }

    #[tokio::test]
    async fn rejects_when_model_performance_below_threshold() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let validator = SignalValidator::new(limits(), clock.clone());
        validator.set_model_performance(0.1).await;
        let sig = signal(&clock, 0.9);
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_MODEL_PERFORMANCE_LOW);
    }

    #[tokio::test]
    async fn enforces_daily_trade_counter_independent_of_pnl() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut lim = limits();
        lim.max_signals_per_hour = 100;
        lim.max_daily_trades = 2;
        let validator = SignalValidator::new(lim, clock.clone());
        let sig = signal(&clock, 0.9);
        validator.validate(&sig).await.unwrap();
        validator.validate(&sig).await.unwrap();
        let err = validator.validate(&sig).await.unwrap_err();
        assert_eq!(reason_of(&err), TAG_DAILY_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn daily_trade_counter_resets_on_calendar_day_change() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut lim = limits();
        lim.max_signals_per_hour = 100;
        lim.max_daily_trades = 1;
        let validator = SignalValidator::new(lim, clock.clone());
        let sig = signal(&clock, 0.9);
        validator.validate(&sig).await.unwrap();
        assert!(validator.validate(&sig).await.is_err());
        clock.advance(24 * 60 * 60 * 1000);
        let sig2 = signal(&clock, 0.9);
        validator.validate(&sig2).await.unwrap();
    }
}
