use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::{Data, Distribution};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::metrics::{
    Alert, AlertSeverity, DashboardSnapshot, MetricPoint, MetricType, ModelPerformanceReport,
    RiskDashboard, RiskStatus, RollingHourSummary, SystemStatus,
};

const RING_CAPACITY: usize = 10_000;
const ALERT_CAPACITY: usize = 1_000;
const ANOMALY_WINDOW: usize = 20;
const ANOMALY_Z_THRESHOLD: f64 = 2.5;
const STALE_DATA_THRESHOLD: ChronoDuration = ChronoDuration::minutes(10);
const DASHBOARD_LOOP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    pub latency_threshold_ms: f64,
    pub execution_quality_threshold: f64,
    pub min_accuracy_threshold: f64,
    pub max_drawdown_threshold: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            latency_threshold_ms: 500.0,
            execution_quality_threshold: 70.0,
            min_accuracy_threshold: 0.6,
            max_drawdown_threshold: 0.1,
        }
    }
}

type TimestampedRing = RwLock<VecDeque<(DateTime<Utc>, f64)>>;

/// Ring-buffered rolling metrics plus threshold-triggered alerts.
/// Sharpe/drawdown/profit-factor calculations are driven off an
/// equity curve built from recorded trade P&Ls. Every sample is
/// timestamped so the rolling-hour summary and stale-data check can
/// be derived from the same storage as the anomaly detector.
pub struct PerformanceMonitor {
    clock: Arc<dyn Clock>,
    thresholds: MonitorThresholds,
    latencies: TimestampedRing,
    trade_pnls: RwLock<VecDeque<(DateTime<Utc>, Decimal)>>,
    confidences: TimestampedRing,
    execution_scores: TimestampedRing,
    slippage_bps: TimestampedRing,
    alerts: RwLock<VecDeque<Alert>>,
    last_metric_at: RwLock<Option<DateTime<Utc>>>,
    starting_equity: Decimal,
    shutdown: Arc<AtomicBool>,
}

impl PerformanceMonitor {
    pub fn new(clock: Arc<dyn Clock>, thresholds: MonitorThresholds, starting_equity: Decimal) -> Self {
        Self {
            clock,
            thresholds,
            latencies: RwLock::new(VecDeque::new()),
            trade_pnls: RwLock::new(VecDeque::new()),
            confidences: RwLock::new(VecDeque::new()),
            execution_scores: RwLock::new(VecDeque::new()),
            slippage_bps: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(VecDeque::new()),
            last_metric_at: RwLock::new(None),
            starting_equity,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn push_bounded<T>(ring: &RwLock<VecDeque<T>>, value: T) {
        let mut ring = ring.write().await;
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(value);
    }

    async fn touch(&self) {
        *self.last_metric_at.write().await = Some(self.clock.now_utc());
    }

    pub async fn record_latency(&self, signal_id: &str, latency_ms: f64) {
        let now = self.clock.now_utc();
        Self::push_bounded(&self.latencies, (now, latency_ms)).await;
        self.touch().await;
        if latency_ms > self.thresholds.latency_threshold_ms {
            self.raise_alert(
                AlertSeverity::Warning,
                MetricType::Latency,
                "High execution latency",
                format!("latency {latency_ms:.0}ms exceeds threshold {:.0}ms", self.thresholds.latency_threshold_ms),
                Some(signal_id.to_string()),
            )
            .await;
        }
    }

    pub async fn record_trade_pnl(&self, pnl: Decimal) {
        let now = self.clock.now_utc();
        Self::push_bounded(&self.trade_pnls, (now, pnl)).await;
        self.touch().await;
    }

    pub async fn record_confidence(&self, confidence: f64) {
        let now = self.clock.now_utc();
        Self::push_bounded(&self.confidences, (now, confidence)).await;
        self.touch().await;
    }

    pub async fn record_execution_score(&self, score: f64) {
        let now = self.clock.now_utc();
        Self::push_bounded(&self.execution_scores, (now, score)).await;
        self.touch().await;
    }

    pub async fn record_slippage_bps(&self, bps: f64) {
        let now = self.clock.now_utc();
        Self::push_bounded(&self.slippage_bps, (now, bps)).await;
        self.touch().await;
    }

    async fn raise_alert(
        &self,
        severity: AlertSeverity,
        metric_type: MetricType,
        title: &str,
        message: String,
        signal_id: Option<String>,
    ) {
        let alert = Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            severity,
            metric_type,
            title: title.to_string(),
            message,
            strategy_name: None,
            signal_id,
            raised_at: self.clock.now_utc(),
            acknowledged: false,
        };
        warn!(title = %alert.title, message = %alert.message, "performance alert raised");
        let mut alerts = self.alerts.write().await;
        if alerts.len() >= ALERT_CAPACITY {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.iter().cloned().collect()
    }

    fn equity_curve(trade_pnls: &VecDeque<(DateTime<Utc>, Decimal)>, starting_equity: Decimal) -> Vec<Decimal> {
        let mut curve = vec![starting_equity];
        let mut equity = starting_equity;
        for (_, pnl) in trade_pnls {
            equity += *pnl;
            curve.push(equity);
        }
        curve
    }

    fn max_drawdown_pct(curve: &[Decimal]) -> f64 {
        let mut peak = Decimal::ZERO;
        let mut worst = 0.0;
        for &equity in curve {
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = ((equity - peak) / peak).to_f64().unwrap_or(0.0) * 100.0;
                if dd < worst {
                    worst = dd;
                }
            }
        }
        worst
    }

    fn sharpe_ratio(curve: &[Decimal]) -> f64 {
        let returns: Vec<f64> = curve
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].to_f64()?;
                let curr = w[1].to_f64()?;
                if prev > 0.0 {
                    Some((curr - prev) / prev)
                } else {
                    None
                }
            })
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }
        // f64 boundary for the statistical library.
        let data = Data::new(returns);
        let (Some(mean), Some(std_dev)) = (data.mean(), data.std_dev()) else {
            return 0.0;
        };
        if std_dev > 0.0 {
            mean * (252.0_f64).sqrt() / std_dev
        } else {
            0.0
        }
    }

    fn var_95(trade_pnls: &VecDeque<(DateTime<Utc>, Decimal)>) -> f64 {
        if trade_pnls.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f64> = trade_pnls.iter().filter_map(|(_, p)| p.to_f64()).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((values.len() as f64) * 0.05).floor() as usize;
        values.get(idx).copied().unwrap_or(0.0)
    }

    fn average(ring: &VecDeque<(DateTime<Utc>, f64)>) -> f64 {
        if ring.is_empty() {
            0.0
        } else {
            ring.iter().map(|(_, v)| v).sum::<f64>() / ring.len() as f64
        }
    }

    /// Builds the model performance summary: execution funnel, P&L and
    /// risk-adjusted stats, and execution quality.
    pub async fn model_performance_report(&self, model_version: &str, total_signals: u32, signals_executed: u32) -> ModelPerformanceReport {
        let trade_pnls = self.trade_pnls.read().await.clone();
        let confidences = self.confidences.read().await.clone();
        let execution_scores = self.execution_scores.read().await.clone();
        let slippage_bps = self.slippage_bps.read().await.clone();

        let curve = Self::equity_curve(&trade_pnls, self.starting_equity);
        let total_pnl: Decimal = trade_pnls.iter().map(|(_, p)| *p).sum();
        let wins: Vec<Decimal> = trade_pnls.iter().map(|(_, p)| *p).filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = trade_pnls.iter().map(|(_, p)| *p).filter(|p| *p < Decimal::ZERO).collect();

        let win_rate = if trade_pnls.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trade_pnls.len() as f64
        };
        let avg_win = if wins.is_empty() { Decimal::ZERO } else { wins.iter().sum::<Decimal>() / Decimal::from(wins.len() as u64) };
        let avg_loss = if losses.is_empty() { Decimal::ZERO } else { losses.iter().sum::<Decimal>() / Decimal::from(losses.len() as u64) };
        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum();
        let profit_factor = if gross_loss < Decimal::ZERO {
            gross_profit.to_f64().unwrap_or(0.0) / gross_loss.abs().to_f64().unwrap_or(1.0)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let latencies = self.latencies.read().await.clone();
        let avg_latency_ms = Self::average(&latencies);
        let avg_confidence = Self::average(&confidences);

        ModelPerformanceReport {
            model_version: model_version.to_string(),
            total_signals,
            signals_executed,
            execution_rate: if total_signals == 0 { 0.0 } else { signals_executed as f64 / total_signals as f64 },
            accuracy_rate: win_rate,
            total_pnl,
            sharpe_ratio: Self::sharpe_ratio(&curve),
            max_drawdown_pct: Self::max_drawdown_pct(&curve),
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            avg_execution_score: Self::average(&execution_scores),
            avg_latency_ms,
            avg_slippage_bps: Self::average(&slippage_bps),
            var_95: Self::var_95(&trade_pnls),
            avg_confidence,
        }
    }

    pub async fn risk_dashboard(&self, active_signals: u32, signals_today: u32, daily_pnl: Decimal, daily_loss_limit: Decimal) -> RiskDashboard {
        let alerts = self.alerts.read().await;
        let recent_breaches = alerts
            .iter()
            .filter(|a| a.metric_type == MetricType::RiskMetric && (self.clock.now_utc() - a.raised_at).num_hours() < 24)
            .count() as u32;

        let utilization = if daily_loss_limit.is_zero() {
            0.0
        } else {
            (-daily_pnl / daily_loss_limit).to_f64().unwrap_or(0.0).clamp(0.0, 10.0)
        };

        RiskDashboard {
            active_signals,
            signals_today,
            daily_pnl,
            daily_loss_limit,
            risk_limit_utilization: utilization,
            recent_breaches_24h: recent_breaches,
            risk_status: RiskStatus::from_breach_count(recent_breaches),
        }
    }

    /// Raises a z-score anomaly alert when the latest latency sample is
    /// more than 2.5 standard deviations from the mean of the last
    /// [`ANOMALY_WINDOW`] samples.
    pub async fn check_latency_anomaly(&self, latest_ms: f64) -> Option<MetricPoint> {
        let latencies = self.latencies.read().await;
        if latencies.len() < 10 {
            return None;
        }
        let window: Vec<f64> = latencies
            .iter()
            .rev()
            .take(ANOMALY_WINDOW)
            .map(|(_, v)| *v)
            .collect();
        let data = Data::new(window);
        let mean = data.mean()?;
        let std_dev = data.std_dev()?;
        if std_dev <= 0.0 {
            return None;
        }
        let z = (latest_ms - mean) / std_dev;
        if z.abs() > ANOMALY_Z_THRESHOLD {
            Some(MetricPoint {
                metric_type: MetricType::Latency,
                value: z,
                recorded_at: self.clock.now_utc(),
            })
        } else {
            None
        }
    }

    /// Raises (and returns) a stale-data alert when no metric has been
    /// recorded in the last 10 minutes. Returns `None` when data is fresh
    /// or nothing has ever been recorded.
    pub async fn check_stale_data(&self) -> Option<Alert> {
        let last = (*self.last_metric_at.read().await)?;
        if self.clock.now_utc() - last <= STALE_DATA_THRESHOLD {
            return None;
        }
        self.raise_alert(
            AlertSeverity::Error,
            MetricType::ExecutionQuality,
            "Stale performance data",
            format!("no metric recorded since {last}"),
            None,
        )
        .await;
        self.alerts.read().await.back().cloned()
    }

    pub async fn system_status(&self) -> SystemStatus {
        let alerts: Vec<Alert> = self.alerts.read().await.iter().cloned().collect();
        SystemStatus::from_alerts(&alerts)
    }

    pub async fn rolling_hour_summary(&self) -> RollingHourSummary {
        let now = self.clock.now_utc();
        let cutoff = now - ChronoDuration::hours(1);

        let latencies = self.latencies.read().await;
        let confidences = self.confidences.read().await;
        let execution_scores = self.execution_scores.read().await;
        let slippage_bps = self.slippage_bps.read().await;
        let trade_pnls = self.trade_pnls.read().await;

        let within_hour = |ts: &DateTime<Utc>| *ts >= cutoff;

        let recent_latency: Vec<f64> = latencies.iter().filter(|(t, _)| within_hour(t)).map(|(_, v)| *v).collect();
        let recent_confidence: Vec<f64> = confidences.iter().filter(|(t, _)| within_hour(t)).map(|(_, v)| *v).collect();
        let recent_scores: Vec<f64> = execution_scores.iter().filter(|(t, _)| within_hour(t)).map(|(_, v)| *v).collect();
        let recent_slippage: Vec<f64> = slippage_bps.iter().filter(|(t, _)| within_hour(t)).map(|(_, v)| *v).collect();
        let recent_pnl: Vec<Decimal> = trade_pnls.iter().filter(|(t, _)| within_hour(t)).map(|(_, p)| *p).collect();

        let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };

        RollingHourSummary {
            avg_latency_ms: mean(&recent_latency),
            avg_confidence: mean(&recent_confidence),
            avg_execution_score: mean(&recent_scores),
            avg_slippage_bps: mean(&recent_slippage),
            trade_count: recent_pnl.len() as u32,
            total_pnl: recent_pnl.iter().sum(),
        }
    }

    pub async fn dashboard_snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            system_status: self.system_status().await,
            generated_at: self.clock.now_utc(),
            rolling_hour: self.rolling_hour_summary().await,
        }
    }

    /// Spawns the 30s dashboard loop: snapshots rolling state, checks for
    /// stale data, and logs both. Runs until [`Self::shutdown`] is called.
    /// The monitor must be held behind an `Arc` so the loop can outlive the
    /// caller.
    pub fn spawn_dashboard_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DASHBOARD_LOOP_INTERVAL);
            loop {
                ticker.tick().await;
                if monitor.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let snapshot = monitor.dashboard_snapshot().await;
                info!(status = ?snapshot.system_status, trades = snapshot.rolling_hour.trade_count, "dashboard snapshot");
                monitor.check_stale_data().await;
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::clock::SystemClock;
    use rust_decimal_macros::dec;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(Arc::new(SystemClock), MonitorThresholds::default(), dec!(10000))
    }

    #[tokio::test]
    async fn latency_over_threshold_raises_alert() {
        let m = monitor();
        m.record_latency("sig-1", 800.0).await;
        assert_eq!(m.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn latency_under_threshold_does_not_alert() {
        let m = monitor();
        m.record_latency("sig-1", 50.0).await;
        assert_eq!(m.alerts().await.len(), 0);
    }

    #[tokio::test]
    async fn model_performance_report_computes_win_rate() {
        let m = monitor();
        m.record_trade_pnl(dec!(100)).await;
        m.record_trade_pnl(dec!(-50)).await;
        m.record_trade_pnl(dec!(200)).await;
        let report = m.model_performance_report("v1", 10, 3).await;
        assert!((report.win_rate - 0.6667).abs() < 0.01);
        assert_eq!(report.total_pnl, dec!(250));
    }

    #[tokio::test]
    async fn model_performance_report_includes_execution_score_and_slippage() {
        let m = monitor();
        m.record_execution_score(95.0).await;
        m.record_execution_score(85.0).await;
        m.record_slippage_bps(2.0).await;
        let report = m.model_performance_report("v1", 1, 1).await;
        assert!((report.avg_execution_score - 90.0).abs() < 0.01);
        assert!((report.avg_slippage_bps - 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn risk_dashboard_escalates_with_breaches() {
        let m = monitor();
        let dashboard = m.risk_dashboard(2, 5, dec!(-100), dec!(500)).await;
        assert_eq!(dashboard.risk_status, RiskStatus::Healthy);
        assert!((dashboard.risk_limit_utilization - 0.2).abs() < 0.01);
    }

    #[tokio::test]
    async fn latency_anomaly_uses_only_last_twenty_points() {
        let m = monitor();
        for _ in 0..30 {
            m.record_latency("sig-1", 100.0).await;
        }
        let anomaly = m.check_latency_anomaly(100.0).await;
        assert!(anomaly.is_none());

        let spike = m.check_latency_anomaly(10_000.0).await;
        assert!(spike.is_some());
    }

    #[tokio::test]
    async fn stale_data_check_fires_past_ten_minutes() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let m = PerformanceMonitor::new(clock.clone(), MonitorThresholds::default(), dec!(10000));
        m.record_latency("sig-1", 10.0).await;
        assert!(m.check_stale_data().await.is_none());

        clock.advance(11 * 60 * 1000);
        let alert = m.check_stale_data().await;
        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn stale_data_check_is_silent_before_any_metric() {
        let m = monitor();
        assert!(m.check_stale_data().await.is_none());
    }

    #[tokio::test]
    async fn rolling_hour_summary_excludes_old_samples() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let m = PerformanceMonitor::new(clock.clone(), MonitorThresholds::default(), dec!(10000));
        m.record_trade_pnl(dec!(100)).await;
        clock.advance(90 * 60 * 1000);
        m.record_trade_pnl(dec!(50)).await;

        let summary = m.rolling_hour_summary().await;
        assert_eq!(summary.trade_count, 1);
        assert_eq!(summary.total_pnl, dec!(50));
    }
}
