use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Latency,
    ExecutionQuality,
    ModelPerformance,
    RiskMetric,
    Pnl,
    SignalAccuracy,
}

/// A single sample fed into the performance monitor's rolling windows.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub metric_type: MetricType,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// An alert raised by the performance monitor when a rolling metric crosses
/// its configured threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub metric_type: MetricType,
    pub title: String,
    pub message: String,
    pub strategy_name: Option<String>,
    pub signal_id: Option<String>,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Snapshot of the risk subsystem, matching `get_risk_dashboard`'s field
/// list: active load, daily loss budget used, breach history, status bucket.
#[derive(Debug, Clone, Serialize)]
pub struct RiskDashboard {
    pub active_signals: u32,
    pub signals_today: u32,
    pub daily_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub risk_limit_utilization: f64,
    pub recent_breaches_24h: u32,
    pub risk_status: RiskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Healthy,
    Warning,
    Critical,
}

impl RiskStatus {
    pub fn from_breach_count(count: u32) -> Self {
        match count {
            0 => RiskStatus::Healthy,
            1..=3 => RiskStatus::Warning,
            _ => RiskStatus::Critical,
        }
    }
}

/// Model performance summary matching `ModelPerformanceReport`'s field set:
/// execution funnel, prediction accuracy, P&L/risk-adjusted stats, and
/// execution-quality averages.
#[derive(Debug, Clone, Serialize)]
pub struct ModelPerformanceReport {
    pub model_version: String,
    pub total_signals: u32,
    pub signals_executed: u32,
    pub execution_rate: f64,
    pub accuracy_rate: f64,
    pub total_pnl: Decimal,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,
    pub avg_execution_score: f64,
    pub avg_latency_ms: f64,
    pub avg_slippage_bps: f64,
    pub var_95: f64,
    pub avg_confidence: f64,
}

/// Coarse health bucket for the background dashboard loop: critical beats
/// error beats warning beats healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Error,
    Critical,
}

impl SystemStatus {
    /// Critical if any critical alert is present, error if any error alert,
    /// warning if more than 5 warnings, healthy otherwise.
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut warnings = 0u32;
        let mut has_error = false;
        let mut has_critical = false;
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Critical => has_critical = true,
                AlertSeverity::Error => has_error = true,
                AlertSeverity::Warning => warnings += 1,
                AlertSeverity::Info => {}
            }
        }
        if has_critical {
            SystemStatus::Critical
        } else if has_error {
            SystemStatus::Error
        } else if warnings > 5 {
            SystemStatus::Warning
        } else {
            SystemStatus::Healthy
        }
    }
}

/// Averages over the trailing hour, fed into the background dashboard loop.
#[derive(Debug, Clone, Serialize)]
pub struct RollingHourSummary {
    pub avg_latency_ms: f64,
    pub avg_confidence: f64,
    pub avg_execution_score: f64,
    pub avg_slippage_bps: f64,
    pub trade_count: u32,
    pub total_pnl: Decimal,
}

/// Snapshot produced every 30s by the performance monitor's background loop.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub system_status: SystemStatus,
    pub generated_at: DateTime<Utc>,
    pub rolling_hour: RollingHourSummary,
}
