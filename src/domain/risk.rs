use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Risk limits enforced across signal validation and position sizing.
/// Validated eagerly at construction rather than checked ad hoc at each
/// call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_size: Decimal,
    pub max_portfolio_exposure: f64,
    pub max_sector_exposure: f64,
    pub max_single_stock_weight: f64,
    pub min_confidence_threshold: f64,
    pub max_signals_per_hour: u32,
    pub max_concurrent_signals: u32,
    pub max_daily_trades: u32,
    pub min_model_performance_score: f64,
    pub max_daily_loss: Decimal,
    pub max_position_loss: Decimal,
    pub stop_loss_threshold: f64,
    pub max_correlation_exposure: f64,
    pub max_strategy_allocation: f64,
}

#[derive(Debug, Error)]
pub enum RiskLimitsError {
    #[error("{field} must be in (0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: Decimal },
    #[error("{field} must be nonzero, got {value}")]
    ZeroCount { field: &'static str, value: u32 },
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), RiskLimitsError> {
        let unit_fields: [(&'static str, f64); 7] = [
            ("max_portfolio_exposure", self.max_portfolio_exposure),
            ("max_sector_exposure", self.max_sector_exposure),
            ("max_single_stock_weight", self.max_single_stock_weight),
            ("min_confidence_threshold", self.min_confidence_threshold),
            ("min_model_performance_score", self.min_model_performance_score),
            ("stop_loss_threshold", self.stop_loss_threshold),
            ("max_correlation_exposure", self.max_correlation_exposure),
        ];
        for (field, value) in unit_fields {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RiskLimitsError::OutOfUnitRange { field, value });
            }
        }
        if self.max_position_size <= Decimal::ZERO {
            return Err(RiskLimitsError::NotPositive {
                field: "max_position_size",
                value: self.max_position_size,
            });
        }
        if self.max_daily_loss <= Decimal::ZERO {
            return Err(RiskLimitsError::NotPositive {
                field: "max_daily_loss",
                value: self.max_daily_loss,
            });
        }
        if self.max_signals_per_hour == 0 {
            return Err(RiskLimitsError::ZeroCount {
                field: "max_signals_per_hour",
                value: self.max_signals_per_hour,
            });
        }
        if self.max_concurrent_signals == 0 {
            return Err(RiskLimitsError::ZeroCount {
                field: "max_concurrent_signals",
                value: self.max_concurrent_signals,
            });
        }
        if self.max_daily_trades == 0 {
            return Err(RiskLimitsError::ZeroCount {
                field: "max_daily_trades",
                value: self.max_daily_trades,
            });
        }
        Ok(())
    }
}

/// Coarse risk-level bucket on a `<0.25/<0.50/<0.75/else` ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            RiskLevel::Low
        } else if score < 0.50 {
            RiskLevel::Medium
        } else if score < 0.75 {
            RiskLevel::High
        } else {
            RiskLevel::Extreme
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Trade,
    Reduce,
    Abort,
}

impl RecommendedAction {
    pub fn from_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low | RiskLevel::Medium => RecommendedAction::Trade,
            RiskLevel::High => RecommendedAction::Reduce,
            RiskLevel::Extreme => RecommendedAction::Abort,
        }
    }
}

/// Breakdown of a signal's risk assessment, matching `assess_signal_risk`'s
/// five weighted components (weights 0.25/0.25/0.20/0.15/0.15).
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub confidence_risk: f64,
    pub model_performance_risk: f64,
    pub concentration_risk: f64,
    pub market_risk: f64,
    pub correlation_risk: f64,
    pub overall_risk_score: f64,
    pub risk_level: RiskLevel,
    pub recommended_action: RecommendedAction,
}
