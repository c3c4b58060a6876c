use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::risk::{RecommendedAction, RiskAssessment, RiskLevel, RiskLimits};
use crate::domain::signal::Signal;

/// Supplies a correlation coefficient between two instruments, as an
/// injectable seam so a real correlation service can be swapped in without
/// touching the sizer.
pub trait CorrelationProvider: Send + Sync {
    fn correlation(&self, a: &str, b: &str) -> f64;
}

/// An unknown pair correlates at a flat 0.3 — holding both is treated as
/// "somewhat" related by default.
pub struct DefaultCorrelationProvider;

impl CorrelationProvider for DefaultCorrelationProvider {
    fn correlation(&self, _a: &str, _b: &str) -> f64 {
        0.3
    }
}

/// Inputs describing current portfolio state needed to size and risk-assess
/// a signal, kept separate from `Signal` since they come from the order
/// book / portfolio, not the producing model.
pub struct SizingContext {
    pub portfolio_value: Decimal,
    pub price: Decimal,
    pub current_position_weight: f64,
    pub model_performance_score: f64,
    pub volatility: f64,
    pub existing_position_qty: Decimal,
}

/// How `RiskSizer::size` should turn a signal into a quantity. Only
/// `ConfidenceWeighted` runs the full seven-step algorithm; the others are
/// documented degenerate variants reserved for future sizing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    /// Returns the base 1% allocation unchanged, with no confidence,
    /// performance, or risk scaling.
    Fixed,
    ConfidenceWeighted,
    /// Reserved: currently falls back to the fixed base size.
    Kelly,
    /// Reserved: currently falls back to the fixed base size.
    VolatilityAdjusted,
}

/// Confidence-weighted position sizer and risk assessor.
pub struct RiskSizer {
    limits: RiskLimits,
    correlation: Box<dyn CorrelationProvider>,
}

impl RiskSizer {
    pub fn new(limits: RiskLimits, correlation: Box<dyn CorrelationProvider>) -> Self {
        Self { limits, correlation }
    }

    pub fn with_default_correlation(limits: RiskLimits) -> Self {
        Self::new(limits, Box::new(DefaultCorrelationProvider))
    }

    fn base_size(&self, ctx: &SizingContext) -> Decimal {
        if ctx.price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let base_allocation = ctx.portfolio_value * Decimal::from_f64_retain(0.01).unwrap_or(Decimal::ZERO);
        (base_allocation / ctx.price).floor()
    }

    /// Dispatches to the requested sizing method. `Fixed`, `Kelly`, and
    /// `VolatilityAdjusted` return the unscaled base allocation, capped by
    /// the same position/weight limits as `ConfidenceWeighted`.
    pub fn size(&self, method: SizingMethod, signal: &Signal, ctx: &SizingContext) -> Decimal {
        match method {
            SizingMethod::ConfidenceWeighted => self.calculate_quantity(signal, ctx),
            SizingMethod::Fixed | SizingMethod::Kelly | SizingMethod::VolatilityAdjusted => {
                let base = self.base_size(ctx);
                let capped_by_position = base.min(self.max_size_by_position(ctx.price));
                capped_by_position.min(self.max_size_by_weight(ctx)).max(Decimal::ZERO)
            }
        }
    }

    /// Confidence-weighted quantity: 1% base allocation, scaled by
    /// `max(0.1, confidence)` and by model performance, then capped by
    /// `max_position_size` and by `max_single_stock_weight` of the
    /// portfolio.
    pub fn calculate_quantity(&self, signal: &Signal, ctx: &SizingContext) -> Decimal {
        if ctx.price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let base_allocation = ctx.portfolio_value * Decimal::from_f64_retain(0.01).unwrap_or(Decimal::ZERO);
        let base_size = (base_allocation / ctx.price).floor();

        let confidence_factor = signal.confidence.max(0.1);
        let performance_factor = ctx.model_performance_score.max(0.1);
        let risk_factor = signal.confidence.max(0.1);

        let scaled = decimal_scale(base_size, confidence_factor * performance_factor * risk_factor);

        let capped_by_position = scaled.min(self.max_size_by_position(ctx.price));
        let capped_by_weight = capped_by_position.min(self.max_size_by_weight(ctx));

        capped_by_weight.max(Decimal::ZERO)
    }

    fn max_size_by_position(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            (self.limits.max_position_size / price).floor()
        }
    }

    fn max_size_by_weight(&self, ctx: &SizingContext) -> Decimal {
        if ctx.price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let max_value = ctx.portfolio_value
            * Decimal::from_f64_retain(self.limits.max_single_stock_weight).unwrap_or(Decimal::ZERO);
        (max_value / ctx.price).floor()
    }

    /// Weighted five-factor risk score: confidence 0.25, model performance
    /// 0.25, concentration 0.20, market (volatility) 0.15, correlation 0.15.
    pub fn assess_signal_risk(&self, signal: &Signal, ctx: &SizingContext, peer_instruments: &[String]) -> RiskAssessment {
        let confidence_risk = (1.0 - signal.confidence) * 100.0;
        let model_performance_risk = (1.0 - ctx.model_performance_score) * 100.0;
        let concentration_risk = (ctx.current_position_weight * 500.0).min(100.0);
        let market_risk = (ctx.volatility * 100.0).min(100.0);

        let avg_correlation = if peer_instruments.is_empty() {
            0.0
        } else {
            peer_instruments
                .iter()
                .map(|peer| self.correlation.correlation(&signal.instrument.0, peer))
                .sum::<f64>()
                / peer_instruments.len() as f64
        };
        let position_weight_scale = (ctx.existing_position_qty.abs().to_f64().unwrap_or(0.0) / 1000.0) * 20.0;
        let correlation_risk = (avg_correlation * position_weight_scale).min(100.0);

        let overall_risk_score = (confidence_risk * 0.25
            + model_performance_risk * 0.25
            + concentration_risk * 0.20
            + market_risk * 0.15
            + correlation_risk * 0.15)
            / 100.0;

        let risk_level = RiskLevel::from_score(overall_risk_score);
        let recommended_action = RecommendedAction::from_level(risk_level);

        RiskAssessment {
            confidence_risk,
            model_performance_risk,
            concentration_risk,
            market_risk,
            correlation_risk,
            overall_risk_score,
            risk_level,
            recommended_action,
        }
    }
}

fn decimal_scale(value: Decimal, factor: f64) -> Decimal {
    let factor = Decimal::from_f64_retain(factor).unwrap_or(Decimal::ONE);
    (value * factor).floor()
}
