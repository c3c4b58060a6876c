use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::order::Order;
use crate::domain::signal::{Signal, SignalStatus};

/// Tracks one signal from receipt through its terminal state. Orders are
/// appended as they're placed; a signal can spawn more than one order
/// (e.g. a close followed by an open).
#[derive(Debug, Clone)]
pub struct SignalExecutionRecord {
    pub execution_id: String,
    pub signal: Signal,
    pub status: SignalStatus,
    pub orders: Vec<Order>,
    pub order_ids: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub execution_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub rejection_reason: Option<String>,
}

impl SignalExecutionRecord {
    pub fn new(execution_id: String, signal: Signal, received_at: DateTime<Utc>) -> Self {
        Self {
            execution_id,
            signal,
            status: SignalStatus::Received,
            orders: Vec::new(),
            order_ids: Vec::new(),
            received_at,
            validated_at: None,
            execution_started_at: None,
            completed_at: None,
            retry_count: 0,
            rejection_reason: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn was_successful(&self) -> bool {
        matches!(self.status, SignalStatus::Executed)
    }

    pub fn total_filled_quantity(&self) -> Decimal {
        self.orders.iter().map(|o| o.filled_quantity).sum()
    }

    pub fn total_commission(&self, commission_per_order: Decimal) -> Decimal {
        commission_per_order * Decimal::from(self.orders.len() as u64)
    }

    pub fn latency_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.received_at).num_milliseconds())
    }
}

/// Diagnostic execution-quality scores, supplementing the required report
/// fields with an optional speed/slippage/fill breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionQuality {
    pub speed_score: f64,
    pub slippage_score: f64,
    pub fill_score: f64,
    pub execution_score: f64,
    pub market_impact_bps: Option<f64>,
    pub effective_spread_bps: Option<f64>,
}

impl ExecutionQuality {
    /// Weighted blend: speed 0.3, slippage 0.4, fill 0.3.
    pub fn new(speed_score: f64, slippage_score: f64, fill_score: f64) -> Self {
        let execution_score = speed_score * 0.3 + slippage_score * 0.4 + fill_score * 0.3;
        Self {
            speed_score,
            slippage_score,
            fill_score,
            execution_score,
            market_impact_bps: None,
            effective_spread_bps: None,
        }
    }
}

/// The final report produced once a signal reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub signal_id: String,
    pub instrument: String,
    pub status: SignalStatus,
    pub filled_quantity: Decimal,
    pub requested_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub total_commission: Decimal,
    pub latency_ms: Option<i64>,
    pub quality: Option<ExecutionQuality>,
    pub error_message: Option<String>,
}
