use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::clock::{Clock, IdGenerator};
use crate::domain::errors::MidplaneError;
use crate::domain::execution::{ExecutionQuality, ExecutionReport, SignalExecutionRecord};
use crate::domain::order::{Order, OrderAction, OrderRequest, OrderType, TimeInForce};
use crate::domain::signal::{Side, Signal, SignalStatus};

use crate::application::order_book::OrderBook;
use crate::application::performance_monitor::PerformanceMonitor;
use crate::application::risk_sizer::{RiskSizer, SizingContext};
use crate::application::validator::SignalValidator;
use crate::infrastructure::blob_sink::{AuditRow, BlobSink};
use crate::infrastructure::broker_port::BrokerPort;
use crate::infrastructure::core::service_runtime::ServiceRuntime;
use crate::infrastructure::error_log::ErrorLog;

/// Fallback execution budget for a signal with no `max_exec` of its own.
/// In practice every `Signal` carries its own budget; this only guards
/// against a record that somehow lost track of its signal.
const FALLBACK_EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

const ORDER_SERVICE: &str = "order_management";

/// Drives a [`Signal`] through receive -> validate -> execute -> monitor.
/// `submit` returns as soon as the signal is admitted, handing the
/// validate/execute/monitor pipeline to a background task so a slow broker
/// round-trip never blocks the caller.
pub struct ExecutionEngine {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    validator: Arc<SignalValidator>,
    sizer: Arc<RiskSizer>,
    order_book: Arc<OrderBook>,
    broker: Arc<dyn BrokerPort>,
    runtime: Arc<ServiceRuntime>,
    monitor: Arc<PerformanceMonitor>,
    blob_sink: Arc<dyn BlobSink>,
    error_log: Arc<ErrorLog>,
    records: RwLock<HashMap<String, SignalExecutionRecord>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        validator: Arc<SignalValidator>,
        sizer: Arc<RiskSizer>,
        order_book: Arc<OrderBook>,
        broker: Arc<dyn BrokerPort>,
        runtime: Arc<ServiceRuntime>,
        monitor: Arc<PerformanceMonitor>,
        blob_sink: Arc<dyn BlobSink>,
        error_log: Arc<ErrorLog>,
    ) -> Self {
        Self {
            clock,
            ids,
            validator,
            sizer,
            order_book,
            broker,
            runtime,
            monitor,
            blob_sink,
            error_log,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn status(&self, signal_id: &str) -> Option<SignalStatus> {
        self.records.read().await.get(signal_id).map(|r| r.status)
    }

    async fn upsert(&self, record: SignalExecutionRecord) {
        let signal_id = record.signal.signal_id.clone();
        self.records.write().await.insert(signal_id, record);
    }

    /// Validates shape, admits the signal into the record store, and hands
    /// the validate/execute/monitor pipeline to a background task. Returns
    /// the execution id immediately; call [`Self::status`]/[`Self::report`]
    /// to observe progress. Only shape-validation failures are returned
    /// synchronously — everything past that point is reported through the
    /// stored record.
    pub async fn submit(self: &Arc<Self>, signal: Signal, ctx: SizingContext) -> Result<String, MidplaneError> {
        let now = self.clock.now_utc();
        let execution_id = self.ids.next_id();
        let mut record = SignalExecutionRecord::new(execution_id.clone(), signal.clone(), now);

        if let Err(err) = signal.validate_shape() {
            record.status = SignalStatus::Rejected;
            record.rejection_reason = Some(err.to_string());
            record.completed_at = Some(now);
            self.upsert(record).await;
            return Err(MidplaneError::InvalidSignal {
                signal_id: signal.signal_id.clone(),
                reason: err.to_string(),
            });
        }

        self.upsert(record).await;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_pipeline(signal, ctx).await;
        });

        Ok(execution_id)
    }

    /// Validate -> execute -> monitor, run off the caller's stack so a slow
    /// broker doesn't hold up `submit`.
    async fn run_pipeline(self: Arc<Self>, signal: Signal, ctx: SizingContext) {
        let signal_id = signal.signal_id.clone();

        if let Err(err) = self.validator.validate(&signal).await {
            self.reject(&signal_id, &err).await;
            self.error_log.record(&err, format!("validate signal {signal_id}")).await;
            return;
        }

        self.monitor.record_confidence(signal.confidence).await;
        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&signal_id) {
                record.status = SignalStatus::Validated;
                record.validated_at = Some(self.clock.now_utc());
            }
        }
        self.validator.mark_executing().await;
        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&signal_id) {
                record.status = SignalStatus::Executing;
                record.execution_started_at = Some(self.clock.now_utc());
            }
        }

        if signal.side == Side::Hold {
            self.finalize(&signal_id, SignalStatus::Executed).await;
            return;
        }

        match self.execute(&signal, &ctx).await {
            Ok((order, retry_count)) => {
                let mut records = self.records.write().await;
                if let Some(record) = records.get_mut(&signal_id) {
                    record.order_ids.push(order.order_id.clone());
                    record.retry_count += retry_count;
                    record.orders.push(order);
                }
                drop(records);
                self.monitor(signal_id).await;
            }
            Err(err) => {
                self.validator.mark_done().await;
                self.reject(&signal_id, &err).await;
                self.error_log.record(&err, format!("execute signal {signal_id}")).await;
            }
        }
    }

    async fn reject(&self, signal_id: &str, err: &MidplaneError) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(signal_id) {
            record.status = SignalStatus::Failed;
            record.rejection_reason = Some(err.to_string());
            record.completed_at = Some(self.clock.now_utc());
        }
    }

    /// Translates side -> broker action/quantity (including close-long/
    /// close-short position lookups) and places the order through the
    /// service runtime (pool + breaker + retry). Returns the placed order
    /// and how many retry attempts the broker call needed.
    async fn execute(&self, signal: &Signal, ctx: &SizingContext) -> Result<(Order, u32), MidplaneError> {
        let (action, quantity) = match signal.side {
            Side::Buy => (OrderAction::Buy, self.sizer.calculate_quantity(signal, ctx)),
            Side::Sell => (OrderAction::Sell, self.sizer.calculate_quantity(signal, ctx)),
            Side::CloseLong => {
                let position = self.order_book.position(&signal.instrument).await;
                if position.quantity <= Decimal::ZERO {
                    return Err(MidplaneError::SignalRejected {
                        reason: "no long to close".into(),
                    });
                }
                (OrderAction::Sell, position.quantity)
            }
            Side::CloseShort => {
                let position = self.order_book.position(&signal.instrument).await;
                if position.quantity >= Decimal::ZERO {
                    return Err(MidplaneError::SignalRejected {
                        reason: "no short position to close".into(),
                    });
                }
                (OrderAction::Buy, -position.quantity)
            }
            Side::Hold => {
                return Err(MidplaneError::SignalRejected {
                    reason: "hold signals are not executed".into(),
                });
            }
        };

        if signal.side.requires_quantity() && quantity <= Decimal::ZERO {
            return Err(MidplaneError::SignalRejected {
                reason: "sized quantity is zero, nothing to execute".into(),
            });
        }

        let request = OrderRequest {
            instrument: signal.instrument.clone(),
            action,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        };

        let order_id = self.ids.next_id();
        let placed = self
            .order_book
            .place(order_id.clone(), signal.signal_id.clone(), request.clone())
            .await;

        let attempts_before = self.runtime.stats(ORDER_SERVICE).await.map(|s| s.total_attempts).unwrap_or(0);

        let broker = self.broker.clone();
        let req = request.clone();
        let result = self
            .runtime
            .execute(ORDER_SERVICE, "place_order", || {
                let broker = broker.clone();
                let req = req.clone();
                async move { broker.place_order(req).await }
            })
            .await;

        let attempts_after = self.runtime.stats(ORDER_SERVICE).await.map(|s| s.total_attempts).unwrap_or(attempts_before);
        let retries = attempts_after.saturating_sub(attempts_before).saturating_sub(1) as u32;

        match result {
            Ok(broker_order) => {
                self.order_book.mark_submitted(&order_id).await?;
                info!(signal_id = %signal.signal_id, order_id, "order submitted");

                if broker_order.filled_quantity > Decimal::ZERO {
                    let fill = crate::domain::order::Fill {
                        fill_id: self.ids.next_id(),
                        order_id: order_id.clone(),
                        instrument: request.instrument.clone(),
                        action: request.action,
                        quantity: broker_order.filled_quantity,
                        price: broker_order.avg_fill_price,
                        commission: Decimal::ZERO,
                        filled_at: self.clock.now_utc(),
                    };
                    self.order_book.apply_fill(fill).await?;
                }

                let updated = self.order_book.order(&order_id).await.unwrap_or(placed);
                Ok((updated, retries))
            }
            Err(err) => {
                self.order_book.mark_rejected(&order_id).await?;
                Err(err)
            }
        }
    }

    /// Polls order/fill state until all of the signal's orders are
    /// inactive or the signal's own `max_exec` budget elapses. Never
    /// cancels in-flight orders on timeout (see module docs).
    async fn monitor(&self, signal_id: String) {
        let max_exec = {
            let records = self.records.read().await;
            records.get(&signal_id).map(|r| r.signal.max_exec).unwrap_or(FALLBACK_EXECUTION_TIMEOUT)
        };
        let deadline = self.clock.monotonic_now() + max_exec;
        loop {
            let all_inactive = {
                let records = self.records.read().await;
                match records.get(&signal_id) {
                    Some(record) => record.orders.iter().all(|o| o.status.is_terminal()),
                    None => true,
                }
            };

            if all_inactive {
                self.finalize(&signal_id, SignalStatus::Executed).await;
                return;
            }

            if self.clock.monotonic_now() >= deadline {
                warn!(signal_id, "execution monitor timed out, leaving orders in place");
                self.finalize(&signal_id, SignalStatus::TimedOut).await;
                return;
            }

            tokio::time::sleep(Duration::from_secs(1)).await;

            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&signal_id) {
                for order in record.orders.iter_mut() {
                    if let Some(latest) = self.order_book.order(&order.order_id).await {
                        *order = latest;
                    }
                }
            }
        }
    }

    async fn finalize(&self, signal_id: &str, status: SignalStatus) {
        self.validator.mark_done().await;
        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(signal_id) {
                record.status = status;
                record.completed_at = Some(self.clock.now_utc());
            }
        }
        if status == SignalStatus::Executed {
            self.record_execution_metrics(signal_id).await;
        }
    }

    /// Feeds latency, execution-score, and slippage samples from a
    /// successfully-executed signal into the performance monitor.
    async fn record_execution_metrics(&self, signal_id: &str) {
        let record = self.records.read().await.get(signal_id).cloned();
        let Some(record) = record else { return };

        if let Some(latency_ms) = record.latency_ms() {
            self.monitor.record_latency(signal_id, latency_ms as f64).await;
        }

        let filled = record.total_filled_quantity();
        if filled.is_zero() {
            return;
        }
        let avg_price = record
            .orders
            .iter()
            .map(|o| o.avg_fill_price * o.filled_quantity)
            .sum::<Decimal>()
            / filled;

        if let Some(predicted) = record.signal.predicted_price {
            if !predicted.is_zero() {
                let slippage_bps = ((avg_price - predicted) / predicted).abs().to_f64().unwrap_or(0.0) * 10_000.0;
                self.monitor.record_slippage_bps(slippage_bps).await;
            }
        }

        let fill_score = record
            .orders
            .first()
            .map(|o| o.fill_fraction())
            .and_then(|f| f.to_f64())
            .unwrap_or(0.0)
            * 100.0;
        let quality = ExecutionQuality::new(100.0, 100.0, fill_score);
        self.monitor.record_execution_score(quality.execution_score).await;
    }

    /// Builds the terminal [`ExecutionReport`] for a completed signal and
    /// writes the matching audit row to the blob sink.
    pub async fn report(&self, signal_id: &str) -> Option<ExecutionReport> {
        let record = self.records.read().await.get(signal_id).cloned()?;
        if !record.is_complete() {
            return None;
        }

        let filled_qty = record.total_filled_quantity();
        let avg_price = if filled_qty.is_zero() {
            Decimal::ZERO
        } else {
            record
                .orders
                .iter()
                .map(|o| o.avg_fill_price * o.filled_quantity)
                .sum::<Decimal>()
                / filled_qty
        };

        let quality = if record.was_successful() {
            let speed_score = 100.0;
            let slippage_score = 100.0;
            let fill_score = record
                .orders
                .first()
                .map(|o| o.fill_fraction())
                .and_then(|f| f.to_f64())
                .unwrap_or(0.0)
                * 100.0;
            Some(ExecutionQuality::new(speed_score, slippage_score, fill_score))
        } else {
            None
        };

        let report = ExecutionReport {
            signal_id: record.signal.signal_id.clone(),
            instrument: record.signal.instrument.0.clone(),
            status: record.status,
            filled_quantity: filled_qty,
            requested_quantity: record.signal.quantity,
            avg_fill_price: avg_price,
            total_commission: record.total_commission(Decimal::ZERO),
            latency_ms: record.latency_ms(),
            quality,
            error_message: record.rejection_reason.clone(),
        };

        let row = AuditRow {
            signal_id: report.signal_id.clone(),
            instrument: report.instrument.clone(),
            status: format!("{:?}", report.status),
            received_at: record.received_at,
            completed_at: record.completed_at,
            latency_ms: report.latency_ms,
            filled_quantity: report.filled_quantity,
            avg_fill_price: report.avg_fill_price,
            commission: report.total_commission,
            error_message: report.error_message.clone(),
        };
        if let Err(err) = self.blob_sink.write_audit_row(row).await {
            error!(signal_id, "failed to write audit row: {err}");
        }

        Some(report)
    }
}
