use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::errors::MidplaneError;
use crate::domain::order::{Fill, Order, OrderAction, OrderRequest, OrderStatus, Position};
use crate::domain::signal::Instrument;
use crate::infrastructure::broker_port::BrokerPort;

/// Owns orders, fills, and positions for the midplane, applying fills with
/// a precise average-cost/realized-P&L rule on sign-flipping quantity
/// changes: the closed portion realizes P&L at the *old* average cost, and
/// the residual (the part that opens the new side) resets average cost to
/// the fill price.
pub struct OrderBook {
    clock: Arc<dyn Clock>,
    broker: Arc<dyn BrokerPort>,
    orders: RwLock<HashMap<String, Order>>,
    fills: RwLock<Vec<Fill>>,
    seen_fill_ids: RwLock<HashSet<String>>,
    positions: RwLock<HashMap<String, Position>>,
}

/// Fields `modify` is allowed to change. Anything else about an order
/// (instrument, action, order type) is immutable once placed.
#[derive(Debug, Clone, Default)]
pub struct OrderModification {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

impl OrderBook {
    pub fn new(clock: Arc<dyn Clock>, broker: Arc<dyn BrokerPort>) -> Self {
        Self {
            clock,
            broker,
            orders: RwLock::new(HashMap::new()),
            fills: RwLock::new(Vec::new()),
            seen_fill_ids: RwLock::new(HashSet::new()),
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn place(&self, order_id: String, signal_id: String, request: OrderRequest) -> Order {
        let now = self.clock.now_utc();
        let order = Order {
            order_id: order_id.clone(),
            signal_id,
            instrument: request.instrument,
            action: request.action,
            order_type: request.order_type,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::PendingSubmit,
            submitted_at: now,
            updated_at: now,
        };
        self.orders.write().await.insert(order_id, order.clone());
        order
    }

    pub async fn mark_submitted(&self, order_id: &str) -> Result<(), MidplaneError> {
        self.transition(order_id, OrderStatus::Submitted).await
    }

    pub async fn mark_rejected(&self, order_id: &str) -> Result<(), MidplaneError> {
        self.transition(order_id, OrderStatus::Rejected).await
    }

    /// Cancels an active order: marks it `PendingCancel`, round-trips the
    /// cancel to the broker, then settles to `Cancelled` on success or
    /// reverts to its prior status if the broker rejects the cancel.
    pub async fn cancel(&self, order_id: &str) -> Result<(), MidplaneError> {
        let prior_status = {
            let mut orders = self.orders.write().await;
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| MidplaneError::OrderNotFound { order_id: order_id.to_string() })?;
            if !order.status.is_active() {
                return Err(MidplaneError::OrderRejected {
                    order_id: order_id.to_string(),
                    reason: "order is not active".into(),
                });
            }
            let prior = order.status;
            order.status = OrderStatus::PendingCancel;
            order.updated_at = self.clock.now_utc();
            prior
        };

        match self.broker.cancel_order(order_id).await {
            Ok(()) => self.transition(order_id, OrderStatus::Cancelled).await,
            Err(err) => {
                warn!(order_id, error = %err, "broker rejected cancel, reverting order status");
                self.transition(order_id, prior_status).await?;
                Err(err)
            }
        }
    }

    /// Applies a whitelisted change (quantity/limit/stop) to an active
    /// order, round-tripping a quantity change through the broker. Rejects
    /// terminal orders outright.
    pub async fn modify(&self, order_id: &str, modification: OrderModification) -> Result<Order, MidplaneError> {
        let active = {
            let orders = self.orders.read().await;
            let order = orders
                .get(order_id)
                .ok_or_else(|| MidplaneError::OrderNotFound { order_id: order_id.to_string() })?;
            if order.status.is_terminal() {
                return Err(MidplaneError::OrderRejected {
                    order_id: order_id.to_string(),
                    reason: "order is not active".into(),
                });
            }
            order.clone()
        };

        let updated = if let Some(new_quantity) = modification.quantity {
            self.broker.modify_order(order_id, new_quantity).await?
        } else {
            active
        };

        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| MidplaneError::OrderNotFound { order_id: order_id.to_string() })?;
        if let Some(qty) = modification.quantity {
            order.quantity = qty;
        }
        let _ = updated;
        order.updated_at = self.clock.now_utc();
        Ok(order.clone())
    }

    async fn transition(&self, order_id: &str, status: OrderStatus) -> Result<(), MidplaneError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| MidplaneError::OrderNotFound { order_id: order_id.to_string() })?;
        order.status = status;
        order.updated_at = self.clock.now_utc();
        Ok(())
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.read().await.get(order_id).cloned()
    }

    pub async fn position(&self, instrument: &Instrument) -> Position {
        self.positions
            .read()
            .await
            .get(&instrument.0)
            .cloned()
            .unwrap_or_else(|| Position::new(instrument.clone()))
    }

    /// Applies a fill: updates the order's weighted average fill price and
    /// fill status, then folds the quantity into the position, realizing
    /// P&L across a sign flip using the rule documented on the type.
    /// A fill whose `fill_id` has already been applied is ignored.
    pub async fn apply_fill(&self, fill: Fill) -> Result<(), MidplaneError> {
        {
            let mut seen = self.seen_fill_ids.write().await;
            if !seen.insert(fill.fill_id.clone()) {
                warn!(fill_id = %fill.fill_id, "duplicate fill ignored");
                return Ok(());
            }
        }

        {
            let mut orders = self.orders.write().await;
            let order = orders
                .get_mut(&fill.order_id)
                .ok_or_else(|| MidplaneError::OrderNotFound { order_id: fill.order_id.clone() })?;

            let prior_filled = order.filled_quantity;
            let prior_notional = order.avg_fill_price * prior_filled;
            let new_filled = prior_filled + fill.quantity;
            order.avg_fill_price = if new_filled.is_zero() {
                Decimal::ZERO
            } else {
                (prior_notional + fill.notional()) / new_filled
            };
            order.filled_quantity = new_filled;
            order.status = if order.remaining_quantity() <= Decimal::ZERO {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            order.updated_at = self.clock.now_utc();
        }

        self.fills.write().await.push(fill.clone());
        self.update_position(&fill).await;
        Ok(())
    }

    async fn update_position(&self, fill: &Fill) {
        let mut positions = self.positions.write().await;
        let position = positions
            .entry(fill.instrument.0.clone())
            .or_insert_with(|| Position::new(fill.instrument.clone()));

        let signed_delta = match fill.action {
            OrderAction::Buy => fill.quantity,
            OrderAction::Sell => -fill.quantity,
        };
        let new_quantity = position.quantity + signed_delta;

        if position.quantity.is_zero() {
            position.quantity = new_quantity;
            position.average_cost = fill.price;
        } else {
            let original_sign = if position.quantity > Decimal::ZERO {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };

            if new_quantity.is_zero() {
                let closed_qty = position.quantity.abs();
                position.realized_pnl += (fill.price - position.average_cost) * closed_qty * original_sign;
                position.quantity = Decimal::ZERO;
                position.average_cost = Decimal::ZERO;
            } else if same_sign(position.quantity, new_quantity) && position.quantity.abs() <= new_quantity.abs() {
                let prior_notional = position.average_cost * position.quantity.abs();
                let added_notional = fill.price * fill.quantity;
                let total_qty = position.quantity.abs() + fill.quantity;
                position.average_cost = (prior_notional + added_notional) / total_qty;
                position.quantity = new_quantity;
            } else if same_sign(position.quantity, new_quantity) {
                // Reducing but not flipping or flattening: realize P&L on the
                // closed portion at the old average cost, average cost unchanged.
                let closed_qty = signed_delta.abs();
                position.realized_pnl += (fill.price - position.average_cost) * closed_qty * original_sign;
                position.quantity = new_quantity;
            } else {
                // Sign flip: realize P&L on the entire prior position at the
                // old average cost, then reset average cost to the fill price
                // for the residual that opens the new side.
                let closed_qty = position.quantity.abs();
                position.realized_pnl += (fill.price - position.average_cost) * closed_qty * original_sign;
                position.quantity = new_quantity;
                position.average_cost = fill.price;
            }
        }

        info!(
            instrument = %fill.instrument,
            quantity = %position.quantity,
            average_cost = %position.average_cost,
            realized_pnl = %position.realized_pnl,
            "position updated"
        );
    }

    pub async fn fills_for_order(&self, order_id: &str) -> Vec<Fill> {
        self.fills
            .read()
            .await
            .iter()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect()
    }
}

fn same_sign(a: Decimal, b: Decimal) -> bool {
    (a >= Decimal::ZERO && b >= Decimal::ZERO) || (a <= Decimal::ZERO && b <= Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::order::{OrderType, TimeInForce};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockBroker {
        reject_cancels: AtomicBool,
    }

    #[async_trait]
    impl BrokerPort for MockBroker {
        async fn place_order(&self, _request: OrderRequest) -> Result<Order, MidplaneError> {
            unimplemented!("not exercised by order_book tests")
        }

        async fn cancel_order(&self, order_id: &str) -> Result<(), MidplaneError> {
            if self.reject_cancels.load(Ordering::SeqCst) {
                Err(MidplaneError::OrderRejected {
                    order_id: order_id.to_string(),
                    reason: "broker refused cancel".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn modify_order(&self, order_id: &str, new_quantity: Decimal) -> Result<Order, MidplaneError> {
            Ok(Order {
                order_id: order_id.to_string(),
                signal_id: "s1".into(),
                instrument: "AAPL".into(),
                action: OrderAction::Buy,
                order_type: OrderType::Market,
                quantity: new_quantity,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: Decimal::ZERO,
                status: OrderStatus::Submitted,
                submitted_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }

        async fn query_order(&self, _order_id: &str) -> Result<Order, MidplaneError> {
            unimplemented!("not exercised by order_book tests")
        }

        async fn query_position(&self, _instrument: &Instrument) -> Result<Option<Position>, MidplaneError> {
            unimplemented!("not exercised by order_book tests")
        }

        async fn poll_fills(&self) -> Result<Vec<Fill>, MidplaneError> {
            Ok(Vec::new())
        }
    }

    fn book() -> OrderBook {
        OrderBook::new(Arc::new(SystemClock), Arc::new(MockBroker::default()))
    }

    fn book_with(broker: MockBroker) -> OrderBook {
        OrderBook::new(Arc::new(SystemClock), Arc::new(broker))
    }

    fn request(action: OrderAction, qty: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: "AAPL".into(),
            action,
            quantity: qty,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    fn fill(order_id: &str, action: OrderAction, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            instrument: "AAPL".into(),
            action,
            quantity: qty,
            price,
            commission: dec!(1),
            filled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn opening_fill_sets_average_cost_to_fill_price() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        let pos = book.position(&"AAPL".into()).await;
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.average_cost, dec!(100));
    }

    #[tokio::test]
    async fn adding_to_position_computes_weighted_average() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        book.place("o2".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o2", OrderAction::Buy, dec!(10), dec!(110))).await.unwrap();
        let pos = book.position(&"AAPL".into()).await;
        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.average_cost, dec!(105));
    }

    #[tokio::test]
    async fn partial_reduce_realizes_pnl_and_keeps_average_cost() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        book.place("o2".into(), "s1".into(), request(OrderAction::Sell, dec!(4))).await;
        book.apply_fill(fill("o2", OrderAction::Sell, dec!(4), dec!(120))).await.unwrap();
        let pos = book.position(&"AAPL".into()).await;
        assert_eq!(pos.quantity, dec!(6));
        assert_eq!(pos.average_cost, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(80));
    }

    #[tokio::test]
    async fn sign_flip_realizes_old_position_and_resets_average_cost() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        book.place("o2".into(), "s1".into(), request(OrderAction::Sell, dec!(15))).await;
        book.apply_fill(fill("o2", OrderAction::Sell, dec!(15), dec!(90))).await.unwrap();
        let pos = book.position(&"AAPL".into()).await;
        assert_eq!(pos.quantity, dec!(-5));
        assert_eq!(pos.average_cost, dec!(90));
        assert_eq!(pos.realized_pnl, dec!(-100));
    }

    #[tokio::test]
    async fn flattening_resets_average_cost_to_zero() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        book.place("o2".into(), "s1".into(), request(OrderAction::Sell, dec!(10))).await;
        book.apply_fill(fill("o2", OrderAction::Sell, dec!(10), dec!(110))).await.unwrap();
        let pos = book.position(&"AAPL".into()).await;
        assert!(pos.is_flat());
        assert_eq!(pos.average_cost, dec!(0));
        assert_eq!(pos.realized_pnl, dec!(100));
    }

    #[tokio::test]
    async fn cancel_of_inactive_order_is_rejected() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        let err = book.cancel("o1").await.unwrap_err();
        assert!(matches!(err, MidplaneError::OrderRejected { .. }));
    }

    #[tokio::test]
    async fn cancel_round_trips_through_broker_and_settles_cancelled() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.cancel("o1").await.unwrap();
        let order = book.order("o1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_reverts_status_when_broker_rejects() {
        let broker = MockBroker { reject_cancels: AtomicBool::new(true) };
        let book = book_with(broker);
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.mark_submitted("o1").await.unwrap();
        let err = book.cancel("o1").await.unwrap_err();
        assert!(matches!(err, MidplaneError::OrderRejected { .. }));
        let order = book.order("o1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
    }

    #[tokio::test]
    async fn modify_updates_quantity_via_broker() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        let modification = OrderModification { quantity: Some(dec!(25)), ..Default::default() };
        let updated = book.modify("o1", modification).await.unwrap();
        assert_eq!(updated.quantity, dec!(25));
    }

    #[tokio::test]
    async fn modify_rejects_terminal_order() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        book.apply_fill(fill("o1", OrderAction::Buy, dec!(10), dec!(100))).await.unwrap();
        let modification = OrderModification { quantity: Some(dec!(5)), ..Default::default() };
        let err = book.modify("o1", modification).await.unwrap_err();
        assert!(matches!(err, MidplaneError::OrderRejected { .. }));
    }

    #[tokio::test]
    async fn duplicate_fill_is_ignored() {
        let book = book();
        book.place("o1".into(), "s1".into(), request(OrderAction::Buy, dec!(10))).await;
        let f = fill("o1", OrderAction::Buy, dec!(10), dec!(100));
        book.apply_fill(f.clone()).await.unwrap();
        book.apply_fill(f).await.unwrap();
        let order = book.order("o1").await.unwrap();
        assert_eq!(order.filled_quantity, dec!(10));
    }
}
