use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::info;

use crate::clock::{Clock, IdGenerator};
use crate::domain::errors::MidplaneError;
use crate::domain::order::{Fill, Order, OrderRequest, OrderStatus, Position};
use crate::domain::signal::Instrument;
use crate::infrastructure::broker_port::BrokerPort;

/// In-process paper broker: fills every order immediately at its limit
/// price, or at a per-instrument mark price (defaulting to 100) for market
/// orders. Stands in for the real broker API transport, which this
/// midplane treats as an external collaborator it never implements.
pub struct SimulatedBroker {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    orders: RwLock<HashMap<String, Order>>,
    positions: RwLock<HashMap<String, Position>>,
    mark_prices: RwLock<HashMap<String, Decimal>>,
    pending_fills: RwLock<VecDeque<Fill>>,
    commission_per_fill: Decimal,
}

impl SimulatedBroker {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            mark_prices: RwLock::new(HashMap::new()),
            pending_fills: RwLock::new(VecDeque::new()),
            commission_per_fill: dec!(0),
        }
    }

    /// Sets the price this broker fills market orders at for `instrument`.
    pub async fn set_mark_price(&self, instrument: &Instrument, price: Decimal) {
        self.mark_prices.write().await.insert(instrument.0.clone(), price);
    }

    async fn mark_price(&self, instrument: &Instrument) -> Decimal {
        self.mark_prices
            .read()
            .await
            .get(&instrument.0)
            .copied()
            .unwrap_or(dec!(100))
    }

    async fn apply_fill(&self, instrument: &Instrument, action: crate::domain::order::OrderAction, quantity: Decimal, price: Decimal) {
        let mut positions = self.positions.write().await;
        let position = positions
            .entry(instrument.0.clone())
            .or_insert_with(|| Position::new(instrument.clone()));

        let signed_qty = match action {
            crate::domain::order::OrderAction::Buy => quantity,
            crate::domain::order::OrderAction::Sell => -quantity,
        };

        let new_quantity = position.quantity + signed_qty;
        let same_direction = position.quantity.is_zero()
            || (position.quantity > Decimal::ZERO) == (signed_qty > Decimal::ZERO);
        let direction = if position.quantity > Decimal::ZERO { Decimal::ONE } else { -Decimal::ONE };

        if same_direction {
            let total_cost = position.average_cost * position.quantity.abs() + price * signed_qty.abs();
            let total_qty = position.quantity.abs() + signed_qty.abs();
            position.average_cost = if total_qty.is_zero() { Decimal::ZERO } else { total_cost / total_qty };
        } else {
            let closed_qty = position.quantity.abs().min(signed_qty.abs());
            position.realized_pnl += (price - position.average_cost) * closed_qty * direction;
            if !new_quantity.is_zero() && (new_quantity > Decimal::ZERO) != (position.quantity > Decimal::ZERO) {
                position.average_cost = price;
            }
        }
        position.quantity = new_quantity;
    }
}

#[async_trait]
impl BrokerPort for SimulatedBroker {
    async fn place_order(&self, request: OrderRequest) -> Result<Order, MidplaneError> {
        let fill_price = request.limit_price.unwrap_or(self.mark_price(&request.instrument).await);
        let now = self.clock.now_utc();
        let order_id = self.ids.next_id();

        let order = Order {
            order_id: order_id.clone(),
            signal_id: String::new(),
            instrument: request.instrument.clone(),
            action: request.action,
            order_type: request.order_type,
            quantity: request.quantity,
            filled_quantity: request.quantity,
            avg_fill_price: fill_price,
            status: OrderStatus::Filled,
            submitted_at: now,
            updated_at: now,
        };

        self.orders.write().await.insert(order_id.clone(), order.clone());
        self.apply_fill(&request.instrument, request.action, request.quantity, fill_price).await;

        let fill = Fill {
            fill_id: self.ids.next_id(),
            order_id: order_id.clone(),
            instrument: request.instrument.clone(),
            action: request.action,
            quantity: request.quantity,
            price: fill_price,
            commission: self.commission_per_fill,
            filled_at: now,
        };
        self.pending_fills.write().await.push_back(fill);

        info!(order_id = %order_id, instrument = %request.instrument, "simulated broker filled order");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), MidplaneError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(order_id).ok_or_else(|| MidplaneError::OrderNotFound {
            order_id: order_id.to_string(),
        })?;
        if order.status.is_terminal() {
            return Err(MidplaneError::OrderRejected {
                order_id: order_id.to_string(),
                reason: "order already settled, nothing to cancel".into(),
            });
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = self.clock.now_utc();
        Ok(())
    }

    async fn modify_order(&self, order_id: &str, new_quantity: Decimal) -> Result<Order, MidplaneError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(order_id).ok_or_else(|| MidplaneError::OrderNotFound {
            order_id: order_id.to_string(),
        })?;
        if order.status.is_terminal() {
            return Err(MidplaneError::OrderRejected {
                order_id: order_id.to_string(),
                reason: "order already settled, cannot modify".into(),
            });
        }
        order.quantity = new_quantity;
        order.updated_at = self.clock.now_utc();
        Ok(order.clone())
    }

    async fn query_order(&self, order_id: &str) -> Result<Order, MidplaneError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| MidplaneError::OrderNotFound { order_id: order_id.to_string() })
    }

    async fn query_position(&self, instrument: &Instrument) -> Result<Option<Position>, MidplaneError> {
        Ok(self.positions.read().await.get(&instrument.0).cloned())
    }

    async fn poll_fills(&self) -> Result<Vec<Fill>, MidplaneError> {
        let mut pending = self.pending_fills.write().await;
        Ok(pending.drain(..).collect())
    }
}
