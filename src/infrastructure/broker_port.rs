use async_trait::async_trait;

use crate::domain::errors::MidplaneError;
use crate::domain::order::{Fill, Order, OrderRequest};
use crate::domain::signal::Instrument;

/// Seam between the midplane and a real broker API. `SubscribeFills` is
/// modeled as a pull (`poll_fills`) rather than a push callback, keeping
/// the trait object-safe and easy to mock with a canned fill queue.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<Order, MidplaneError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), MidplaneError>;
    async fn modify_order(&self, order_id: &str, new_quantity: rust_decimal::Decimal) -> Result<Order, MidplaneError>;
    async fn query_order(&self, order_id: &str) -> Result<Order, MidplaneError>;
    async fn query_position(&self, instrument: &Instrument) -> Result<Option<crate::domain::order::Position>, MidplaneError>;
    async fn poll_fills(&self) -> Result<Vec<Fill>, MidplaneError>;
}
