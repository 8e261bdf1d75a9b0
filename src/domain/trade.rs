//! Execution fills.

use chrono::{DateTime, Utc};

use crate::domain::money::{Price, Qty};
use crate::domain::order::OrderSide;

/// An execution fill reported by the exchange.
///
/// Uniqueness is on `(trade_id, order_id)`: some venues reuse trade
/// identifiers across orders.
#[derive(Debug, Clone)]
pub struct Trade {
    pub id: String,
    /// Exchange-assigned trade identifier.
    pub trade_id: String,
    /// Exchange order identifier this fill belongs to.
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Qty,
    pub price: Price,
    pub fee: Qty,
    pub fee_currency: String,
    pub executed_at: DateTime<Utc>,
}
