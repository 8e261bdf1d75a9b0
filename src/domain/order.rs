//! Submitted exchange orders and client order identifiers.
//!
//! The client order identifier is the idempotency token at the exchange: it
//! is deterministic within one attempt (`tv_{alertId}_{epochMs}`), and the
//! exchange's own dedup on the full identifier is the last line of defense
//! against double-trading across attempts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::Exchange;
use crate::domain::money::{Price, Qty};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// The side that reduces a position opened on this side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
}

impl OrderType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::TakeProfit => "take_profit",
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(Self::Market),
            "limit" => Ok(Self::Limit),
            "stop" => Ok(Self::Stop),
            "stop_limit" => Ok(Self::StopLimit),
            "take_profit" => Ok(Self::TakeProfit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Failed,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "open" => Ok(Self::Open),
            "partially_filled" => Ok(Self::PartiallyFilled),
            "filled" => Ok(Self::Filled),
            "cancelled" => Ok(Self::Cancelled),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A submitted exchange order as persisted locally.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub account_id: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    /// Zero for market orders.
    pub price: Price,
    pub filled: Qty,
    pub remaining: Qty,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// True once cumulative fills cover the full quantity.
    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.quantity > Decimal::ZERO && self.filled >= self.quantity
    }
}

/// Client order identifier for an entry order: `tv_{alertId}_{epochMs}`.
#[must_use]
pub fn entry_client_order_id(alert_id: &str, at: DateTime<Utc>) -> String {
    format!("tv_{alert_id}_{}", at.timestamp_millis())
}

/// Client order identifier for a close order: `tv_close_{alertId}_{epochMs}`.
#[must_use]
pub fn close_client_order_id(alert_id: &str, at: DateTime<Utc>) -> String {
    format!("tv_close_{alert_id}_{}", at.timestamp_millis())
}

/// Identifier for a protective leg, linked to its parent's identifier family.
#[must_use]
pub fn protective_client_order_id(parent: &str, leg: ProtectiveLeg) -> String {
    match leg {
        ProtectiveLeg::StopLoss => format!("{parent}_sl"),
        ProtectiveLeg::TakeProfit => format!("{parent}_tp"),
    }
}

/// Which protective leg an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveLeg {
    StopLoss,
    TakeProfit,
}
