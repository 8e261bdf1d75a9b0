//! Exchange integration port for order execution and account state.
//!
//! Defines the uniform capability set the core uses against heterogeneous
//! exchange REST APIs. One adapter exists per exchange tag; a registry keyed
//! by tag yields the concrete implementation.
//!
//! # Overview
//!
//! - [`ExchangeAdapter`]: the full trading capability set
//! - [`PlaceOrderRequest`] / [`PlacedOrder`]: canonical order submission
//! - [`LivePosition`] / [`Fill`]: authoritative account state for the reconciler
//!
//! Adapters classify every failure into the error taxonomy at the boundary
//! and never retry internally; retry and circuit breaking live at the layer
//! that owns the business meaning.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::account::Exchange;
use crate::domain::order::{OrderSide, OrderType};
use crate::domain::position::PositionSide;
use crate::error::Result;

/// Spot/last price quote for one symbol.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Canonical order submission request.
///
/// The adapter translates this into the exchange's native shape, including
/// the placement of protective legs when the venue supports attached orders.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    /// Canonical symbol, already normalized by the adapter.
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub order_type: OrderType,
    /// Idempotency token echoed back by the exchange.
    pub client_order_id: String,
    /// Limit/trigger price; `None` for market orders.
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// An order as acknowledged by the exchange.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Zero when the venue reports no price (market orders).
    pub price: Decimal,
    pub filled: Decimal,
    pub status: String,
}

/// A live open position as reported by the exchange.
#[derive(Debug, Clone)]
pub struct LivePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub leverage: u32,
    pub liquidation_price: Option<Decimal>,
}

/// An execution fill as reported by the exchange.
#[derive(Debug, Clone)]
pub struct Fill {
    pub trade_id: String,
    /// Exchange order identifier owning this fill.
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub executed_at: DateTime<Utc>,
}

/// Outcome of a pre-flight margin check local to the adapter.
#[derive(Debug, Clone)]
pub struct BalanceCheck {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl BalanceCheck {
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a set-leverage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeverageOutcome {
    /// The venue accepted the leverage setting.
    Applied,
    /// The venue has no leverage concept (spot) or ignored the call.
    Unsupported,
}

/// The uniform, exchange-agnostic trading façade.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) to support concurrent
/// job handlers.
///
/// # Errors
///
/// Every method classifies failures into the taxonomy before returning; raw
/// HTTP or transport errors never leak to callers.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// The exchange tag this adapter serves.
    fn exchange(&self) -> Exchange;

    /// Normalize a ticker as written on the charting platform into the
    /// venue's canonical symbol. Pure; no I/O.
    fn normalize_symbol(&self, raw: &str) -> String;

    /// Connectivity probe.
    async fn ping(&self) -> Result<bool>;

    /// Spot/last price for a symbol.
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Spendable balance per currency.
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>>;

    /// Live open positions, optionally filtered to one symbol.
    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<LivePosition>>;

    /// Unfilled orders, optionally filtered to one symbol.
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>>;

    /// Execution fills, optionally filtered to one symbol and bounded below
    /// by a timestamp watermark.
    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>>;

    /// Best-effort leverage setting; spot venues report
    /// [`LeverageOutcome::Unsupported`].
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome>;

    /// Submit an order.
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder>;

    /// Best-effort cancel by exchange order identifier.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Pre-flight margin check for the given submission.
    async fn validate_balance(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<BalanceCheck>;
}

/// Factory yielding adapters for accounts.
///
/// The production implementation is the adapter registry; tests substitute
/// scripted adapters.
pub trait AdapterFactory: Send + Sync {
    /// Build an authenticated adapter for an account.
    fn build(
        &self,
        account: &crate::domain::account::ExchangeAccount,
        creds: &crate::domain::account::Credentials,
    ) -> Result<std::sync::Arc<dyn ExchangeAdapter>>;

    /// Build an unauthenticated adapter for public endpoints.
    fn build_public(&self, exchange: Exchange) -> Result<std::sync::Arc<dyn ExchangeAdapter>>;
}
