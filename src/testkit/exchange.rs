//! Scripted exchange adapter for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::account::{Credentials, Exchange, ExchangeAccount};
use crate::domain::order::OrderSide;
use crate::error::{Error, Result};
use crate::port::outbound::exchange::{
    AdapterFactory, BalanceCheck, ExchangeAdapter, Fill, LeverageOutcome, LivePosition,
    PlaceOrderRequest, PlacedOrder, Ticker,
};

/// Non-capturing error factory, so scripted failures stay `Send + Sync`.
pub type ErrorScript = fn() -> Error;

/// In-memory exchange double with scriptable state and failures.
///
/// Every mutator returns `&self` state handles; tests set up balances,
/// positions, and failure scripts, run the code under test, then assert on
/// the recorded calls.
#[derive(Default)]
pub struct MockExchange {
    pub ticker_price: Mutex<Option<Decimal>>,
    pub ticker_error: Mutex<Option<ErrorScript>>,
    pub balances: Mutex<HashMap<String, Decimal>>,
    pub positions: Mutex<Vec<LivePosition>>,
    pub positions_error: Mutex<Option<ErrorScript>>,
    pub open_orders: Mutex<Vec<PlacedOrder>>,
    pub fills: Mutex<Vec<Fill>>,
    pub place_error: Mutex<Option<ErrorScript>>,
    /// Every submission the adapter accepted, in order.
    pub placed: Mutex<Vec<PlaceOrderRequest>>,
    pub leverage_calls: Mutex<Vec<(String, u32)>>,
    pub cancelled: Mutex<Vec<String>>,
    next_order_id: Mutex<u64>,
}

impl MockExchange {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticker(self, price: Decimal) -> Self {
        *self.ticker_price.lock() = Some(price);
        self
    }

    pub fn with_balance(self, currency: &str, free: Decimal) -> Self {
        self.balances.lock().insert(currency.to_string(), free);
        self
    }

    pub fn with_position(self, position: LivePosition) -> Self {
        self.positions.lock().push(position);
        self
    }

    pub fn script_ticker_error(&self, script: ErrorScript) {
        *self.ticker_error.lock() = Some(script);
    }

    pub fn script_positions_error(&self, script: ErrorScript) {
        *self.positions_error.lock() = Some(script);
    }

    pub fn script_place_error(&self, script: ErrorScript) {
        *self.place_error.lock() = Some(script);
    }

    /// Submissions recorded so far.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<PlaceOrderRequest> {
        self.placed.lock().clone()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        let bare = bare.strip_suffix(".P").unwrap_or(bare);
        bare.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        if let Some(script) = *self.ticker_error.lock() {
            return Err(script());
        }
        let scripted = *self.ticker_price.lock();
        let price =
            scripted.ok_or_else(|| Error::ExchangeTransient("no scripted ticker".into()))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self.balances.lock().clone())
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<LivePosition>> {
        if let Some(script) = *self.positions_error.lock() {
            return Err(script());
        }
        let positions = self.positions.lock();
        Ok(positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let orders = self.open_orders.lock();
        Ok(orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let fills = self.fills.lock();
        Ok(fills
            .iter()
            .filter(|f| symbol.map_or(true, |s| f.symbol == s))
            .filter(|f| since.map_or(true, |at| f.executed_at > at))
            .cloned()
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome> {
        self.leverage_calls.lock().push((symbol.to_string(), leverage));
        Ok(LeverageOutcome::Applied)
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        if let Some(script) = *self.place_error.lock() {
            return Err(script());
        }
        self.placed.lock().push(request.clone());
        let mut next = self.next_order_id.lock();
        *next += 1;
        Ok(PlacedOrder {
            exchange_order_id: format!("ex-{}", *next),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.amount,
            price: request.price.unwrap_or(Decimal::ZERO),
            filled: Decimal::ZERO,
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        self.cancelled.lock().push(order_id.to_string());
        Ok(())
    }

    async fn validate_balance(
        &self,
        symbol: &str,
        _side: OrderSide,
        amount: Decimal,
        price: Decimal,
        leverage: u32,
    ) -> Result<BalanceCheck> {
        let balances = self.balances.lock();
        let quote = ["USDT", "USDC", "USD"]
            .into_iter()
            .find(|q| symbol.contains(q))
            .unwrap_or("USDT");
        let free = balances.get(quote).copied().unwrap_or(Decimal::ZERO);
        let required = amount * price / Decimal::from(leverage.max(1));

        if free >= required {
            Ok(BalanceCheck::valid())
        } else {
            Ok(BalanceCheck::invalid(format!(
                "required {required} {quote}, available {free}"
            )))
        }
    }
}

/// Factory that hands every account the same scripted adapter.
pub struct MockAdapterFactory {
    pub adapter: Arc<MockExchange>,
}

impl MockAdapterFactory {
    #[must_use]
    pub fn new(adapter: Arc<MockExchange>) -> Self {
        Self { adapter }
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn build(
        &self,
        _account: &ExchangeAccount,
        _creds: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        Ok(Arc::clone(&self.adapter) as Arc<dyn ExchangeAdapter>)
    }

    fn build_public(&self, _exchange: Exchange) -> Result<Arc<dyn ExchangeAdapter>> {
        Ok(Arc::clone(&self.adapter) as Arc<dyn ExchangeAdapter>)
    }
}

/// A live long position for scripting reconciliation and close paths.
#[must_use]
pub fn long_position(symbol: &str, size: Decimal, mark_price: Decimal) -> LivePosition {
    LivePosition {
        symbol: symbol.to_string(),
        side: crate::domain::position::PositionSide::Long,
        size,
        entry_price: mark_price,
        mark_price,
        unrealized_pnl: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
        leverage: 1,
        liquidation_price: None,
    }
}
