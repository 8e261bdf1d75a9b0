//! Binance USDⓈ-M futures adapter.
//!
//! Signing: HMAC-SHA256 over the query string, appended as `signature=`,
//! with the API key in the `X-MBX-APIKEY` header.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;

use super::rest::{dec_field, decode, ms_field, now_millis, RestClient};
use crate::domain::account::{Credentials, Exchange};
use crate::domain::order::{OrderSide, OrderType};
use crate::domain::position::PositionSide;
use crate::error::Result;
use crate::port::outbound::exchange::{
    BalanceCheck, ExchangeAdapter, Fill, LeverageOutcome, PlaceOrderRequest, PlacedOrder, Ticker,
};

const MAINNET_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

pub struct BinanceAdapter {
    client: RestClient,
    api_key: String,
    api_secret: String,
}

impl BinanceAdapter {
    pub fn new(creds: &Credentials, testnet: bool, timeout: std::time::Duration) -> Result<Self> {
        let base = if testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            client: RestClient::new(base, timeout)?,
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
        })
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        vec![("X-MBX-APIKEY", self.api_key.clone())]
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String> {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", now_millis()));
        let signature = self.sign(&query);

        self.client
            .request(
                method,
                &format!("{path}?{query}&signature={signature}"),
                &self.auth_headers(),
                None,
            )
            .await
    }
}

#[derive(Deserialize)]
struct TickerDto {
    price: String,
    time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDto {
    asset: String,
    available_balance: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
    liquidation_price: String,
    leverage: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    order_id: i64,
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    orig_qty: String,
    price: String,
    executed_qty: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeDto {
    id: i64,
    order_id: i64,
    symbol: String,
    side: String,
    qty: String,
    price: String,
    commission: String,
    commission_asset: String,
    time: i64,
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn order_type_from(raw: &str) -> OrderType {
    match raw {
        "LIMIT" => OrderType::Limit,
        "STOP" | "STOP_MARKET" => OrderType::Stop,
        "TAKE_PROFIT" | "TAKE_PROFIT_MARKET" => OrderType::TakeProfit,
        _ => OrderType::Market,
    }
}

impl OrderDto {
    fn into_placed(self) -> Result<PlacedOrder> {
        Ok(PlacedOrder {
            exchange_order_id: self.order_id.to_string(),
            client_order_id: Some(self.client_order_id),
            side: side_from(&self.side),
            order_type: order_type_from(&self.order_type),
            quantity: dec_field(&self.orig_qty, "origQty")?,
            price: dec_field(&self.price, "price")?,
            filled: dec_field(&self.executed_qty, "executedQty")?,
            symbol: self.symbol,
            status: self.status,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        // TradingView writes perpetuals as e.g. "BTCUSDT.P" or
        // "BINANCE:BTCUSDTPERP".
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        let bare = bare.strip_suffix(".P").unwrap_or(bare);
        let cleaned: String = bare
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match cleaned.strip_suffix("PERP") {
            Some(stripped) => stripped.to_string(),
            None => cleaned,
        }
    }

    async fn ping(&self) -> Result<bool> {
        self.client.get("/fapi/v1/ping", &[]).await?;
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let body = self
            .client
            .get(&format!("/fapi/v1/ticker/price?symbol={symbol}"), &[])
            .await?;
        let dto: TickerDto = decode(&body)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: dec_field(&dto.price, "price")?,
            timestamp: ms_field(&dto.time.to_string(), "time")?,
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        let body = self.signed(Method::GET, "/fapi/v2/balance", vec![]).await?;
        let dtos: Vec<BalanceDto> = decode(&body)?;
        let mut balances = HashMap::new();
        for dto in dtos {
            let free = dec_field(&dto.available_balance, "availableBalance")?;
            if free > Decimal::ZERO {
                balances.insert(dto.asset, free);
            }
        }
        Ok(balances)
    }

    async fn get_positions(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<crate::port::outbound::exchange::LivePosition>> {
        let mut params = vec![];
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        let body = self.signed(Method::GET, "/fapi/v2/positionRisk", params).await?;
        let dtos: Vec<PositionDto> = decode(&body)?;

        let mut positions = Vec::new();
        for dto in dtos {
            let amount = dec_field(&dto.position_amt, "positionAmt")?;
            if amount.is_zero() {
                continue;
            }
            let liquidation = dec_field(&dto.liquidation_price, "liquidationPrice")?;
            positions.push(crate::port::outbound::exchange::LivePosition {
                symbol: dto.symbol,
                side: if amount > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                size: amount.abs(),
                entry_price: dec_field(&dto.entry_price, "entryPrice")?,
                mark_price: dec_field(&dto.mark_price, "markPrice")?,
                unrealized_pnl: dec_field(&dto.un_realized_profit, "unRealizedProfit")?,
                // positionRisk carries no realized figure.
                realized_pnl: Decimal::ZERO,
                leverage: dec_field(&dto.leverage, "leverage")?.to_u32().unwrap_or(1),
                liquidation_price: (!liquidation.is_zero()).then_some(liquidation),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let mut params = vec![];
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        let body = self.signed(Method::GET, "/fapi/v1/openOrders", params).await?;
        let dtos: Vec<OrderDto> = decode(&body)?;
        dtos.into_iter().map(OrderDto::into_placed).collect()
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let mut params = vec![];
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        if let Some(since) = since {
            params.push(("startTime", since.timestamp_millis().to_string()));
        }
        let body = self.signed(Method::GET, "/fapi/v1/userTrades", params).await?;
        let dtos: Vec<TradeDto> = decode(&body)?;

        dtos.into_iter()
            .map(|dto| {
                Ok(Fill {
                    trade_id: dto.id.to_string(),
                    order_id: dto.order_id.to_string(),
                    client_order_id: None,
                    side: side_from(&dto.side),
                    quantity: dec_field(&dto.qty, "qty")?,
                    price: dec_field(&dto.price, "price")?,
                    fee: dec_field(&dto.commission, "commission")?,
                    fee_currency: dto.commission_asset,
                    executed_at: ms_field(&dto.time.to_string(), "time")?,
                    symbol: dto.symbol,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome> {
        self.signed(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await?;
        Ok(LeverageOutcome::Applied)
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            (
                "side",
                match request.side {
                    OrderSide::Buy => "BUY".to_string(),
                    OrderSide::Sell => "SELL".to_string(),
                },
            ),
            ("quantity", request.amount.to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];

        match request.order_type {
            OrderType::Market => params.push(("type", "MARKET".into())),
            OrderType::Limit => {
                params.push(("type", "LIMIT".into()));
                params.push(("timeInForce", "GTC".into()));
                if let Some(price) = request.price {
                    params.push(("price", price.to_string()));
                }
            }
            OrderType::Stop | OrderType::StopLimit => {
                params.push(("type", "STOP_MARKET".into()));
                if let Some(price) = request.price {
                    params.push(("stopPrice", price.to_string()));
                }
            }
            OrderType::TakeProfit => {
                params.push(("type", "TAKE_PROFIT_MARKET".into()));
                if let Some(price) = request.price {
                    params.push(("stopPrice", price.to_string()));
                }
            }
        }

        if request.reduce_only {
            params.push(("reduceOnly", "true".into()));
        }

        let body = self.signed(Method::POST, "/fapi/v1/order", params).await?;
        let dto: OrderDto = decode(&body)?;
        dto.into_placed()
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.signed(
            Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )
        .await?;
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
        let quote = quote_currency(symbol);
        let balances = self.get_balance().await?;
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

/// Quote currency for margin math on a concatenated symbol.
pub(crate) fn quote_currency(symbol: &str) -> &'static str {
    for quote in ["USDT", "USDC", "BUSD", "USD"] {
        if symbol.ends_with(quote) {
            return quote;
        }
    }
    "USDT"
}
