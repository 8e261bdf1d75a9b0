//! Coinbase Advanced Trade adapter (spot).
//!
//! Signing: hex HMAC-SHA256 over `timestamp + method + path + body` in
//! `CB-ACCESS-*` headers. Spot venue: there are no derivative positions and
//! set-leverage reports unsupported; `close` consequently finds nothing to
//! exit here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use super::rest::{dec_field, decode, RestClient};
use crate::domain::account::{Credentials, Exchange};
use crate::domain::order::{OrderSide, OrderType};
use crate::error::{Error, Result};
use crate::port::outbound::exchange::{
    BalanceCheck, ExchangeAdapter, Fill, LeverageOutcome, LivePosition, PlaceOrderRequest,
    PlacedOrder, Ticker,
};

const BASE_URL: &str = "https://api.coinbase.com";
const SANDBOX_URL: &str = "https://api-sandbox.coinbase.com";

pub struct CoinbaseAdapter {
    client: RestClient,
    api_key: String,
    api_secret: String,
}

impl CoinbaseAdapter {
    pub fn new(creds: &Credentials, testnet: bool, timeout: std::time::Duration) -> Result<Self> {
        let base = if testnet { SANDBOX_URL } else { BASE_URL };
        Ok(Self {
            client: RestClient::new(base, timeout)?,
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
        })
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let material = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(material.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().timestamp().to_string();
        vec![
            ("CB-ACCESS-KEY", self.api_key.clone()),
            ("CB-ACCESS-SIGN", self.sign(&timestamp, method, path, body)),
            ("CB-ACCESS-TIMESTAMP", timestamp),
        ]
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        // The signature covers the path without the query string.
        let headers = self.auth_headers("GET", path, "");
        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let body = self.client.get(&path_and_query, &headers).await?;
        decode(&body)
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let payload = body.to_string();
        let headers = self.auth_headers("POST", path, &payload);
        let response = self
            .client
            .request(Method::POST, path, &headers, Some(payload))
            .await?;
        decode(&response)
    }
}

#[derive(Deserialize)]
struct ProductDto {
    price: String,
}

#[derive(Deserialize)]
struct AccountsDto {
    accounts: Vec<AccountDto>,
}

#[derive(Deserialize)]
struct AccountDto {
    currency: String,
    available_balance: MoneyDto,
}

#[derive(Deserialize)]
struct MoneyDto {
    value: String,
}

#[derive(Deserialize)]
struct FillsDto {
    fills: Vec<FillDto>,
}

#[derive(Deserialize)]
struct FillDto {
    trade_id: String,
    order_id: String,
    product_id: String,
    side: String,
    size: String,
    price: String,
    commission: String,
    trade_time: String,
}

#[derive(Deserialize)]
struct OrdersDto {
    orders: Vec<OrderDto>,
}

#[derive(Deserialize)]
struct OrderDto {
    order_id: String,
    client_order_id: String,
    product_id: String,
    side: String,
    status: String,
    #[serde(default)]
    filled_size: String,
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

#[async_trait]
impl ExchangeAdapter for CoinbaseAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        // "BTCUSD" / "BTCUSDT" → "BTC-USD" / "BTC-USDT".
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        if bare.contains('-') {
            return bare.to_string();
        }
        let compact: String = bare.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        for quote in ["USDT", "USDC", "USD", "EUR", "GBP", "BTC", "ETH"] {
            if let Some(base) = compact.strip_suffix(quote) {
                if !base.is_empty() {
                    return format!("{base}-{quote}");
                }
            }
        }
        compact
    }

    async fn ping(&self) -> Result<bool> {
        self.client.get("/api/v3/brokerage/time", &[]).await?;
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let dto: ProductDto = self
            .signed_get(&format!("/api/v3/brokerage/products/{symbol}"), "")
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: dec_field(&dto.price, "price")?,
            timestamp: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        let dto: AccountsDto = self.signed_get("/api/v3/brokerage/accounts", "").await?;
        let mut balances = HashMap::new();
        for account in dto.accounts {
            let free = dec_field(&account.available_balance.value, "available_balance")?;
            if free > Decimal::ZERO {
                balances.insert(account.currency, free);
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self, _symbol: Option<&str>) -> Result<Vec<LivePosition>> {
        // Spot: no derivative positions.
        Ok(Vec::new())
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let query = match symbol {
            Some(symbol) => format!("order_status=OPEN&product_id={symbol}"),
            None => "order_status=OPEN".to_string(),
        };
        let dto: OrdersDto = self
            .signed_get("/api/v3/brokerage/orders/historical/batch", &query)
            .await?;

        dto.orders
            .into_iter()
            .map(|order| {
                Ok(PlacedOrder {
                    exchange_order_id: order.order_id,
                    client_order_id: (!order.client_order_id.is_empty())
                        .then_some(order.client_order_id),
                    side: side_from(&order.side),
                    order_type: OrderType::Limit,
                    quantity: Decimal::ZERO,
                    price: Decimal::ZERO,
                    filled: dec_field(&order.filled_size, "filled_size")?,
                    symbol: order.product_id,
                    status: order.status,
                })
            })
            .collect()
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let mut query = String::new();
        if let Some(symbol) = symbol {
            query.push_str(&format!("product_id={symbol}"));
        }
        if let Some(since) = since {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("start_sequence_timestamp={}", since.to_rfc3339()));
        }
        let dto: FillsDto = self
            .signed_get("/api/v3/brokerage/orders/historical/fills", &query)
            .await?;

        dto.fills
            .into_iter()
            .map(|fill| {
                let quote = fill
                    .product_id
                    .split('-')
                    .nth(1)
                    .unwrap_or("USD")
                    .to_string();
                Ok(Fill {
                    trade_id: fill.trade_id,
                    order_id: fill.order_id,
                    client_order_id: None,
                    side: side_from(&fill.side),
                    quantity: dec_field(&fill.size, "size")?,
                    price: dec_field(&fill.price, "price")?,
                    fee: dec_field(&fill.commission, "commission")?,
                    fee_currency: quote,
                    executed_at: DateTime::parse_from_rfc3339(&fill.trade_time)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            Error::ExchangeTransient(format!("bad trade_time: {e}"))
                        })?,
                    symbol: fill.product_id,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<LeverageOutcome> {
        Ok(LeverageOutcome::Unsupported)
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        #[derive(Deserialize)]
        struct PlaceResponse {
            success: bool,
            #[serde(default)]
            success_response: Option<SuccessDto>,
            #[serde(default)]
            error_response: Option<ErrorDto>,
        }

        #[derive(Deserialize)]
        struct SuccessDto {
            order_id: String,
        }

        #[derive(Deserialize)]
        struct ErrorDto {
            #[serde(default)]
            message: String,
            #[serde(default)]
            preview_failure_reason: String,
        }

        let configuration = match request.order_type {
            OrderType::Limit => serde_json::json!({
                "limit_limit_gtc": {
                    "base_size": request.amount.to_string(),
                    "limit_price": request.price.unwrap_or(Decimal::ZERO).to_string(),
                }
            }),
            // Market semantics for everything else; spot has no native
            // reduce-only conditional orders.
            _ => serde_json::json!({
                "market_market_ioc": { "base_size": request.amount.to_string() }
            }),
        };

        let response: PlaceResponse = self
            .signed_post(
                "/api/v3/brokerage/orders",
                serde_json::json!({
                    "client_order_id": request.client_order_id,
                    "product_id": request.symbol,
                    "side": match request.side {
                        OrderSide::Buy => "BUY",
                        OrderSide::Sell => "SELL",
                    },
                    "order_configuration": configuration,
                }),
            )
            .await?;

        if !response.success {
            let reason = response
                .error_response
                .map(|e| {
                    if e.message.is_empty() {
                        e.preview_failure_reason
                    } else {
                        e.message
                    }
                })
                .unwrap_or_else(|| "order rejected".to_string());
            return Err(Error::ExchangeLogical(reason));
        }

        let order_id = response
            .success_response
            .map(|s| s.order_id)
            .ok_or_else(|| Error::ExchangeTransient("missing order id in response".into()))?;

        Ok(PlacedOrder {
            exchange_order_id: order_id,
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.amount,
            price: request.price.unwrap_or(Decimal::ZERO),
            filled: Decimal::ZERO,
            status: "OPEN".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed_post(
                "/api/v3/brokerage/orders/batch_cancel",
                serde_json::json!({ "order_ids": [order_id] }),
            )
            .await?;
        Ok(())
    }

    async fn validate_balance(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        _leverage: u32,
    ) -> Result<BalanceCheck> {
        let mut parts = symbol.split('-');
        let base = parts.next().unwrap_or(symbol).to_string();
        let quote = parts.next().unwrap_or("USD").to_string();
        let balances = self.get_balance().await?;

        // Buys spend quote, sells spend base.
        let (currency, required) = match side {
            OrderSide::Buy => (quote, amount * price),
            OrderSide::Sell => (base, amount),
        };
        let free = balances.get(&currency).copied().unwrap_or(Decimal::ZERO);

        if free >= required {
            Ok(BalanceCheck::valid())
        } else {
            Ok(BalanceCheck::invalid(format!(
                "required {required} {currency}, available {free}"
            )))
        }
    }
}
