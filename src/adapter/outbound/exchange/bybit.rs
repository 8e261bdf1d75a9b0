//! Bybit v5 linear-perpetual adapter.
//!
//! Signing: HMAC-SHA256 over `timestamp + api_key + recv_window + payload`
//! (query string for GET, JSON body for POST), sent in `X-BAPI-*` headers.
//! A 200 response still carries `retCode`; non-zero codes are classified
//! here before anything reaches the caller.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use super::rest::{dec_field, decode, ms_field, now_millis, RestClient};
use crate::domain::account::{Credentials, Exchange};
use crate::domain::order::{OrderSide, OrderType};
use crate::domain::position::PositionSide;
use crate::error::{Error, Result};
use crate::port::outbound::exchange::{
    BalanceCheck, ExchangeAdapter, Fill, LeverageOutcome, LivePosition, PlaceOrderRequest,
    PlacedOrder, Ticker,
};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";

pub struct BybitAdapter {
    client: RestClient,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
}

#[derive(Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

impl BybitAdapter {
    pub fn new(creds: &Credentials, testnet: bool, timeout: std::time::Duration) -> Result<Self> {
        let base = if testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            client: RestClient::new(base, timeout)?,
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
        })
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let material = format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(material.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, payload: &str) -> Vec<(&'static str, String)> {
        let timestamp = now_millis();
        vec![
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-SIGN", self.sign(&timestamp, payload)),
            ("X-BAPI-TIMESTAMP", timestamp),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string()),
        ]
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let headers = self.auth_headers(query);
        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let body = self.client.get(&path_and_query, &headers).await?;
        unwrap_envelope(decode(&body)?)
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let payload = body.to_string();
        let headers = self.auth_headers(&payload);
        let response = self
            .client
            .request(Method::POST, path, &headers, Some(payload))
            .await?;
        unwrap_envelope(decode(&response)?)
    }
}

/// Classify Bybit's in-band `retCode` failures.
fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    match envelope.ret_code {
        0 => envelope
            .result
            .ok_or_else(|| Error::ExchangeTransient("missing result payload".into())),
        10003 | 10004 | 33004 => Err(Error::CredentialsInvalid(envelope.ret_msg)),
        10006 | 10018 => Err(Error::ExchangeThrottled(envelope.ret_msg)),
        code => Err(Error::ExchangeLogical(format!(
            "retCode {code}: {}",
            envelope.ret_msg
        ))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerDto {
    last_price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletDto {
    coin: Vec<CoinDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinDto {
    coin: String,
    wallet_balance: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    symbol: String,
    side: String,
    size: String,
    avg_price: String,
    mark_price: String,
    unrealised_pnl: String,
    cur_realised_pnl: String,
    leverage: String,
    liq_price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    order_id: String,
    order_link_id: String,
    symbol: String,
    side: String,
    order_type: String,
    qty: String,
    price: String,
    cum_exec_qty: String,
    order_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionDto {
    exec_id: String,
    order_id: String,
    order_link_id: String,
    symbol: String,
    side: String,
    exec_qty: String,
    exec_price: String,
    exec_fee: String,
    exec_time: String,
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

impl OrderDto {
    fn into_placed(self) -> Result<PlacedOrder> {
        Ok(PlacedOrder {
            exchange_order_id: self.order_id,
            client_order_id: (!self.order_link_id.is_empty()).then_some(self.order_link_id),
            side: side_from(&self.side),
            order_type: if self.order_type.eq_ignore_ascii_case("limit") {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            quantity: dec_field(&self.qty, "qty")?,
            price: dec_field(&self.price, "price")?,
            filled: dec_field(&self.cum_exec_qty, "cumExecQty")?,
            symbol: self.symbol,
            status: self.order_status,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        let bare = bare.strip_suffix(".P").unwrap_or(bare);
        bare.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    async fn ping(&self) -> Result<bool> {
        self.client.get("/v5/market/time", &[]).await?;
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let body = self
            .client
            .get(
                &format!("/v5/market/tickers?category={CATEGORY}&symbol={symbol}"),
                &[],
            )
            .await?;
        let result: ListResult<TickerDto> = unwrap_envelope(decode(&body)?)?;
        let first = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExchangeLogical(format!("unknown symbol {symbol}")))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: dec_field(&first.last_price, "lastPrice")?,
            timestamp: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        let result: ListResult<WalletDto> = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        let mut balances = HashMap::new();
        for wallet in result.list {
            for coin in wallet.coin {
                let free = dec_field(&coin.wallet_balance, "walletBalance")?;
                if free > Decimal::ZERO {
                    balances.insert(coin.coin, free);
                }
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<LivePosition>> {
        let query = match symbol {
            Some(symbol) => format!("category={CATEGORY}&symbol={symbol}"),
            None => format!("category={CATEGORY}&settleCoin=USDT"),
        };
        let result: ListResult<PositionDto> = self.signed_get("/v5/position/list", &query).await?;

        let mut positions = Vec::new();
        for dto in result.list {
            let size = dec_field(&dto.size, "size")?;
            if size.is_zero() {
                continue;
            }
            let liquidation = dec_field(&dto.liq_price, "liqPrice")?;
            positions.push(LivePosition {
                symbol: dto.symbol,
                side: if dto.side.eq_ignore_ascii_case("sell") {
                    PositionSide::Short
                } else {
                    PositionSide::Long
                },
                size,
                entry_price: dec_field(&dto.avg_price, "avgPrice")?,
                mark_price: dec_field(&dto.mark_price, "markPrice")?,
                unrealized_pnl: dec_field(&dto.unrealised_pnl, "unrealisedPnl")?,
                realized_pnl: dec_field(&dto.cur_realised_pnl, "curRealisedPnl")?,
                leverage: dec_field(&dto.leverage, "leverage")?.to_u32().unwrap_or(1),
                liquidation_price: (!liquidation.is_zero()).then_some(liquidation),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let query = match symbol {
            Some(symbol) => format!("category={CATEGORY}&symbol={symbol}"),
            None => format!("category={CATEGORY}&settleCoin=USDT"),
        };
        let result: ListResult<OrderDto> = self.signed_get("/v5/order/realtime", &query).await?;
        result.list.into_iter().map(OrderDto::into_placed).collect()
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let mut query = format!("category={CATEGORY}");
        if let Some(symbol) = symbol {
            query.push_str(&format!("&symbol={symbol}"));
        }
        if let Some(since) = since {
            query.push_str(&format!("&startTime={}", since.timestamp_millis()));
        }
        let result: ListResult<ExecutionDto> = self.signed_get("/v5/execution/list", &query).await?;

        result
            .list
            .into_iter()
            .map(|dto| {
                Ok(Fill {
                    trade_id: dto.exec_id,
                    order_id: dto.order_id,
                    client_order_id: (!dto.order_link_id.is_empty()).then_some(dto.order_link_id),
                    side: side_from(&dto.side),
                    quantity: dec_field(&dto.exec_qty, "execQty")?,
                    price: dec_field(&dto.exec_price, "execPrice")?,
                    fee: dec_field(&dto.exec_fee, "execFee")?,
                    fee_currency: "USDT".to_string(),
                    executed_at: ms_field(&dto.exec_time, "execTime")?,
                    symbol: dto.symbol,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome> {
        let leverage = leverage.to_string();
        let result: std::result::Result<serde_json::Value, Error> = self
            .signed_post(
                "/v5/position/set-leverage",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": symbol,
                    "buyLeverage": leverage,
                    "sellLeverage": leverage,
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(LeverageOutcome::Applied),
            // "leverage not modified" is a logical no-op, not a failure.
            Err(Error::ExchangeLogical(msg)) if msg.contains("110043") => {
                Ok(LeverageOutcome::Applied)
            }
            Err(err) => Err(err),
        }
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        let mut body = serde_json::json!({
            "category": CATEGORY,
            "symbol": request.symbol,
            "side": match request.side {
                OrderSide::Buy => "Buy",
                OrderSide::Sell => "Sell",
            },
            "qty": request.amount.to_string(),
            "orderLinkId": request.client_order_id,
            "reduceOnly": request.reduce_only,
        });

        match request.order_type {
            OrderType::Limit => {
                body["orderType"] = "Limit".into();
                if let Some(price) = request.price {
                    body["price"] = price.to_string().into();
                }
            }
            OrderType::Stop | OrderType::StopLimit | OrderType::TakeProfit => {
                // Conditional market order triggered at the given price.
                body["orderType"] = "Market".into();
                if let Some(price) = request.price {
                    body["triggerPrice"] = price.to_string().into();
                }
            }
            OrderType::Market => {
                body["orderType"] = "Market".into();
            }
        }

        if let Some(stop_loss) = request.stop_loss {
            body["stopLoss"] = stop_loss.to_string().into();
        }
        if let Some(take_profit) = request.take_profit {
            body["takeProfit"] = take_profit.to_string().into();
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateDto {
            order_id: String,
            order_link_id: String,
        }

        let created: CreateDto = self.signed_post("/v5/order/create", body).await?;
        Ok(PlacedOrder {
            exchange_order_id: created.order_id,
            client_order_id: Some(created.order_link_id),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.amount,
            price: request.price.unwrap_or(Decimal::ZERO),
            filled: Decimal::ZERO,
            status: "New".to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed_post(
                "/v5/order/cancel",
                serde_json::json!({
                    "category": CATEGORY,
                    "symbol": symbol,
                    "orderId": order_id,
                }),
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
        let quote = super::binance::quote_currency(symbol);
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
