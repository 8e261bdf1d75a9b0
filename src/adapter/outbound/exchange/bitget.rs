//! Bitget USDT-futures adapter.
//!
//! Signing: base64 HMAC-SHA256 over `timestamp + method + requestPath +
//! body` in `ACCESS-*` headers, passphrase included. Demo trading is
//! selected per request with the `paptrading: 1` header.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
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

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";

#[derive(Debug)]
pub struct BitgetAdapter {
    client: RestClient,
    api_key: String,
    api_secret: String,
    passphrase: String,
    demo: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Option<T>,
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    match envelope.code.as_str() {
        "00000" => envelope
            .data
            .ok_or_else(|| Error::ExchangeTransient("missing data payload".into())),
        "40012" | "40037" | "40038" => Err(Error::CredentialsInvalid(envelope.msg)),
        "429" | "40429" => Err(Error::ExchangeThrottled(envelope.msg)),
        code => Err(Error::ExchangeLogical(format!("code {code}: {}", envelope.msg))),
    }
}

impl BitgetAdapter {
    pub fn new(creds: &Credentials, testnet: bool, timeout: std::time::Duration) -> Result<Self> {
        let passphrase = creds
            .passphrase
            .clone()
            .ok_or_else(|| Error::CredentialsInvalid("bitget requires a passphrase".into()))?;
        Ok(Self {
            client: RestClient::new(BASE_URL, timeout)?,
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            passphrase,
            demo: testnet,
        })
    }

    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let material = format!("{timestamp}{method}{request_path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(material.as_bytes());
        B64.encode(mac.finalize().into_bytes())
    }

    fn auth_headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Vec<(&'static str, String)> {
        let timestamp = now_millis();
        let mut headers = vec![
            ("ACCESS-KEY", self.api_key.clone()),
            (
                "ACCESS-SIGN",
                self.sign(&timestamp, method, request_path, body),
            ),
            ("ACCESS-TIMESTAMP", timestamp),
            ("ACCESS-PASSPHRASE", self.passphrase.clone()),
            ("locale", "en-US".to_string()),
        ];
        if self.demo {
            headers.push(("paptrading", "1".to_string()));
        }
        headers
    }

    async fn signed_get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let headers = self.auth_headers("GET", path_and_query, "");
        let body = self.client.get(path_and_query, &headers).await?;
        unwrap_envelope(decode(&body)?)
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
        unwrap_envelope(decode(&response)?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerDto {
    last_pr: String,
    ts: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDto {
    margin_coin: String,
    available: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    symbol: String,
    hold_side: String,
    total: String,
    open_price_avg: String,
    mark_price: String,
    unrealized_pl: String,
    achieved_profits: String,
    leverage: String,
    liquidation_price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrdersDto {
    entrusted_list: Option<Vec<OrderDto>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    order_id: String,
    client_oid: String,
    symbol: String,
    side: String,
    order_type: String,
    size: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    base_volume: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillListDto {
    fill_list: Option<Vec<FillDto>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillDto {
    trade_id: String,
    order_id: String,
    symbol: String,
    side: String,
    base_volume: String,
    price: String,
    #[serde(default)]
    fee_detail: Vec<FeeDetailDto>,
    c_time: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeDetailDto {
    total_fee: String,
    fee_coin: String,
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        let bare = bare.strip_suffix(".P").unwrap_or(bare);
        bare.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    async fn ping(&self) -> Result<bool> {
        self.client.get("/api/v2/public/time", &[]).await?;
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let body = self
            .client
            .get(
                &format!("/api/v2/mix/market/ticker?productType={PRODUCT_TYPE}&symbol={symbol}"),
                &[],
            )
            .await?;
        let data: Vec<TickerDto> = unwrap_envelope(decode(&body)?)?;
        let first = data
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExchangeLogical(format!("unknown symbol {symbol}")))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: dec_field(&first.last_pr, "lastPr")?,
            timestamp: ms_field(&first.ts, "ts")?,
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        let data: Vec<AccountDto> = self
            .signed_get(&format!(
                "/api/v2/mix/account/accounts?productType={PRODUCT_TYPE}"
            ))
            .await?;
        let mut balances = HashMap::new();
        for account in data {
            let free = dec_field(&account.available, "available")?;
            if free > Decimal::ZERO {
                balances.insert(account.margin_coin, free);
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<LivePosition>> {
        let data: Vec<PositionDto> = self
            .signed_get(&format!(
                "/api/v2/mix/position/all-position?productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}"
            ))
            .await?;

        let mut positions = Vec::new();
        for dto in data {
            if let Some(filter) = symbol {
                if dto.symbol != filter {
                    continue;
                }
            }
            let size = dec_field(&dto.total, "total")?;
            if size.is_zero() {
                continue;
            }
            let liquidation = dec_field(&dto.liquidation_price, "liquidationPrice")?;
            positions.push(LivePosition {
                symbol: dto.symbol,
                side: if dto.hold_side.eq_ignore_ascii_case("short") {
                    PositionSide::Short
                } else {
                    PositionSide::Long
                },
                size,
                entry_price: dec_field(&dto.open_price_avg, "openPriceAvg")?,
                mark_price: dec_field(&dto.mark_price, "markPrice")?,
                unrealized_pnl: dec_field(&dto.unrealized_pl, "unrealizedPL")?,
                realized_pnl: dec_field(&dto.achieved_profits, "achievedProfits")?,
                leverage: dec_field(&dto.leverage, "leverage")?.to_u32().unwrap_or(1),
                liquidation_price: (!liquidation.is_zero()).then_some(liquidation),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let mut path = format!("/api/v2/mix/order/orders-pending?productType={PRODUCT_TYPE}");
        if let Some(symbol) = symbol {
            path.push_str(&format!("&symbol={symbol}"));
        }
        let data: PendingOrdersDto = self.signed_get(&path).await?;

        data.entrusted_list
            .unwrap_or_default()
            .into_iter()
            .map(|dto| {
                Ok(PlacedOrder {
                    exchange_order_id: dto.order_id,
                    client_order_id: (!dto.client_oid.is_empty()).then_some(dto.client_oid),
                    side: side_from(&dto.side),
                    order_type: if dto.order_type.eq_ignore_ascii_case("limit") {
                        OrderType::Limit
                    } else {
                        OrderType::Market
                    },
                    quantity: dec_field(&dto.size, "size")?,
                    price: dec_field(&dto.price, "price")?,
                    filled: dec_field(&dto.base_volume, "baseVolume")?,
                    symbol: dto.symbol,
                    status: dto.status,
                })
            })
            .collect()
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let mut path = format!("/api/v2/mix/order/fills?productType={PRODUCT_TYPE}");
        if let Some(symbol) = symbol {
            path.push_str(&format!("&symbol={symbol}"));
        }
        if let Some(since) = since {
            path.push_str(&format!("&startTime={}", since.timestamp_millis()));
        }
        let data: FillListDto = self.signed_get(&path).await?;

        data.fill_list
            .unwrap_or_default()
            .into_iter()
            .map(|dto| {
                let (fee, fee_coin) = dto
                    .fee_detail
                    .first()
                    .map(|f| (f.total_fee.clone(), f.fee_coin.clone()))
                    .unwrap_or_else(|| ("0".to_string(), MARGIN_COIN.to_string()));
                Ok(Fill {
                    trade_id: dto.trade_id,
                    order_id: dto.order_id,
                    client_order_id: None,
                    side: side_from(&dto.side),
                    quantity: dec_field(&dto.base_volume, "baseVolume")?,
                    price: dec_field(&dto.price, "price")?,
                    fee: dec_field(&fee, "totalFee")?.abs(),
                    fee_currency: fee_coin,
                    executed_at: ms_field(&dto.c_time, "cTime")?,
                    symbol: dto.symbol,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome> {
        let _: serde_json::Value = self
            .signed_post(
                "/api/v2/mix/account/set-leverage",
                serde_json::json!({
                    "symbol": symbol,
                    "productType": PRODUCT_TYPE,
                    "marginCoin": MARGIN_COIN,
                    "leverage": leverage.to_string(),
                }),
            )
            .await?;
        Ok(LeverageOutcome::Applied)
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PlaceDto {
            order_id: String,
            client_oid: String,
        }

        let mut body = serde_json::json!({
            "symbol": request.symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "side": match request.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            "size": request.amount.to_string(),
            "clientOid": request.client_order_id,
            "reduceOnly": if request.reduce_only { "YES" } else { "NO" },
        });

        match request.order_type {
            OrderType::Limit => {
                body["orderType"] = "limit".into();
                body["force"] = "gtc".into();
                if let Some(price) = request.price {
                    body["price"] = price.to_string().into();
                }
            }
            _ => {
                body["orderType"] = "market".into();
            }
        }

        // Attached protective prices when the entry carries them.
        if let Some(stop_loss) = request.stop_loss {
            body["presetStopLossPrice"] = stop_loss.to_string().into();
        }
        if let Some(take_profit) = request.take_profit {
            body["presetStopSurplusPrice"] = take_profit.to_string().into();
        }

        let placed: PlaceDto = self.signed_post("/api/v2/mix/order/place-order", body).await?;
        Ok(PlacedOrder {
            exchange_order_id: placed.order_id,
            client_order_id: Some(placed.client_oid),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.amount,
            price: request.price.unwrap_or(Decimal::ZERO),
            filled: Decimal::ZERO,
            status: "live".to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed_post(
                "/api/v2/mix/order/cancel-order",
                serde_json::json!({
                    "symbol": symbol,
                    "productType": PRODUCT_TYPE,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn adapter() -> BitgetAdapter {
        BitgetAdapter::new(
            &Credentials {
                api_key: "key".into(),
                api_secret: "secret".into(),
                passphrase: Some("phrase".into()),
            },
            false,
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn requires_a_passphrase() {
        let err = BitgetAdapter::new(
            &Credentials {
                api_key: "key".into(),
                api_secret: "secret".into(),
                passphrase: None,
            },
            false,
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert_eq!(err.code(), "auth/credentials_invalid");
    }

    #[test]
    fn envelope_classification() {
        let auth: Envelope<i32> = Envelope {
            code: "40037".into(),
            msg: "apikey does not exist".into(),
            data: None,
        };
        assert_eq!(
            unwrap_envelope(auth).unwrap_err().code(),
            "auth/credentials_invalid"
        );

        let ok: Envelope<i32> = Envelope {
            code: "00000".into(),
            msg: "success".into(),
            data: Some(1),
        };
        assert_eq!(unwrap_envelope(ok).unwrap(), 1);
    }

    #[test]
    fn signature_is_base64() {
        let signature = adapter().sign("1717243200000", "GET", "/api/v2/public/time", "");
        assert!(B64.decode(&signature).is_ok());
    }
}
