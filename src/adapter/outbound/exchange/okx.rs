//! OKX v5 adapter (USDT swaps).
//!
//! Signing: base64 HMAC-SHA256 over `timestamp + method + requestPath +
//! body`, with key, ISO timestamp, and passphrase in `OK-ACCESS-*` headers.
//! Demo trading is selected per request with `x-simulated-trading: 1`
//! instead of a separate base URL.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use super::rest::{dec_field, decode, ms_field, RestClient};
use crate::domain::account::{Credentials, Exchange};
use crate::domain::order::{OrderSide, OrderType};
use crate::domain::position::PositionSide;
use crate::error::{Error, Result};
use crate::port::outbound::exchange::{
    BalanceCheck, ExchangeAdapter, Fill, LeverageOutcome, LivePosition, PlaceOrderRequest,
    PlacedOrder, Ticker,
};

const BASE_URL: &str = "https://www.okx.com";

#[derive(Debug)]
pub struct OkxAdapter {
    client: RestClient,
    api_key: String,
    api_secret: String,
    passphrase: String,
    simulated: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Vec<T>,
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<Vec<T>> {
    match envelope.code.as_str() {
        "0" => Ok(envelope.data),
        "50111" | "50113" | "50114" => Err(Error::CredentialsInvalid(envelope.msg)),
        "50011" | "50013" => Err(Error::ExchangeThrottled(envelope.msg)),
        code => Err(Error::ExchangeLogical(format!("code {code}: {}", envelope.msg))),
    }
}

impl OkxAdapter {
    pub fn new(creds: &Credentials, testnet: bool, timeout: std::time::Duration) -> Result<Self> {
        let passphrase = creds
            .passphrase
            .clone()
            .ok_or_else(|| Error::CredentialsInvalid("okx requires a passphrase".into()))?;
        Ok(Self {
            client: RestClient::new(BASE_URL, timeout)?,
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            passphrase,
            simulated: testnet,
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
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut headers = vec![
            ("OK-ACCESS-KEY", self.api_key.clone()),
            (
                "OK-ACCESS-SIGN",
                self.sign(&timestamp, method, request_path, body),
            ),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", self.passphrase.clone()),
        ];
        if self.simulated {
            headers.push(("x-simulated-trading", "1".to_string()));
        }
        headers
    }

    async fn signed_get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<Vec<T>> {
        let headers = self.auth_headers("GET", path_and_query, "");
        let body = self.client.get(path_and_query, &headers).await?;
        unwrap_envelope(decode(&body)?)
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Vec<T>> {
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
struct TickerDto {
    last: String,
    ts: String,
}

#[derive(Deserialize)]
struct BalanceDto {
    details: Vec<BalanceDetailDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetailDto {
    ccy: String,
    avail_bal: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    inst_id: String,
    pos_side: String,
    pos: String,
    avg_px: String,
    mark_px: String,
    upl: String,
    realized_pnl: Option<String>,
    lever: String,
    liq_px: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    ord_id: String,
    cl_ord_id: String,
    inst_id: String,
    side: String,
    ord_type: String,
    sz: String,
    px: String,
    acc_fill_sz: String,
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillDto {
    trade_id: String,
    ord_id: String,
    cl_ord_id: String,
    inst_id: String,
    side: String,
    fill_sz: String,
    fill_px: String,
    fee: String,
    fee_ccy: String,
    ts: String,
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    fn normalize_symbol(&self, raw: &str) -> String {
        // "BTCUSDT" / "BTCUSDT.P" → "BTC-USDT-SWAP"; instrument ids that
        // already carry dashes pass through uppercased.
        let upper = raw.to_ascii_uppercase();
        let bare = upper.rsplit(':').next().unwrap_or(&upper);
        if bare.contains('-') {
            return bare.to_string();
        }
        let bare = bare.strip_suffix(".P").unwrap_or(bare);
        let compact: String = bare.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        for quote in ["USDT", "USDC", "USD"] {
            if let Some(base) = compact.strip_suffix(quote) {
                if !base.is_empty() {
                    return format!("{base}-{quote}-SWAP");
                }
            }
        }
        compact
    }

    async fn ping(&self) -> Result<bool> {
        self.client.get("/api/v5/public/time", &[]).await?;
        Ok(true)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let body = self
            .client
            .get(&format!("/api/v5/market/ticker?instId={symbol}"), &[])
            .await?;
        let data: Vec<TickerDto> = unwrap_envelope(decode(&body)?)?;
        let first = data
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExchangeLogical(format!("unknown instrument {symbol}")))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: dec_field(&first.last, "last")?,
            timestamp: ms_field(&first.ts, "ts")?,
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, Decimal>> {
        let data: Vec<BalanceDto> = self.signed_get("/api/v5/account/balance").await?;
        let mut balances = HashMap::new();
        for account in data {
            for detail in account.details {
                let free = dec_field(&detail.avail_bal, "availBal")?;
                if free > Decimal::ZERO {
                    balances.insert(detail.ccy, free);
                }
            }
        }
        Ok(balances)
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<LivePosition>> {
        let path = match symbol {
            Some(symbol) => format!("/api/v5/account/positions?instId={symbol}"),
            None => "/api/v5/account/positions".to_string(),
        };
        let data: Vec<PositionDto> = self.signed_get(&path).await?;

        let mut positions = Vec::new();
        for dto in data {
            let pos = dec_field(&dto.pos, "pos")?;
            if pos.is_zero() {
                continue;
            }
            // Net mode reports "net" with a signed quantity.
            let side = match dto.pos_side.as_str() {
                "short" => PositionSide::Short,
                "long" => PositionSide::Long,
                _ if pos < Decimal::ZERO => PositionSide::Short,
                _ => PositionSide::Long,
            };
            let liquidation = dec_field(&dto.liq_px, "liqPx")?;
            positions.push(LivePosition {
                symbol: dto.inst_id,
                side,
                size: pos.abs(),
                entry_price: dec_field(&dto.avg_px, "avgPx")?,
                mark_price: dec_field(&dto.mark_px, "markPx")?,
                unrealized_pnl: dec_field(&dto.upl, "upl")?,
                realized_pnl: dto
                    .realized_pnl
                    .as_deref()
                    .map(|v| dec_field(v, "realizedPnl"))
                    .transpose()?
                    .unwrap_or(Decimal::ZERO),
                leverage: dec_field(&dto.lever, "lever")?.to_u32().unwrap_or(1),
                liquidation_price: (!liquidation.is_zero()).then_some(liquidation),
            });
        }
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<PlacedOrder>> {
        let path = match symbol {
            Some(symbol) => format!("/api/v5/trade/orders-pending?instId={symbol}"),
            None => "/api/v5/trade/orders-pending".to_string(),
        };
        let data: Vec<OrderDto> = self.signed_get(&path).await?;

        data.into_iter()
            .map(|dto| {
                Ok(PlacedOrder {
                    exchange_order_id: dto.ord_id,
                    client_order_id: (!dto.cl_ord_id.is_empty()).then_some(dto.cl_ord_id),
                    side: side_from(&dto.side),
                    order_type: if dto.ord_type == "limit" {
                        OrderType::Limit
                    } else {
                        OrderType::Market
                    },
                    quantity: dec_field(&dto.sz, "sz")?,
                    price: dec_field(&dto.px, "px")?,
                    filled: dec_field(&dto.acc_fill_sz, "accFillSz")?,
                    symbol: dto.inst_id,
                    status: dto.state,
                })
            })
            .collect()
    }

    async fn get_trades(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>> {
        let mut path = "/api/v5/trade/fills?instType=SWAP".to_string();
        if let Some(symbol) = symbol {
            path.push_str(&format!("&instId={symbol}"));
        }
        if let Some(since) = since {
            path.push_str(&format!("&begin={}", since.timestamp_millis()));
        }
        let data: Vec<FillDto> = self.signed_get(&path).await?;

        data.into_iter()
            .map(|dto| {
                Ok(Fill {
                    trade_id: dto.trade_id,
                    order_id: dto.ord_id,
                    client_order_id: (!dto.cl_ord_id.is_empty()).then_some(dto.cl_ord_id),
                    side: side_from(&dto.side),
                    quantity: dec_field(&dto.fill_sz, "fillSz")?,
                    // Fees come back negative; store the magnitude.
                    price: dec_field(&dto.fill_px, "fillPx")?,
                    fee: dec_field(&dto.fee, "fee")?.abs(),
                    fee_currency: dto.fee_ccy,
                    executed_at: ms_field(&dto.ts, "ts")?,
                    symbol: dto.inst_id,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageOutcome> {
        let _: Vec<serde_json::Value> = self
            .signed_post(
                "/api/v5/account/set-leverage",
                serde_json::json!({
                    "instId": symbol,
                    "lever": leverage.to_string(),
                    "mgnMode": "cross",
                }),
            )
            .await?;
        Ok(LeverageOutcome::Applied)
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PlaceDto {
            ord_id: String,
            cl_ord_id: String,
        }

        let side = match request.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };

        // Protective legs go through the algo-order endpoint as triggers.
        if matches!(
            request.order_type,
            OrderType::Stop | OrderType::StopLimit | OrderType::TakeProfit
        ) {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct AlgoDto {
                algo_id: String,
            }

            let data: Vec<AlgoDto> = self
                .signed_post(
                    "/api/v5/trade/order-algo",
                    serde_json::json!({
                        "instId": request.symbol,
                        "tdMode": "cross",
                        "side": side,
                        "ordType": "trigger",
                        "sz": request.amount.to_string(),
                        "algoClOrdId": request.client_order_id,
                        "reduceOnly": request.reduce_only,
                        "triggerPx": request.price.unwrap_or(Decimal::ZERO).to_string(),
                        "orderPx": "-1",
                    }),
                )
                .await?;
            let algo = data
                .into_iter()
                .next()
                .ok_or_else(|| Error::ExchangeTransient("empty algo order response".into()))?;
            return Ok(PlacedOrder {
                exchange_order_id: algo.algo_id,
                client_order_id: Some(request.client_order_id.clone()),
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                quantity: request.amount,
                price: request.price.unwrap_or(Decimal::ZERO),
                filled: Decimal::ZERO,
                status: "live".to_string(),
            });
        }

        let mut body = serde_json::json!({
            "instId": request.symbol,
            "tdMode": "cross",
            "side": side,
            "sz": request.amount.to_string(),
            "clOrdId": request.client_order_id,
            "reduceOnly": request.reduce_only,
        });
        match request.order_type {
            OrderType::Limit => {
                body["ordType"] = "limit".into();
                if let Some(price) = request.price {
                    body["px"] = price.to_string().into();
                }
            }
            _ => {
                body["ordType"] = "market".into();
            }
        }

        let data: Vec<PlaceDto> = self.signed_post("/api/v5/trade/order", body).await?;
        let placed = data
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExchangeTransient("empty order response".into()))?;
        Ok(PlacedOrder {
            exchange_order_id: placed.ord_id,
            client_order_id: (!placed.cl_ord_id.is_empty()).then_some(placed.cl_ord_id),
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
        let _: Vec<serde_json::Value> = self
            .signed_post(
                "/api/v5/trade/cancel-order",
                serde_json::json!({ "instId": symbol, "ordId": order_id }),
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
        // Quote currency is the middle segment of "BTC-USDT-SWAP".
        let quote = symbol.split('-').nth(1).unwrap_or("USDT").to_string();
        let balances = self.get_balance().await?;
        let free = balances.get(&quote).copied().unwrap_or(Decimal::ZERO);
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

    fn adapter() -> OkxAdapter {
        OkxAdapter::new(
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
        let err = OkxAdapter::new(
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
    fn normalizes_to_swap_instrument_ids() {
        let adapter = adapter();
        assert_eq!(adapter.normalize_symbol("BTCUSDT"), "BTC-USDT-SWAP");
        assert_eq!(adapter.normalize_symbol("BTCUSDT.P"), "BTC-USDT-SWAP");
        assert_eq!(adapter.normalize_symbol("OKX:ethusdt"), "ETH-USDT-SWAP");
        assert_eq!(adapter.normalize_symbol("BTC-USDT-SWAP"), "BTC-USDT-SWAP");
    }

    #[test]
    fn signature_is_base64() {
        let signature = adapter().sign(
            "2024-06-01T12:00:00.000Z",
            "GET",
            "/api/v5/account/balance",
            "",
        );
        assert!(B64.decode(&signature).is_ok());
    }

    #[test]
    fn envelope_classification() {
        let auth: Envelope<i32> = Envelope {
            code: "50111".into(),
            msg: "invalid key".into(),
            data: vec![],
        };
        assert_eq!(
            unwrap_envelope(auth).unwrap_err().code(),
            "auth/credentials_invalid"
        );

        let logical: Envelope<i32> = Envelope {
            code: "51000".into(),
            msg: "param error".into(),
            data: vec![],
        };
        assert_eq!(
            unwrap_envelope(logical).unwrap_err().code(),
            "exchange/logical"
        );
    }
}
