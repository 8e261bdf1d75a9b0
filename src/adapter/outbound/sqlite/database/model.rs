//! Row structs and domain conversions for the SQLite store.
//!
//! Decimals and timestamps are stored as text: decimals keep full precision
//! and timestamps are RFC 3339 so watermark comparisons sort
//! lexicographically.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::{AsChangeset, Insertable, Queryable};
use rust_decimal::Decimal;

use super::schema::{
    exchange_accounts, jobs, orders, pnl_records, positions, trades, webhooks,
};
use crate::domain::account::{Exchange, ExchangeAccount};
use crate::domain::job::{Job, JobStatus};
use crate::domain::order::{Order, OrderSide, OrderStatus, OrderType};
use crate::domain::pnl::PnlRecord;
use crate::domain::position::{Position, PositionSide};
use crate::domain::trade::Trade;
use crate::domain::webhook::{RatePolicy, Webhook, WebhookStatus};
use crate::error::{Error, Result};

pub(crate) fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| Error::Parse(format!("bad decimal {s:?}: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T> {
    T::from_str(s).map_err(Error::Parse)
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = exchange_accounts)]
pub struct AccountRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub exchange: String,
    pub testnet: bool,
    pub active: bool,
    pub is_primary: bool,
    pub api_key_enc: String,
    pub api_secret_enc: String,
    pub passphrase_enc: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AccountRow {
    pub fn into_domain(self) -> Result<ExchangeAccount> {
        Ok(ExchangeAccount {
            exchange: Exchange::from_str(&self.exchange)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            testnet: self.testnet,
            active: self.active,
            is_primary: self.is_primary,
            api_key_enc: self.api_key_enc,
            api_secret_enc: self.api_secret_enc,
            passphrase_enc: self.passphrase_enc,
        })
    }

    pub fn from_domain(account: &ExchangeAccount) -> Self {
        Self {
            id: account.id.clone(),
            user_id: account.user_id.clone(),
            name: account.name.clone(),
            exchange: account.exchange.as_str().to_string(),
            testnet: account.testnet,
            active: account.active,
            is_primary: account.is_primary,
            api_key_enc: account.api_key_enc.clone(),
            api_secret_enc: account.api_secret_enc.clone(),
            passphrase_enc: account.passphrase_enc.clone(),
            created_at: account.created_at.to_rfc3339(),
            updated_at: account.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = webhooks)]
pub struct WebhookRow {
    pub id: String,
    pub user_id: String,
    pub url_path: String,
    pub secret: String,
    pub is_public: bool,
    pub status: String,
    pub max_per_minute: i32,
    pub max_per_hour: i32,
    pub error_threshold: i32,
    pub consecutive_errors: i32,
    pub deliveries_total: i64,
    pub deliveries_failed: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl WebhookRow {
    pub fn into_domain(self) -> Result<Webhook> {
        Ok(Webhook {
            status: parse_enum::<WebhookStatus>(&self.status)?,
            rate_policy: RatePolicy {
                max_per_minute: self.max_per_minute.max(0) as u32,
                max_per_hour: self.max_per_hour.max(0) as u32,
            },
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            url_path: self.url_path,
            secret: self.secret,
            is_public: self.is_public,
            error_threshold: self.error_threshold.max(0) as u32,
            consecutive_errors: self.consecutive_errors.max(0) as u32,
            deliveries_total: self.deliveries_total.max(0) as u64,
            deliveries_failed: self.deliveries_failed.max(0) as u64,
        })
    }

    pub fn from_domain(webhook: &Webhook) -> Self {
        Self {
            id: webhook.id.clone(),
            user_id: webhook.user_id.clone(),
            url_path: webhook.url_path.clone(),
            secret: webhook.secret.clone(),
            is_public: webhook.is_public,
            status: webhook.status.as_str().to_string(),
            max_per_minute: webhook.rate_policy.max_per_minute as i32,
            max_per_hour: webhook.rate_policy.max_per_hour as i32,
            error_threshold: webhook.error_threshold as i32,
            consecutive_errors: webhook.consecutive_errors as i32,
            deliveries_total: webhook.deliveries_total as i64,
            deliveries_failed: webhook.deliveries_failed as i64,
            created_at: webhook.created_at.to_rfc3339(),
            updated_at: webhook.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = jobs)]
pub struct JobRow {
    pub id: String,
    pub alert_id: String,
    pub webhook_id: String,
    pub account_id: Option<String>,
    pub user_id: String,
    pub payload: String,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    pub fn into_domain(self) -> Result<Job> {
        Ok(Job {
            status: parse_enum::<JobStatus>(&self.status)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            alert_id: self.alert_id,
            webhook_id: self.webhook_id,
            account_id: self.account_id,
            user_id: self.user_id,
            payload: self.payload,
            retry_count: self.retry_count.max(0) as u32,
            last_error: self.last_error,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = orders)]
pub struct OrderRow {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub account_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: String,
    pub price: String,
    pub filled: String,
    pub remaining: String,
    pub status: String,
    pub reduce_only: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderRow {
    pub fn into_domain(self) -> Result<Order> {
        Ok(Order {
            exchange: Exchange::from_str(&self.exchange)?,
            side: parse_enum::<OrderSide>(&self.side)?,
            order_type: parse_enum::<OrderType>(&self.order_type)?,
            quantity: parse_decimal(&self.quantity)?,
            price: parse_decimal(&self.price)?,
            filled: parse_decimal(&self.filled)?,
            remaining: parse_decimal(&self.remaining)?,
            status: parse_enum::<OrderStatus>(&self.status)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            client_order_id: self.client_order_id,
            exchange_order_id: self.exchange_order_id,
            account_id: self.account_id,
            symbol: self.symbol,
            reduce_only: self.reduce_only,
        })
    }

    pub fn from_domain(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            account_id: order.account_id.clone(),
            exchange: order.exchange.as_str().to_string(),
            symbol: order.symbol.clone(),
            side: order.side.as_str().to_string(),
            order_type: order.order_type.as_str().to_string(),
            quantity: order.quantity.to_string(),
            price: order.price.to_string(),
            filled: order.filled.to_string(),
            remaining: order.remaining.to_string(),
            status: order.status.as_str().to_string(),
            reduce_only: order.reduce_only,
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = trades)]
pub struct TradeRow {
    pub id: String,
    pub trade_id: String,
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub fee: String,
    pub fee_currency: String,
    pub executed_at: String,
}

impl TradeRow {
    pub fn into_domain(self) -> Result<Trade> {
        Ok(Trade {
            side: parse_enum::<OrderSide>(&self.side)?,
            quantity: parse_decimal(&self.quantity)?,
            price: parse_decimal(&self.price)?,
            fee: parse_decimal(&self.fee)?,
            executed_at: parse_datetime(&self.executed_at)?,
            id: self.id,
            trade_id: self.trade_id,
            order_id: self.order_id,
            account_id: self.account_id,
            symbol: self.symbol,
            fee_currency: self.fee_currency,
        })
    }

    pub fn from_domain(trade: &Trade) -> Self {
        Self {
            id: trade.id.clone(),
            trade_id: trade.trade_id.clone(),
            order_id: trade.order_id.clone(),
            account_id: trade.account_id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side.as_str().to_string(),
            quantity: trade.quantity.to_string(),
            price: trade.price.to_string(),
            fee: trade.fee.to_string(),
            fee_currency: trade.fee_currency.clone(),
            executed_at: trade.executed_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = positions)]
pub struct PositionRow {
    pub id: String,
    pub account_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub entry_price: String,
    pub mark_price: String,
    pub unrealized_pnl: String,
    pub realized_pnl: String,
    pub leverage: i32,
    pub liquidation_price: Option<String>,
    pub updated_at: String,
}

impl PositionRow {
    pub fn into_domain(self) -> Result<Position> {
        Ok(Position {
            exchange: Exchange::from_str(&self.exchange)?,
            side: parse_enum::<PositionSide>(&self.side)?,
            size: parse_decimal(&self.size)?,
            entry_price: parse_decimal(&self.entry_price)?,
            mark_price: parse_decimal(&self.mark_price)?,
            unrealized_pnl: parse_decimal(&self.unrealized_pnl)?,
            realized_pnl: parse_decimal(&self.realized_pnl)?,
            liquidation_price: self
                .liquidation_price
                .as_deref()
                .map(parse_decimal)
                .transpose()?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            account_id: self.account_id,
            symbol: self.symbol,
            leverage: self.leverage.max(1) as u32,
        })
    }

    pub fn from_domain(position: &Position) -> Self {
        Self {
            id: position.id.clone(),
            account_id: position.account_id.clone(),
            exchange: position.exchange.as_str().to_string(),
            symbol: position.symbol.clone(),
            side: position.side.as_str().to_string(),
            size: position.size.to_string(),
            entry_price: position.entry_price.to_string(),
            mark_price: position.mark_price.to_string(),
            unrealized_pnl: position.unrealized_pnl.to_string(),
            realized_pnl: position.realized_pnl.to_string(),
            leverage: position.leverage as i32,
            liquidation_price: position.liquidation_price.map(|p| p.to_string()),
            updated_at: position.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = pnl_records)]
pub struct PnlRow {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub realized: String,
    pub unrealized: String,
    pub equity: String,
    pub recorded_at: String,
}

impl PnlRow {
    pub fn into_domain(self) -> Result<PnlRecord> {
        Ok(PnlRecord {
            realized: parse_decimal(&self.realized)?,
            unrealized: parse_decimal(&self.unrealized)?,
            equity: parse_decimal(&self.equity)?,
            recorded_at: parse_datetime(&self.recorded_at)?,
            id: self.id,
            account_id: self.account_id,
            user_id: self.user_id,
        })
    }

    pub fn from_domain(record: &PnlRecord) -> Self {
        Self {
            id: record.id.clone(),
            account_id: record.account_id.clone(),
            user_id: record.user_id.clone(),
            realized: record.realized.to_string(),
            unrealized: record.unrealized.to_string(),
            equity: record.equity.to_string(),
            recorded_at: record.recorded_at.to_rfc3339(),
        }
    }
}
