//! Inbound alert payloads.
//!
//! An [`Alert`] is the validated form of the JSON message a charting
//! platform posts to a webhook. It is never persisted as such: the verbatim
//! payload is stored on the job, and the executor re-validates from there so
//! it never touches raw JSON strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::account::Exchange;
use crate::error::{Error, Result};

/// Trading intent carried by an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Close,
    CloseAll,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Close => "close",
            Self::CloseAll => "close_all",
        }
    }

    /// True for actions that open or extend a position.
    #[must_use]
    pub const fn is_entry(self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

/// How the order quantity is derived from `size_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMode {
    /// Spend this many quote-currency units.
    Quote,
    /// This many base-currency units directly.
    Base,
    /// Raw contract count, subject to the symbol's contract size.
    Contracts,
    /// Percentage of free balance.
    Percentage,
    /// Synonymous with [`SizeMode::Quote`] when the quote currency is USDT.
    FixedUsdt,
}

/// Market segment requested by the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    Futures,
    Perp,
}

/// Validated alert payload.
///
/// Unknown fields are preserved verbatim in `extra` so they survive the trip
/// through the job table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub ticker: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mode: Option<SizeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<Exchange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_type: Option<MarketType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Alert {
    /// Decode and validate a raw payload.
    ///
    /// # Errors
    ///
    /// Returns `config/invalid_payload` when the body is not a JSON object
    /// with the required fields, or when a numeric field is non-positive.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let alert: Alert = serde_json::from_slice(raw)
            .map_err(|e| Error::InvalidPayload(format!("malformed alert JSON: {e}")))?;
        alert.validate()?;
        Ok(alert)
    }

    fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            return Err(Error::InvalidPayload("ticker cannot be empty".into()));
        }
        Self::require_positive("size_value", self.size_value)?;
        Self::require_positive("quantity", self.quantity)?;
        Self::require_positive("contracts", self.contracts)?;
        Self::require_positive("stop_loss", self.stop_loss)?;
        Self::require_positive("take_profit", self.take_profit)?;
        if let Some(leverage) = self.leverage {
            if leverage < 1 {
                return Err(Error::InvalidPayload("leverage must be >= 1".into()));
            }
        }
        Ok(())
    }

    fn require_positive(field: &str, value: Option<Decimal>) -> Result<()> {
        if let Some(v) = value {
            if v <= Decimal::ZERO {
                return Err(Error::InvalidPayload(format!(
                    "{field} must be positive, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Leverage with the default of 1 applied.
    #[must_use]
    pub fn effective_leverage(&self) -> u32 {
        self.leverage.unwrap_or(1).max(1)
    }

    /// The deduplication identifier: the supplied `alert_id`, or a
    /// fingerprint computed from the payload.
    #[must_use]
    pub fn dedup_id(&self, received_at: DateTime<Utc>) -> String {
        self.alert_id
            .clone()
            .unwrap_or_else(|| self.fingerprint(received_at))
    }

    /// Fingerprint over `ticker|action|strategy|size_value|epoch-seconds`.
    ///
    /// Used when the platform did not supply an `alert_id`; two identical
    /// alerts within the same second collapse into one job.
    #[must_use]
    pub fn fingerprint(&self, received_at: DateTime<Utc>) -> String {
        let material = format!(
            "{}|{}|{}|{}|{}",
            self.ticker,
            self.action.as_str(),
            self.strategy.as_deref().unwrap_or(""),
            self.size_value.map(|v| v.to_string()).unwrap_or_default(),
            received_at.timestamp(),
        );
        let digest = Sha256::digest(material.as_bytes());
        format!("fp{}", &hex::encode(digest)[..16])
    }
}
