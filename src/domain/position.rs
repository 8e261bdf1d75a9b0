//! Open exposure at an exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::Exchange;
use crate::domain::money::{Price, Qty};
use crate::domain::order::OrderSide;

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    /// The order side that closes a position held on this side.
    #[must_use]
    pub const fn closing_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }
}

impl std::str::FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("unknown position side: {other}")),
        }
    }
}

/// The currently open exposure for one symbol on one account.
///
/// At most one open position exists per `(account, symbol)`. Reconciliation
/// deletes rows whose exchange-side size has gone to zero; a zero-size row
/// is never retained.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub account_id: String,
    pub exchange: Exchange,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Qty,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Price,
    pub realized_pnl: Price,
    pub leverage: u32,
    pub liquidation_price: Option<Price>,
    pub updated_at: DateTime<Utc>,
}
