//! Profit-and-loss snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// An append-only PnL snapshot emitted by the reconciler.
#[derive(Debug, Clone)]
pub struct PnlRecord {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub realized: Decimal,
    pub unrealized: Decimal,
    /// `realized + unrealized` at snapshot time.
    pub equity: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl PnlRecord {
    /// Build a snapshot, deriving equity from the two components.
    #[must_use]
    pub fn snapshot(
        account_id: &str,
        user_id: &str,
        realized: Decimal,
        unrealized: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            user_id: user_id.to_string(),
            realized,
            unrealized,
            equity: realized + unrealized,
            recorded_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equity_is_realized_plus_unrealized() {
        let record = PnlRecord::snapshot("acct", "user", dec!(10.5), dec!(-2.25), Utc::now());
        assert_eq!(record.equity, dec!(8.25));
    }
}
