//! SQLite trade store.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::database::connection::DbPool;
use super::database::model::{parse_datetime, TradeRow};
use super::database::schema::trades;
use crate::domain::trade::Trade;
use crate::error::{Error, Result};
use crate::port::outbound::store::TradeStore;

/// SQLite-backed trade store.
pub struct SqliteTradeStore {
    pool: DbPool,
}

impl SqliteTradeStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TradeStore for SqliteTradeStore {
    async fn insert_new(&self, new_trades: &[Trade]) -> Result<Vec<Trade>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let mut inserted = Vec::new();

        for trade in new_trades {
            let row = TradeRow::from_domain(trade);
            // The (trade_id, order_id) unique constraint filters replays.
            let count = diesel::insert_into(trades::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
            if count > 0 {
                inserted.push(trade.clone());
            }
        }
        Ok(inserted)
    }

    async fn latest_timestamp(&self, account_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        // RFC 3339 text sorts chronologically.
        let latest: Option<String> = trades::table
            .filter(trades::account_id.eq(account_id))
            .select(trades::executed_at)
            .order(trades::executed_at.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        latest.as_deref().map(parse_datetime).transpose()
    }

    async fn for_order(&self, order_id: &str) -> Result<Vec<Trade>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let rows: Vec<TradeRow> = trades::table
            .filter(trades::order_id.eq(order_id))
            .order(trades::executed_at.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(TradeRow::into_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
    use crate::adapter::outbound::sqlite::test_fixtures::seed_webhook_owner;
    use crate::domain::order::OrderSide;
    use rust_decimal_macros::dec;

    fn store() -> SqliteTradeStore {
        let pool = create_pool(":memory:").expect("create pool");
        run_migrations(&pool).expect("run migrations");
        seed_webhook_owner(&pool);
        SqliteTradeStore::new(pool)
    }

    fn trade(trade_id: &str, order_id: &str, at: DateTime<Utc>) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            trade_id: trade_id.into(),
            order_id: order_id.into(),
            account_id: "acct-1".into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: dec!(50000),
            fee: dec!(0.2),
            fee_currency: "USDT".into(),
            executed_at: at,
        }
    }

    #[tokio::test]
    async fn duplicate_trade_order_pairs_are_skipped() {
        let store = store();
        let at = Utc::now();

        let first = store
            .insert_new(&[trade("t1", "ex-1", at), trade("t2", "ex-1", at)])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        // Replay of t1 on the same order is filtered; the same trade id on a
        // different order is new.
        let second = store
            .insert_new(&[trade("t1", "ex-1", at), trade("t1", "ex-2", at)])
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].order_id, "ex-2");
    }

    #[tokio::test]
    async fn watermark_is_latest_execution_time() {
        let store = store();
        assert!(store.latest_timestamp("acct-1").await.unwrap().is_none());

        let early = Utc::now() - chrono::Duration::hours(2);
        let late = Utc::now();
        store
            .insert_new(&[trade("t1", "ex-1", early), trade("t2", "ex-1", late)])
            .await
            .unwrap();

        let watermark = store.latest_timestamp("acct-1").await.unwrap().unwrap();
        assert!((watermark - late).num_seconds().abs() < 1);
    }

    #[tokio::test]
    async fn trades_group_by_owning_order() {
        let store = store();
        let at = Utc::now();
        store
            .insert_new(&[
                trade("t1", "ex-1", at),
                trade("t2", "ex-1", at),
                trade("t3", "ex-2", at),
            ])
            .await
            .unwrap();

        let fills = store.for_order("ex-1").await.unwrap();
        assert_eq!(fills.len(), 2);
    }
}
