//! SQLite position store.
//!
//! The replace operation runs in one transaction so a reader never observes
//! a partially-replaced set. Rows absent from the authoritative fetch are
//! deleted: local positions mirror the exchange, they are not a ledger.

use diesel::prelude::*;

use super::database::connection::DbPool;
use super::database::model::PositionRow;
use super::database::schema::positions;
use crate::domain::position::Position;
use crate::error::{Error, Result};
use crate::port::outbound::store::PositionStore;

/// SQLite-backed position store.
pub struct SqlitePositionStore {
    pool: DbPool,
}

impl SqlitePositionStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PositionStore for SqlitePositionStore {
    async fn replace_all(&self, account_id: &str, fresh: &[Position]) -> Result<()> {
        let rows: Vec<PositionRow> = fresh.iter().map(PositionRow::from_domain).collect();
        let symbols: Vec<String> = rows.iter().map(|r| r.symbol.clone()).collect();
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::delete(
                positions::table
                    .filter(positions::account_id.eq(account_id))
                    .filter(positions::symbol.ne_all(&symbols)),
            )
            .execute(conn)?;

            for row in &rows {
                // REPLACE resolves the (account_id, symbol) unique conflict.
                diesel::replace_into(positions::table).values(row).execute(conn)?;
            }
            Ok(())
        })
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self, account_id: &str) -> Result<Vec<Position>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let rows: Vec<PositionRow> = positions::table
            .filter(positions::account_id.eq(account_id))
            .order(positions::symbol.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(PositionRow::into_domain).collect()
    }

    async fn get(&self, account_id: &str, symbol: &str) -> Result<Option<Position>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<PositionRow> = positions::table
            .filter(positions::account_id.eq(account_id))
            .filter(positions::symbol.eq(symbol))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(PositionRow::into_domain).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
    use crate::adapter::outbound::sqlite::test_fixtures::seed_webhook_owner;
    use crate::domain::account::Exchange;
    use crate::domain::position::PositionSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn store() -> SqlitePositionStore {
        let pool = create_pool(":memory:").expect("create pool");
        run_migrations(&pool).expect("run migrations");
        seed_webhook_owner(&pool);
        SqlitePositionStore::new(pool)
    }

    fn position(symbol: &str, size: rust_decimal::Decimal) -> Position {
        Position {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: "acct-1".into(),
            exchange: Exchange::Binance,
            symbol: symbol.into(),
            side: PositionSide::Long,
            size,
            entry_price: dec!(50000),
            mark_price: dec!(50500),
            unrealized_pnl: dec!(10),
            realized_pnl: dec!(0),
            leverage: 10,
            liquidation_price: Some(dec!(45000)),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn replace_mirrors_the_authoritative_set() {
        let store = store();

        store
            .replace_all(
                "acct-1",
                &[position("BTCUSDT", dec!(0.5)), position("ETHUSDT", dec!(2))],
            )
            .await
            .unwrap();
        assert_eq!(store.list("acct-1").await.unwrap().len(), 2);

        // Next cycle: BTCUSDT closed on the exchange, ETHUSDT resized.
        store
            .replace_all("acct-1", &[position("ETHUSDT", dec!(3))])
            .await
            .unwrap();

        let remaining = store.list("acct-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].symbol, "ETHUSDT");
        assert_eq!(remaining[0].size, dec!(3));
        assert!(store.get("acct-1", "BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_fetch_clears_all_rows() {
        let store = store();
        store
            .replace_all("acct-1", &[position("BTCUSDT", dec!(0.5))])
            .await
            .unwrap();

        store.replace_all("acct-1", &[]).await.unwrap();
        assert!(store.list("acct-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_symbol() {
        let store = store();
        store
            .replace_all("acct-1", &[position("BTCUSDT", dec!(0.5))])
            .await
            .unwrap();
        store
            .replace_all("acct-1", &[position("BTCUSDT", dec!(0.7))])
            .await
            .unwrap();

        let rows = store.list("acct-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, dec!(0.7));
    }
}
