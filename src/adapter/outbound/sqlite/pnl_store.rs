//! SQLite PnL snapshot store.

use diesel::prelude::*;

use super::database::connection::DbPool;
use super::database::model::PnlRow;
use super::database::schema::pnl_records;
use crate::domain::pnl::PnlRecord;
use crate::error::{Error, Result};
use crate::port::outbound::store::PnlStore;

/// SQLite-backed, append-only PnL store.
pub struct SqlitePnlStore {
    pool: DbPool,
}

impl SqlitePnlStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PnlStore for SqlitePnlStore {
    async fn insert(&self, record: &PnlRecord) -> Result<()> {
        let row = PnlRow::from_domain(record);
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::insert_into(pnl_records::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, account_id: &str, limit: usize) -> Result<Vec<PnlRecord>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let rows: Vec<PnlRow> = pnl_records::table
            .filter(pnl_records::account_id.eq(account_id))
            .order(pnl_records::recorded_at.desc())
            .limit(limit as i64)
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(PnlRow::into_domain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
    use crate::adapter::outbound::sqlite::test_fixtures::seed_webhook_owner;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn snapshots_append_and_list_newest_first() {
        let pool = create_pool(":memory:").expect("create pool");
        run_migrations(&pool).expect("run migrations");
        seed_webhook_owner(&pool);
        let store = SqlitePnlStore::new(pool);

        let early = Utc::now() - chrono::Duration::minutes(5);
        let late = Utc::now();
        store
            .insert(&PnlRecord::snapshot("acct-1", "user-1", dec!(5), dec!(1), early))
            .await
            .unwrap();
        store
            .insert(&PnlRecord::snapshot("acct-1", "user-1", dec!(6), dec!(2), late))
            .await
            .unwrap();

        let records = store.list("acct-1", 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].equity, dec!(8));
        assert_eq!(records[1].equity, dec!(6));
    }
}
