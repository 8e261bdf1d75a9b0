//! SQLite exchange account store.

use chrono::Utc;
use diesel::prelude::*;

use super::database::connection::DbPool;
use super::database::model::AccountRow;
use super::database::schema::exchange_accounts;
use crate::domain::account::{Exchange, ExchangeAccount};
use crate::error::{Error, Result};
use crate::port::outbound::store::AccountStore;

/// SQLite-backed account store.
pub struct SqliteAccountStore {
    pool: DbPool,
}

impl SqliteAccountStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or update an account row (operator seeding, tests).
    pub async fn upsert(&self, account: &ExchangeAccount) -> Result<()> {
        let row = AccountRow::from_domain(account);
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::replace_into(exchange_accounts::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

impl AccountStore for SqliteAccountStore {
    async fn get(&self, id: &str) -> Result<Option<ExchangeAccount>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<AccountRow> = exchange_accounts::table
            .find(id)
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn primary_for(&self, user_id: &str, exchange: Exchange) -> Result<Option<ExchangeAccount>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<AccountRow> = exchange_accounts::table
            .filter(exchange_accounts::user_id.eq(user_id))
            .filter(exchange_accounts::exchange.eq(exchange.as_str()))
            .filter(exchange_accounts::is_primary.eq(true))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn any_primary(&self, user_id: &str) -> Result<Option<ExchangeAccount>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<AccountRow> = exchange_accounts::table
            .filter(exchange_accounts::user_id.eq(user_id))
            .filter(exchange_accounts::is_primary.eq(true))
            .order(exchange_accounts::active.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn list_active(&self) -> Result<Vec<ExchangeAccount>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let rows: Vec<AccountRow> = exchange_accounts::table
            .filter(exchange_accounts::active.eq(true))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(AccountRow::into_domain).collect()
    }

    async fn deactivate(&self, id: &str) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::update(exchange_accounts::table.find(id))
            .set((
                exchange_accounts::active.eq(false),
                exchange_accounts::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
    use crate::adapter::outbound::sqlite::test_fixtures::seed_webhook_owner;

    fn store() -> SqliteAccountStore {
        let pool = create_pool(":memory:").expect("create pool");
        run_migrations(&pool).expect("run migrations");
        seed_webhook_owner(&pool);
        SqliteAccountStore::new(pool)
    }

    #[tokio::test]
    async fn primary_resolution_by_exchange() {
        let store = store();

        let primary = store
            .primary_for("user-1", Exchange::Binance)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(primary.id, "acct-1");

        assert!(store
            .primary_for("user-1", Exchange::Okx)
            .await
            .unwrap()
            .is_none());

        let any = store.any_primary("user-1").await.unwrap().unwrap();
        assert_eq!(any.id, "acct-1");
    }

    #[tokio::test]
    async fn deactivate_removes_from_active_listing() {
        let store = store();
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        store.deactivate("acct-1").await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());

        let account = store.get("acct-1").await.unwrap().unwrap();
        assert!(!account.active);
    }
}
