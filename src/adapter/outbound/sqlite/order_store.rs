//! SQLite order store.

use chrono::Utc;
use diesel::prelude::*;
use rust_decimal::Decimal;

use super::database::connection::DbPool;
use super::database::model::OrderRow;
use super::database::schema::orders;
use crate::domain::order::{Order, OrderStatus};
use crate::error::{Error, Result};
use crate::port::outbound::store::OrderStore;

/// Order statuses considered open for the price fallback chain.
const OPEN_STATUSES: [&str; 4] = ["pending", "submitted", "open", "partially_filled"];

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    pool: DbPool,
}

impl SqliteOrderStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl OrderStore for SqliteOrderStore {
    async fn upsert(&self, order: &Order) -> Result<()> {
        let row = OrderRow::from_domain(order);
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;

        diesel::replace_into(orders::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_by_exchange_order_id(
        &self,
        account_id: &str,
        exchange_order_id: &str,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<OrderRow> = orders::table
            .filter(orders::account_id.eq(account_id))
            .filter(orders::exchange_order_id.eq(exchange_order_id))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn find_by_client_order_id(
        &self,
        account_id: &str,
        client_order_id: &str,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<OrderRow> = orders::table
            .filter(orders::account_id.eq(account_id))
            .filter(orders::client_order_id.eq(client_order_id))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn latest_open_for_symbol(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<OrderRow> = orders::table
            .filter(orders::account_id.eq(account_id))
            .filter(orders::symbol.eq(symbol))
            .filter(orders::status.eq_any(OPEN_STATUSES))
            .order(orders::created_at.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn update_fill(
        &self,
        id: &str,
        filled: Decimal,
        remaining: Decimal,
        status: OrderStatus,
    ) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::update(orders::table.find(id))
            .set((
                orders::filled.eq(filled.to_string()),
                orders::remaining.eq(remaining.to_string()),
                orders::status.eq(status.as_str()),
                orders::updated_at.eq(Utc::now().to_rfc3339()),
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
    use crate::domain::account::Exchange;
    use crate::domain::order::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn store() -> SqliteOrderStore {
        let pool = create_pool(":memory:").expect("create pool");
        run_migrations(&pool).expect("run migrations");
        seed_webhook_owner(&pool);
        SqliteOrderStore::new(pool)
    }

    fn order(id: &str, symbol: &str, status: OrderStatus) -> Order {
        let at = Utc::now();
        Order {
            id: id.into(),
            client_order_id: format!("tv_A1_{id}"),
            exchange_order_id: Some(format!("ex-{id}")),
            account_id: "acct-1".into(),
            exchange: Exchange::Binance,
            symbol: symbol.into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.02),
            price: dec!(50000),
            filled: Decimal::ZERO,
            remaining: dec!(0.02),
            status,
            reduce_only: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn upsert_and_lookup_by_both_identifiers() {
        let store = store();
        let order = order("o1", "BTCUSDT", OrderStatus::Submitted);
        store.upsert(&order).await.unwrap();

        let by_exchange = store
            .find_by_exchange_order_id("acct-1", "ex-o1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_exchange.id, "o1");

        let by_client = store
            .find_by_client_order_id("acct-1", "tv_A1_o1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_client.id, "o1");

        assert!(store
            .find_by_exchange_order_id("other-account", "ex-o1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn latest_open_skips_closed_orders() {
        let store = store();
        store
            .upsert(&order("o1", "BTCUSDT", OrderStatus::Filled))
            .await
            .unwrap();
        store
            .upsert(&order("o2", "BTCUSDT", OrderStatus::Open))
            .await
            .unwrap();
        store
            .upsert(&order("o3", "ETHUSDT", OrderStatus::Open))
            .await
            .unwrap();

        let latest = store
            .latest_open_for_symbol("acct-1", "BTCUSDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "o2");

        assert!(store
            .latest_open_for_symbol("acct-1", "SOLUSDT")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_fill_persists_progress() {
        let store = store();
        store
            .upsert(&order("o1", "BTCUSDT", OrderStatus::Open))
            .await
            .unwrap();

        store
            .update_fill("o1", dec!(0.02), Decimal::ZERO, OrderStatus::Filled)
            .await
            .unwrap();

        let updated = store
            .find_by_exchange_order_id("acct-1", "ex-o1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.filled, dec!(0.02));
        assert_eq!(updated.remaining, Decimal::ZERO);
        assert_eq!(updated.status, OrderStatus::Filled);
    }
}
