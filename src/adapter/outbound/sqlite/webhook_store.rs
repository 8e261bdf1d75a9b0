//! SQLite webhook store.

use chrono::Utc;
use diesel::prelude::*;

use super::database::connection::DbPool;
use super::database::model::WebhookRow;
use super::database::schema::webhooks;
use crate::domain::webhook::{Webhook, WebhookStatus};
use crate::error::{Error, Result};
use crate::port::outbound::store::WebhookStore;

/// SQLite-backed webhook store.
pub struct SqliteWebhookStore {
    pool: DbPool,
}

impl SqliteWebhookStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or update a webhook row (operator seeding, tests).
    pub async fn upsert(&self, webhook: &Webhook) -> Result<()> {
        let row = WebhookRow::from_domain(webhook);
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::replace_into(webhooks::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

impl WebhookStore for SqliteWebhookStore {
    async fn find_by_path(&self, url_path: &str) -> Result<Option<Webhook>> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let row: Option<WebhookRow> = webhooks::table
            .filter(webhooks::url_path.eq(url_path))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(WebhookRow::into_domain).transpose()
    }

    async fn record_delivery(&self, id: &str, success: bool) -> Result<Webhook> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        if success {
            diesel::update(webhooks::table.find(id))
                .set((
                    webhooks::consecutive_errors.eq(0),
                    webhooks::deliveries_total.eq(webhooks::deliveries_total + 1),
                    webhooks::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        } else {
            diesel::update(webhooks::table.find(id))
                .set((
                    webhooks::consecutive_errors.eq(webhooks::consecutive_errors + 1),
                    webhooks::deliveries_total.eq(webhooks::deliveries_total + 1),
                    webhooks::deliveries_failed.eq(webhooks::deliveries_failed + 1),
                    webhooks::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        let row: WebhookRow = webhooks::table
            .find(id)
            .first(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        row.into_domain()
    }

    async fn set_status(&self, id: &str, status: WebhookStatus) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Connection(e.to_string()))?;
        diesel::update(webhooks::table.find(id))
            .set((
                webhooks::status.eq(status.as_str()),
                webhooks::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
