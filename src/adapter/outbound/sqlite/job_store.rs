//! SQLite job store.
//!
//! The unique constraint on `alert_id` is the deduplication mechanism: the
//! insert either lands or fires the constraint, in which case the existing
//! job is fetched and returned. There is no read-then-write window.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use super::database::connection::DbPool;
use super::database::model::JobRow;
use super::database::schema::jobs;
use crate::domain::job::{Job, JobStatus};
use crate::error::{Error, Result};
use crate::port::outbound::store::{DedupOutcome, JobStore, NewJob};

/// SQLite-backed job store.
pub struct SqliteJobStore {
    pool: DbPool,
}

impl SqliteJobStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<impl std::ops::DerefMut<Target = SqliteConnection>> {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }
}

impl JobStore for SqliteJobStore {
    async fn insert_or_get(&self, job: NewJob) -> Result<DedupOutcome> {
        let now = Utc::now();
        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: job.alert_id.clone(),
            webhook_id: job.webhook_id,
            account_id: job.account_id,
            user_id: job.user_id,
            payload: job.payload,
            status: JobStatus::Pending.as_str().to_string(),
            retry_count: 0,
            last_error: None,
            completed_at: None,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        let mut conn = self.conn()?;
        match diesel::insert_into(jobs::table).values(&row).execute(&mut *conn) {
            Ok(_) => Ok(DedupOutcome::Created(row.into_domain()?)),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                let existing: JobRow = jobs::table
                    .filter(jobs::alert_id.eq(&job.alert_id))
                    .first(&mut *conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
                Ok(DedupOutcome::Existing(existing.into_domain()?))
            }
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        let row: Option<JobRow> = jobs::table
            .find(id)
            .first(&mut *conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(JobRow::into_domain).transpose()
    }

    async fn get_by_alert(&self, alert_id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn()?;
        let row: Option<JobRow> = jobs::table
            .filter(jobs::alert_id.eq(alert_id))
            .first(&mut *conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(JobRow::into_domain).transpose()
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(status.as_str()),
                jobs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn complete(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(JobStatus::Completed.as_str()),
                jobs::completed_at.eq(at.to_rfc3339()),
                jobs::updated_at.eq(at.to_rfc3339()),
            ))
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(JobStatus::Failed.as_str()),
                jobs::last_error.eq(error),
                jobs::retry_count.eq(jobs::retry_count + 1),
                jobs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut *conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
