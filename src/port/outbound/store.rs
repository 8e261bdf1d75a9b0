//! Persistence ports for the relational store.
//!
//! One trait per aggregate. The positions replace operation is the only
//! explicitly transactional contract; everything else is row-level.

use std::future::Future;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::account::{Exchange, ExchangeAccount};
use crate::domain::job::{Job, JobStatus};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::pnl::PnlRecord;
use crate::domain::position::Position;
use crate::domain::trade::Trade;
use crate::domain::webhook::{Webhook, WebhookStatus};
use crate::error::Result;

/// Outcome of the atomic insert-or-fetch on the job table.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    /// A fresh job row was inserted.
    Created(Job),
    /// The alert identifier already had a job; nothing was inserted.
    Existing(Job),
}

impl DedupOutcome {
    /// The job regardless of which branch was taken.
    #[must_use]
    pub fn job(&self) -> &Job {
        match self {
            Self::Created(job) | Self::Existing(job) => job,
        }
    }

    /// True when this outcome represents a duplicate delivery.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

/// A fresh job to persist.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub alert_id: String,
    pub webhook_id: String,
    pub account_id: Option<String>,
    pub user_id: String,
    pub payload: String,
}

/// Storage operations for jobs.
pub trait JobStore: Send + Sync {
    /// Atomically insert a pending job keyed by alert identifier, or fetch
    /// the existing one when the unique constraint fires.
    fn insert_or_get(&self, job: NewJob) -> impl Future<Output = Result<DedupOutcome>> + Send;

    /// Get a job by its local identifier.
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Get a job by its alert identifier.
    fn get_by_alert(&self, alert_id: &str) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Transition a job's status.
    fn set_status(&self, id: &str, status: JobStatus)
        -> impl Future<Output = Result<()>> + Send;

    /// Mark a job completed with a completion timestamp.
    fn complete(&self, id: &str, at: DateTime<Utc>) -> impl Future<Output = Result<()>> + Send;

    /// Mark a job failed, storing the classified error and bumping the
    /// retry count.
    fn fail(&self, id: &str, error: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Storage operations for orders.
pub trait OrderStore: Send + Sync {
    /// Insert or update an order keyed by its local identifier.
    fn upsert(&self, order: &Order) -> impl Future<Output = Result<()>> + Send;

    /// Find by the exchange-assigned order identifier.
    fn find_by_exchange_order_id(
        &self,
        account_id: &str,
        exchange_order_id: &str,
    ) -> impl Future<Output = Result<Option<Order>>> + Send;

    /// Find by our client order identifier.
    fn find_by_client_order_id(
        &self,
        account_id: &str,
        client_order_id: &str,
    ) -> impl Future<Output = Result<Option<Order>>> + Send;

    /// Most recent order in an open state for a symbol, if any.
    fn latest_open_for_symbol(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> impl Future<Output = Result<Option<Order>>> + Send;

    /// Update fill progress on an order.
    fn update_fill(
        &self,
        id: &str,
        filled: Decimal,
        remaining: Decimal,
        status: OrderStatus,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Storage operations for trades.
pub trait TradeStore: Send + Sync {
    /// Insert trades whose `(trade_id, order_id)` pair is new.
    ///
    /// Returns the trades actually inserted, in input order.
    fn insert_new(&self, trades: &[Trade]) -> impl Future<Output = Result<Vec<Trade>>> + Send;

    /// Timestamp of the most recent trade for an account, used as the
    /// reconciliation watermark.
    fn latest_timestamp(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>>> + Send;

    /// All trades belonging to one order.
    fn for_order(&self, order_id: &str) -> impl Future<Output = Result<Vec<Trade>>> + Send;
}

/// Storage operations for positions.
pub trait PositionStore: Send + Sync {
    /// Replace the full set of open positions for an account in a single
    /// transaction: upsert present rows, delete absent ones.
    ///
    /// A reader never observes a partially-replaced set.
    fn replace_all(
        &self,
        account_id: &str,
        positions: &[Position],
    ) -> impl Future<Output = Result<()>> + Send;

    /// All open positions for an account.
    fn list(&self, account_id: &str) -> impl Future<Output = Result<Vec<Position>>> + Send;

    /// The open position for one symbol, if any.
    fn get(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> impl Future<Output = Result<Option<Position>>> + Send;
}

/// Storage operations for PnL snapshots.
pub trait PnlStore: Send + Sync {
    /// Append a snapshot.
    fn insert(&self, record: &PnlRecord) -> impl Future<Output = Result<()>> + Send;

    /// Snapshots for an account, newest first.
    fn list(
        &self,
        account_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<PnlRecord>>> + Send;
}

/// Storage operations for exchange accounts.
pub trait AccountStore: Send + Sync {
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<ExchangeAccount>>> + Send;

    /// The owner's primary account for one exchange.
    fn primary_for(
        &self,
        user_id: &str,
        exchange: Exchange,
    ) -> impl Future<Output = Result<Option<ExchangeAccount>>> + Send;

    /// The owner's primary account on any exchange, preferring active ones.
    fn any_primary(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<ExchangeAccount>>> + Send;

    /// All active accounts, across users. The reconciler schedules from this.
    fn list_active(&self) -> impl Future<Output = Result<Vec<ExchangeAccount>>> + Send;

    /// Deactivate an account (auth failures, operator action).
    fn deactivate(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Storage operations for webhooks.
pub trait WebhookStore: Send + Sync {
    /// Look up a webhook by its URL path segment.
    fn find_by_path(&self, url_path: &str)
        -> impl Future<Output = Result<Option<Webhook>>> + Send;

    /// Record a delivery outcome: success resets the consecutive-error
    /// counter, failure increments it. Returns the updated webhook.
    fn record_delivery(
        &self,
        id: &str,
        success: bool,
    ) -> impl Future<Output = Result<Webhook>> + Send;

    /// Transition a webhook's status.
    fn set_status(
        &self,
        id: &str,
        status: WebhookStatus,
    ) -> impl Future<Output = Result<()>> + Send;
}
