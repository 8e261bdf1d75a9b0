//! Alert ingestion service.
//!
//! The full ingress pipeline behind `POST /webhook/tv/{urlPath}`: webhook
//! lookup, signature verification, rate limiting, payload validation,
//! account resolution, atomic dedup insert, and enqueue. Rejections never
//! create a job row; store failures after signature success are safe to
//! retry because the dedup insert is idempotent.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::signature;
use crate::domain::alert::Alert;
use crate::domain::webhook::{Webhook, WebhookStatus};
use crate::error::{Error, Result};
use crate::port::outbound::notifier::{Event, NotifierRegistry};
use crate::port::outbound::queue::{JobQueue, WorkItem, WorkPayload};
use crate::port::outbound::rate_limit::{RateDecision, RateLimiter};
use crate::port::outbound::store::{AccountStore, DedupOutcome, JobStore, NewJob, WebhookStore};

/// Outcome of an accepted ingress request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// The alert is now durable and will be attempted.
    Accepted { job_id: String, alert_id: String },
    /// The alert was already accepted; nothing new was enqueued.
    Duplicate { job_id: String, alert_id: String },
}

impl IntakeOutcome {
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::Accepted { job_id, .. } | Self::Duplicate { job_id, .. } => job_id,
        }
    }

    #[must_use]
    pub fn alert_id(&self) -> &str {
        match self {
            Self::Accepted { alert_id, .. } | Self::Duplicate { alert_id, .. } => alert_id,
        }
    }

    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// The intake gateway's application core.
pub struct IntakeService<WS, JS, AS> {
    webhooks: Arc<WS>,
    jobs: Arc<JS>,
    accounts: Arc<AS>,
    queue: Arc<dyn JobQueue>,
    limiter: Arc<dyn RateLimiter>,
    notifiers: Arc<NotifierRegistry>,
}

impl<WS, JS, AS> IntakeService<WS, JS, AS>
where
    WS: WebhookStore,
    JS: JobStore,
    AS: AccountStore,
{
    pub fn new(
        webhooks: Arc<WS>,
        jobs: Arc<JS>,
        accounts: Arc<AS>,
        queue: Arc<dyn JobQueue>,
        limiter: Arc<dyn RateLimiter>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        Self {
            webhooks,
            jobs,
            accounts,
            queue,
            limiter,
            notifiers,
        }
    }

    /// Ingest one delivery.
    ///
    /// # Errors
    ///
    /// Every rejection carries its taxonomy classification; the HTTP layer
    /// maps classifications to status codes.
    pub async fn ingest(
        &self,
        url_path: &str,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<IntakeOutcome> {
        let webhook = self
            .webhooks
            .find_by_path(url_path)
            .await?
            .ok_or_else(|| Error::WebhookNotFound(url_path.to_string()))?;

        if !webhook.accepts_deliveries() {
            return Err(Error::WebhookInactive(url_path.to_string()));
        }

        if let Err(err) = self.verify_signature(&webhook, body, signature_header) {
            self.record_failure(&webhook).await;
            return Err(err);
        }

        match self.limiter.check(&webhook.id, &webhook.rate_policy) {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after_secs } => {
                // No job is created and the alert identifier stays
                // unconsumed; the sender may retry after the window.
                return Err(Error::RateLimited { retry_after_secs });
            }
        }

        let received_at = Utc::now();
        let alert = Alert::parse(body)?;
        let alert_id = alert.dedup_id(received_at);

        let account = self.resolve_account(&webhook, &alert).await?;

        let outcome = self
            .jobs
            .insert_or_get(NewJob {
                alert_id: alert_id.clone(),
                webhook_id: webhook.id.clone(),
                account_id: Some(account.id.clone()),
                user_id: webhook.user_id.clone(),
                payload: String::from_utf8_lossy(body).into_owned(),
            })
            .await?;

        let result = match outcome {
            DedupOutcome::Created(job) => {
                self.queue
                    .enqueue(WorkItem::new(WorkPayload::Execute {
                        job_id: job.id.clone(),
                        alert_id: alert_id.clone(),
                    }))
                    .await?;
                info!(
                    webhook = %webhook.url_path,
                    alert_id = %alert_id,
                    job_id = %job.id,
                    action = alert.action.as_str(),
                    ticker = %alert.ticker,
                    "Alert accepted"
                );
                IntakeOutcome::Accepted {
                    job_id: job.id,
                    alert_id,
                }
            }
            DedupOutcome::Existing(job) => {
                info!(
                    webhook = %webhook.url_path,
                    alert_id = %alert_id,
                    job_id = %job.id,
                    "Duplicate alert"
                );
                IntakeOutcome::Duplicate {
                    job_id: job.id,
                    alert_id,
                }
            }
        };

        if let Err(err) = self.webhooks.record_delivery(&webhook.id, true).await {
            warn!(webhook_id = %webhook.id, error = %err, "Failed to record delivery outcome");
        }

        Ok(result)
    }

    fn verify_signature(
        &self,
        webhook: &Webhook,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<()> {
        match signature_header {
            Some(header) => signature::verify(&webhook.secret, body, header),
            // Public webhooks accept unsigned deliveries.
            None if webhook.is_public => Ok(()),
            None => Err(Error::SignatureInvalid),
        }
    }

    async fn resolve_account(
        &self,
        webhook: &Webhook,
        alert: &Alert,
    ) -> Result<crate::domain::account::ExchangeAccount> {
        if let Some(account_id) = &alert.account_id {
            let account = self
                .accounts
                .get(account_id)
                .await?
                .filter(|account| account.user_id == webhook.user_id)
                .ok_or_else(|| {
                    Error::NoAccount(format!("account {account_id} not found for owner"))
                })?;
            return Ok(account);
        }

        let resolved = match alert.exchange {
            Some(exchange) => self.accounts.primary_for(&webhook.user_id, exchange).await?,
            None => self.accounts.any_primary(&webhook.user_id).await?,
        };
        resolved.ok_or_else(|| {
            Error::NoAccount(format!(
                "no primary account for user {} and exchange {:?}",
                webhook.user_id,
                alert.exchange.map(|e| e.as_str())
            ))
        })
    }

    /// Record a failed delivery and auto-pause past the threshold.
    async fn record_failure(&self, webhook: &Webhook) {
        let updated = match self.webhooks.record_delivery(&webhook.id, false).await {
            Ok(updated) => updated,
            Err(err) => {
                warn!(webhook_id = %webhook.id, error = %err, "Failed to record delivery failure");
                return;
            }
        };

        if updated.at_error_threshold() && updated.status == WebhookStatus::Active {
            warn!(
                webhook_id = %updated.id,
                url_path = %updated.url_path,
                consecutive_errors = updated.consecutive_errors,
                "Auto-pausing webhook"
            );
            if let Err(err) = self
                .webhooks
                .set_status(&updated.id, WebhookStatus::Paused)
                .await
            {
                warn!(webhook_id = %updated.id, error = %err, "Failed to pause webhook");
                return;
            }
            self.notifiers.notify_all(Event::WebhookAutoPaused {
                webhook_id: updated.id,
                url_path: updated.url_path,
                consecutive_errors: updated.consecutive_errors,
            });
        }
    }
}
