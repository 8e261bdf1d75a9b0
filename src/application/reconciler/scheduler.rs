//! Reconciliation scheduling.
//!
//! Every tick enqueues one reconcile message per active account with a
//! random stagger; the consume loop runs cycles on a bounded pool. A cycle
//! already in flight for an account is skipped, never stacked.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use super::service::Reconciler;
use crate::port::outbound::queue::{Delivery, JobQueue, WorkItem, WorkKind, WorkPayload};
use crate::port::outbound::store::{
    AccountStore, OrderStore, PnlStore, PositionStore, TradeStore,
};

pub struct ReconcileScheduler<AS, PS, TS, OS, NS> {
    reconciler: Arc<Reconciler<AS, PS, TS, OS, NS>>,
    queue: Arc<dyn JobQueue>,
    interval: Duration,
    jitter: Duration,
    /// Accounts with a cycle currently in flight.
    in_flight: DashSet<String>,
}

impl<AS, PS, TS, OS, NS> ReconcileScheduler<AS, PS, TS, OS, NS>
where
    AS: AccountStore + Send + Sync + 'static,
    PS: PositionStore + Send + Sync + 'static,
    TS: TradeStore + Send + Sync + 'static,
    OS: OrderStore + Send + Sync + 'static,
    NS: PnlStore + Send + Sync + 'static,
{
    pub fn new(
        reconciler: Arc<Reconciler<AS, PS, TS, OS, NS>>,
        queue: Arc<dyn JobQueue>,
        interval: Duration,
        jitter: Duration,
    ) -> Self {
        Self {
            reconciler,
            queue,
            interval,
            jitter,
            in_flight: DashSet::new(),
        }
    }

    /// Tick loop: enumerate active accounts and enqueue one reconcile per
    /// account per tick, staggered by random jitter.
    pub async fn run_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_secs = self.interval.as_secs(),
            jitter_secs = self.jitter.as_secs(),
            "Reconcile scheduler started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.schedule_tick().await,
            }
        }
    }

    async fn schedule_tick(&self) {
        let accounts = match self.reconciler.accounts.list_active().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(error = %err, "Failed to enumerate accounts for reconcile tick");
                return;
            }
        };

        for account in accounts {
            let jitter_ms = if self.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..self.jitter.as_millis() as u64)
            };
            let item = WorkItem::new(WorkPayload::Reconcile {
                account_id: account.id.clone(),
            })
            .with_delay(Duration::from_millis(jitter_ms));

            match self.queue.enqueue(item).await {
                Ok(true) => {}
                // Previous cycle still queued or in flight.
                Ok(false) => debug!(account_id = %account.id, "Reconcile already scheduled"),
                Err(err) => warn!(account_id = %account.id, error = %err, "Failed to enqueue reconcile"),
            }
        }
    }

    /// Consume loop with the reconciliation concurrency bound.
    pub async fn run_worker(
        self: Arc<Self>,
        concurrency: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        info!(concurrency, "Reconcile worker started");

        loop {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = self.queue.next(WorkKind::Reconcile) => {
                    let Some(delivery) = delivery else { break };
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.handle(delivery).await;
                        drop(permit);
                    });
                }
            }
        }
    }

    /// Run one delivery; partial failure of one account never blocks
    /// others.
    pub async fn handle(&self, delivery: Delivery) {
        let WorkPayload::Reconcile { account_id } = &delivery.payload else {
            self.queue.ack(&delivery).await;
            return;
        };

        // Re-entrance for the same account is forbidden: skip, don't stack.
        if !self.in_flight.insert(account_id.clone()) {
            debug!(account_id = %account_id, "Cycle already in flight, skipping");
            self.queue.ack(&delivery).await;
            return;
        }

        let result = self.reconciler.cycle(account_id).await;
        self.in_flight.remove(account_id);

        match result {
            Ok(()) => self.queue.ack(&delivery).await,
            Err(err) => {
                warn!(
                    account_id = %account_id,
                    attempt = delivery.attempt,
                    code = err.code(),
                    error = %err,
                    "Reconcile cycle failed"
                );
                self.queue.nack(&delivery, &err).await;
            }
        }
    }
}
