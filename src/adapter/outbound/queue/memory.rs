//! In-process implementation of the job queue facade.
//!
//! Two pools (execute, reconcile) with priority-then-FIFO ordering, dedup
//! keys held from enqueue until acknowledge or terminal failure, and
//! classified retry with capped exponential backoff. Durability comes from
//! the job table, which is the source of truth the queue merely references;
//! a Redis-backed substrate would sit behind the same port.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::port::outbound::queue::{Delivery, JobQueue, RetrySchedule, WorkItem, WorkKind};

struct QueuedMessage {
    delivery: Delivery,
    priority: u8,
    seq: u64,
}

struct PoolState {
    ready: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

impl PoolState {
    fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, message: QueuedMessage) {
        let mut ready = self.ready.lock();
        // Priority first (lower runs earlier), FIFO within a priority.
        let at = ready
            .iter()
            .position(|queued| {
                (queued.priority, queued.seq) > (message.priority, message.seq)
            })
            .unwrap_or(ready.len());
        ready.insert(at, message);
        drop(ready);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedMessage> {
        self.ready.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.ready.lock().len()
    }
}

struct Inner {
    execute: PoolState,
    reconcile: PoolState,
    execute_schedule: RetrySchedule,
    reconcile_schedule: RetrySchedule,
    /// Dedup keys currently queued or in flight.
    held_keys: DashSet<String>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn pool(&self, kind: WorkKind) -> &PoolState {
        match kind {
            WorkKind::Execute => &self.execute,
            WorkKind::Reconcile => &self.reconcile,
        }
    }

    fn schedule(&self, kind: WorkKind) -> &RetrySchedule {
        match kind {
            WorkKind::Execute => &self.execute_schedule,
            WorkKind::Reconcile => &self.reconcile_schedule,
        }
    }
}

/// In-process queue facade shared by the gateway, executor, and reconciler.
pub struct MemoryJobQueue {
    inner: Arc<Inner>,
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new(execute_schedule: RetrySchedule, reconcile_schedule: RetrySchedule) -> Self {
        Self {
            inner: Arc::new(Inner {
                execute: PoolState::new(),
                reconcile: PoolState::new(),
                execute_schedule,
                reconcile_schedule,
                held_keys: DashSet::new(),
                seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Default schedules: 5 execution attempts, 2 reconciliation attempts.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetrySchedule::execution(), RetrySchedule::reconciliation())
    }

    /// Stop delivery: pending consumers and future `next` calls get `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.execute.notify.notify_waiters();
        self.inner.reconcile.notify.notify_waiters();
    }

    fn dispatch(inner: &Arc<Inner>, delivery: Delivery, priority: u8, delay: Duration) {
        let seq = inner.seq.fetch_add(1, Ordering::SeqCst);
        let message = QueuedMessage {
            delivery,
            priority,
            seq,
        };
        if delay.is_zero() {
            inner.pool(message.delivery.payload.kind()).push(message);
        } else {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.pool(message.delivery.payload.kind()).push(message);
            });
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<bool> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Queue("queue is shut down".into()));
        }
        let key = item.payload.dedup_key();
        if !self.inner.held_keys.insert(key.clone()) {
            debug!(dedup_key = %key, "Enqueue suppressed by dedup key");
            return Ok(false);
        }

        Self::dispatch(
            &self.inner,
            Delivery {
                payload: item.payload,
                attempt: 1,
            },
            item.priority,
            item.delay,
        );
        Ok(true)
    }

    async fn next(&self, kind: WorkKind) -> Option<Delivery> {
        let pool = self.inner.pool(kind);
        loop {
            if let Some(message) = pool.pop() {
                return Some(message.delivery);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }

            // Register the waiter before the re-check so a push or close
            // landing in between cannot be missed.
            let notified = pool.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(message) = pool.pop() {
                return Some(message.delivery);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        self.inner.held_keys.remove(&delivery.payload.dedup_key());
    }

    async fn nack(&self, delivery: &Delivery, error: &Error) {
        let kind = delivery.payload.kind();
        let schedule = self.inner.schedule(kind);

        if schedule.should_retry(error, delivery.attempt) {
            let jitter_unit: f64 = rand::thread_rng().gen();
            let delay = schedule.delay_for(delivery.attempt, jitter_unit);
            debug!(
                dedup_key = %delivery.payload.dedup_key(),
                attempt = delivery.attempt,
                delay_ms = delay.as_millis() as u64,
                code = error.code(),
                "Rescheduling after failure"
            );
            Self::dispatch(
                &self.inner,
                Delivery {
                    payload: delivery.payload.clone(),
                    attempt: delivery.attempt + 1,
                },
                0,
                delay,
            );
        } else {
            warn!(
                dedup_key = %delivery.payload.dedup_key(),
                attempt = delivery.attempt,
                code = error.code(),
                "Dropping message after terminal failure"
            );
            self.inner.held_keys.remove(&delivery.payload.dedup_key());
        }
    }

    fn depth(&self, kind: WorkKind) -> usize {
        self.inner.pool(kind).len()
    }
}
