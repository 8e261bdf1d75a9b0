#![allow(dead_code)]

pub mod recording_notifier;
pub mod temp_db;

use std::sync::Arc;
use std::time::Duration;

use tradehook::adapter::outbound::queue::memory::MemoryJobQueue;
use tradehook::adapter::outbound::rate_limit::SlidingWindowRateLimiter;
use tradehook::adapter::outbound::sqlite::account_store::SqliteAccountStore;
use tradehook::adapter::outbound::sqlite::database::connection::DbPool;
use tradehook::adapter::outbound::sqlite::job_store::SqliteJobStore;
use tradehook::adapter::outbound::sqlite::order_store::SqliteOrderStore;
use tradehook::adapter::outbound::sqlite::pnl_store::SqlitePnlStore;
use tradehook::adapter::outbound::sqlite::position_store::SqlitePositionStore;
use tradehook::adapter::outbound::sqlite::trade_store::SqliteTradeStore;
use tradehook::adapter::outbound::sqlite::webhook_store::SqliteWebhookStore;
use tradehook::application::executor::worker::ExecutionWorker;
use tradehook::application::intake::service::IntakeService;
use tradehook::domain::account::ExchangeAccount;
use tradehook::domain::webhook::Webhook;
use tradehook::infrastructure::breaker::{BreakerConfig, BreakerRegistry};
use tradehook::infrastructure::vault::Vault;
use tradehook::port::outbound::notifier::NotifierRegistry;
use tradehook::port::outbound::queue::{JobQueue, RetrySchedule};
use tradehook::testkit::exchange::{MockAdapterFactory, MockExchange};
use tradehook::testkit::fixtures;

use diesel::prelude::*;

pub type TestIntake = IntakeService<SqliteWebhookStore, SqliteJobStore, SqliteAccountStore>;
pub type TestExecutor = ExecutionWorker<SqliteJobStore, SqliteAccountStore, SqliteOrderStore>;

/// Everything a component test needs, wired over one temp database.
pub struct TestHarness {
    pub db: temp_db::TempDb,
    pub webhooks: Arc<SqliteWebhookStore>,
    pub jobs: Arc<SqliteJobStore>,
    pub accounts: Arc<SqliteAccountStore>,
    pub orders: Arc<SqliteOrderStore>,
    pub positions: Arc<SqlitePositionStore>,
    pub trades: Arc<SqliteTradeStore>,
    pub pnl: Arc<SqlitePnlStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub vault: Arc<Vault>,
    pub exchange: Arc<MockExchange>,
    pub breakers: Arc<BreakerRegistry>,
    pub notifiers: Arc<NotifierRegistry>,
    pub recorder: Arc<recording_notifier::RecordingNotifier>,
}

impl TestHarness {
    pub fn create(name: &str) -> Self {
        Self::with_exchange(name, Arc::new(MockExchange::new()))
    }

    pub fn with_exchange(name: &str, exchange: Arc<MockExchange>) -> Self {
        let db = temp_db::TempDb::create(name);
        let pool = db.pool().clone();

        let recorder = Arc::new(recording_notifier::RecordingNotifier::new());
        let mut notifiers = NotifierRegistry::new();
        notifiers.register(Box::new(recording_notifier::RecordingHandle(Arc::clone(
            &recorder,
        ))));

        // Fast retry schedules so failure paths finish quickly.
        let schedule = RetrySchedule {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            factor: 1.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(2),
        };

        Self {
            webhooks: Arc::new(SqliteWebhookStore::new(pool.clone())),
            jobs: Arc::new(SqliteJobStore::new(pool.clone())),
            accounts: Arc::new(SqliteAccountStore::new(pool.clone())),
            orders: Arc::new(SqliteOrderStore::new(pool.clone())),
            positions: Arc::new(SqlitePositionStore::new(pool.clone())),
            trades: Arc::new(SqliteTradeStore::new(pool.clone())),
            pnl: Arc::new(SqlitePnlStore::new(pool.clone())),
            queue: Arc::new(MemoryJobQueue::new(schedule.clone(), schedule)),
            limiter: Arc::new(SlidingWindowRateLimiter::new()),
            vault: Arc::new(fixtures::vault()),
            exchange,
            breakers: Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            notifiers: Arc::new(notifiers),
            recorder,
            db,
        }
    }

    pub fn pool(&self) -> &DbPool {
        self.db.pool()
    }

    /// Seed a user row; accounts and webhooks reference it.
    pub fn seed_user(&self, user_id: &str) {
        let mut conn = self.pool().get().expect("get connection");
        diesel::sql_query(format!(
            "INSERT INTO users (id, email, display_name, active, created_at)
             VALUES ('{user_id}', '{user_id}@example.com', 'Trader', 1,
                     '2024-01-01T00:00:00+00:00')"
        ))
        .execute(&mut conn)
        .expect("seed user");
    }

    pub async fn seed_account(&self, account: &ExchangeAccount) {
        self.accounts.upsert(account).await.expect("seed account");
    }

    pub async fn seed_webhook(&self, webhook: &Webhook) {
        self.webhooks.upsert(webhook).await.expect("seed webhook");
    }

    /// Standard fixture: user-1 with an active primary binance account and
    /// a signed webhook at `hook-1`.
    pub async fn seed_standard(&self) -> (ExchangeAccount, Webhook) {
        self.seed_user("user-1");
        let account = fixtures::account("acct-1", "user-1");
        self.seed_account(&account).await;
        let webhook = fixtures::webhook("wh-1", "user-1", "hook-1", "topsecret");
        self.seed_webhook(&webhook).await;
        (account, webhook)
    }

    pub fn intake(&self) -> TestIntake {
        IntakeService::new(
            Arc::clone(&self.webhooks),
            Arc::clone(&self.jobs),
            Arc::clone(&self.accounts),
            self.queue.clone() as Arc<dyn JobQueue>,
            self.limiter.clone(),
            Arc::clone(&self.notifiers),
        )
    }

    pub fn executor(&self) -> TestExecutor {
        ExecutionWorker::new(
            Arc::clone(&self.jobs),
            Arc::clone(&self.accounts),
            Arc::clone(&self.orders),
            Arc::clone(&self.vault),
            Arc::new(MockAdapterFactory::new(Arc::clone(&self.exchange))),
            Arc::clone(&self.breakers),
            self.queue.clone() as Arc<dyn JobQueue>,
            Arc::clone(&self.notifiers),
        )
    }
}
