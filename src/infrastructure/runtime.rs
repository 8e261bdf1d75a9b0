//! Runtime assembly and lifecycle.
//!
//! Wires the vault, stores, queue, breakers, and services together, then
//! runs the HTTP server, execution worker, and reconciler until shutdown.
//! On the signal, workers stop accepting and in-flight jobs drain up to the
//! configured deadline; unacked queue messages would return to another
//! worker under a durable substrate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::adapter::inbound::http::health::HealthState;
use crate::adapter::inbound::http::server::{build_router, serve};
use crate::adapter::outbound::events::broadcast::BroadcastPublisher;
use crate::adapter::outbound::exchange::AdapterRegistry;
use crate::adapter::outbound::queue::memory::MemoryJobQueue;
use crate::adapter::outbound::rate_limit::SlidingWindowRateLimiter;
use crate::adapter::outbound::sqlite::account_store::SqliteAccountStore;
use crate::adapter::outbound::sqlite::database::connection::{
    create_pool_with_timeout, run_migrations,
};
use crate::adapter::outbound::sqlite::job_store::SqliteJobStore;
use crate::adapter::outbound::sqlite::order_store::SqliteOrderStore;
use crate::adapter::outbound::sqlite::pnl_store::SqlitePnlStore;
use crate::adapter::outbound::sqlite::position_store::SqlitePositionStore;
use crate::adapter::outbound::sqlite::trade_store::SqliteTradeStore;
use crate::adapter::outbound::sqlite::webhook_store::SqliteWebhookStore;
use crate::application::executor::worker::ExecutionWorker;
use crate::application::intake::service::IntakeService;
use crate::application::reconciler::scheduler::ReconcileScheduler;
use crate::application::reconciler::service::Reconciler;
use crate::error::{Error, Result};
use crate::infrastructure::breaker::{BreakerConfig, BreakerRegistry};
use crate::infrastructure::config::settings::Config;
use crate::infrastructure::vault::Vault;
use crate::port::outbound::notifier::{LogNotifier, NotifierRegistry};
use crate::port::outbound::queue::{JobQueue, RetrySchedule};

/// Run until a termination signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    run_with_shutdown(config, shutdown_rx).await
}

/// Run with an externally controlled shutdown signal.
pub async fn run_with_shutdown(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let master_key = config.master_key_hex.as_deref().ok_or_else(|| {
        Error::Config("TRADEHOOK_MASTER_KEY is required to start the gateway".into())
    })?;
    let vault = Arc::new(Vault::from_hex(master_key)?);

    let pool = create_pool_with_timeout(
        &config.database.url,
        config.database.timeout_secs.saturating_mul(1000),
    )?;
    run_migrations(&pool)?;
    info!(database = %config.database.url, "Database initialized");

    let webhooks = Arc::new(SqliteWebhookStore::new(pool.clone()));
    let jobs = Arc::new(SqliteJobStore::new(pool.clone()));
    let accounts = Arc::new(SqliteAccountStore::new(pool.clone()));
    let orders = Arc::new(SqliteOrderStore::new(pool.clone()));
    let positions = Arc::new(SqlitePositionStore::new(pool.clone()));
    let trades = Arc::new(SqliteTradeStore::new(pool.clone()));
    let pnl = Arc::new(SqlitePnlStore::new(pool.clone()));

    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::from(&config.breaker)));
    let queue = Arc::new(MemoryJobQueue::new(
        RetrySchedule {
            max_attempts: config.queue.execute_attempts,
            ..RetrySchedule::execution()
        },
        RetrySchedule {
            max_attempts: config.queue.reconcile_attempts,
            ..RetrySchedule::reconciliation()
        },
    ));
    let queue_dyn: Arc<dyn JobQueue> = queue.clone();

    let limiter = Arc::new(SlidingWindowRateLimiter::new());
    let publisher = Arc::new(BroadcastPublisher::default());
    let adapters = Arc::new(AdapterRegistry::new(config.exchange_timeout()));

    let mut notifiers = NotifierRegistry::new();
    notifiers.register(Box::new(LogNotifier));
    let notifiers = Arc::new(notifiers);
    info!(notifiers = notifiers.len(), "Notifiers initialized");

    if config.sentry_dsn.is_some() {
        info!("Error-reporting sink configured");
    }

    let intake = Arc::new(IntakeService::new(
        Arc::clone(&webhooks),
        Arc::clone(&jobs),
        Arc::clone(&accounts),
        Arc::clone(&queue_dyn),
        limiter,
        Arc::clone(&notifiers),
    ));

    let executor = Arc::new(ExecutionWorker::new(
        Arc::clone(&jobs),
        Arc::clone(&accounts),
        Arc::clone(&orders),
        Arc::clone(&vault),
        adapters.clone(),
        Arc::clone(&breakers),
        Arc::clone(&queue_dyn),
        Arc::clone(&notifiers),
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&accounts),
        positions,
        trades,
        Arc::clone(&orders),
        pnl,
        Arc::clone(&vault),
        adapters.clone(),
        Arc::clone(&breakers),
        publisher,
        Arc::clone(&notifiers),
    ));
    let scheduler = Arc::new(ReconcileScheduler::new(
        reconciler,
        Arc::clone(&queue_dyn),
        Duration::from_secs(config.reconciler.interval_secs),
        Duration::from_secs(config.reconciler.jitter_secs),
    ));

    let health_state = Arc::new(HealthState {
        pool,
        queue: Arc::clone(&queue_dyn),
        adapters,
        probe_exchanges: config.health.probe_exchanges.clone(),
        memory_limit_mb: config.health.memory_limit_mb,
        store_timeout: Duration::from_secs(config.database.timeout_secs),
    });
    let router = build_router(intake, health_state);

    // Wake any consumer blocked on an empty queue once shutdown flips.
    {
        let queue = Arc::clone(&queue);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = shutdown.changed().await;
            queue.close();
        });
    }

    let drain_deadline = Duration::from_secs(config.worker.drain_deadline_secs);
    let server_handle = tokio::spawn(serve(
        config.server.bind.clone(),
        router,
        shutdown.clone(),
    ));
    let executor_handle = tokio::spawn(executor.run(
        config.worker.concurrency,
        drain_deadline,
        shutdown.clone(),
    ));
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run_scheduler(shutdown.clone()));
    let reconcile_handle = tokio::spawn(
        scheduler.run_worker(config.reconciler.concurrency, shutdown.clone()),
    );

    info!("tradehook running");

    if let Err(err) = server_handle.await.map_err(|e| Error::Internal(e.to_string()))? {
        error!(error = %err, "HTTP server terminated with error");
        // Nothing signalled shutdown; stop the workers outright.
        executor_handle.abort();
        scheduler_handle.abort();
        reconcile_handle.abort();
        return Err(err);
    }
    let _ = executor_handle.await;
    let _ = scheduler_handle.await;
    let _ = reconcile_handle.await;

    info!("tradehook stopped");
    Ok(())
}
