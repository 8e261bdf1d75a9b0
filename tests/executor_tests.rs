//! Execution worker integration tests.

mod harness;

use std::sync::Arc;

use harness::TestHarness;
use rust_decimal_macros::dec;
use tradehook::domain::job::JobStatus;
use tradehook::domain::order::{OrderSide, OrderType};
use tradehook::port::outbound::queue::{Delivery, JobQueue, WorkItem, WorkKind, WorkPayload};
use tradehook::port::outbound::store::{JobStore, NewJob, OrderStore};
use tradehook::testkit::exchange::{long_position, MockExchange};

use diesel::prelude::*;

async fn seed_job(harness: &TestHarness, alert_id: &str, payload: &str) -> String {
    let outcome = harness
        .jobs
        .insert_or_get(NewJob {
            alert_id: alert_id.to_string(),
            webhook_id: "wh-1".into(),
            account_id: Some("acct-1".into()),
            user_id: "user-1".into(),
            payload: payload.to_string(),
        })
        .await
        .unwrap();
    outcome.job().id.clone()
}

fn delivery(job_id: &str, alert_id: &str) -> Delivery {
    Delivery {
        payload: WorkPayload::Execute {
            job_id: job_id.to_string(),
            alert_id: alert_id.to_string(),
        },
        attempt: 1,
    }
}

fn count_orders(harness: &TestHarness) -> i64 {
    use tradehook::adapter::outbound::sqlite::database::schema::orders::dsl::*;
    let mut conn = harness.pool().get().unwrap();
    orders.count().get_result(&mut conn).unwrap()
}

// -----------------------------------------------------------------------------
// Fresh buy (end-to-end scenario 1 at the worker level)
// -----------------------------------------------------------------------------

#[tokio::test]
async fn fresh_buy_sizes_submits_and_completes() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    let harness = TestHarness::with_exchange("exec-buy", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100,"leverage":10}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());

    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].symbol, "BTCUSDT");
    assert_eq!(placed[0].side, OrderSide::Buy);
    // 100 USDT * 10x / 50000 = 0.02
    assert_eq!(placed[0].amount, dec!(0.02));
    assert!(placed[0].client_order_id.starts_with("tv_A1_"));

    // Leverage was set before submission.
    assert_eq!(
        *harness.exchange.leverage_calls.lock(),
        vec![("BTCUSDT".to_string(), 10)]
    );

    let order = harness
        .orders
        .find_by_client_order_id("acct-1", &placed[0].client_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.quantity, dec!(0.02));
    assert!(!order.reduce_only);
}

#[tokio::test]
async fn protective_legs_are_reduce_only_orders_in_the_id_family() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    let harness = TestHarness::with_exchange("exec-protective", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100,"stop_loss":45000,"take_profit":60000}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 3);

    let entry = &placed[0];
    let stop = placed
        .iter()
        .find(|o| o.order_type == OrderType::Stop)
        .expect("stop-loss leg");
    let take = placed
        .iter()
        .find(|o| o.order_type == OrderType::TakeProfit)
        .expect("take-profit leg");

    assert_eq!(stop.client_order_id, format!("{}_sl", entry.client_order_id));
    assert_eq!(take.client_order_id, format!("{}_tp", entry.client_order_id));
    assert!(stop.reduce_only && take.reduce_only);
    assert_eq!(stop.side, OrderSide::Sell);
    assert_eq!(stop.price, Some(dec!(45000)));
    assert_eq!(take.price, Some(dec!(60000)));
}

// -----------------------------------------------------------------------------
// Sizing and guard failures
// -----------------------------------------------------------------------------

#[tokio::test]
async fn unsized_alert_fails_terminally() {
    let exchange = Arc::new(MockExchange::new().with_ticker(dec!(50000)));
    let harness = TestHarness::with_exchange("exec-unsized", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1"}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("config/invalid_size"));
    assert_eq!(count_orders(&harness), 0);
}

#[tokio::test]
async fn balance_guard_rejects_underfunded_entries() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1)),
    );
    let harness = TestHarness::with_exchange("exec-underfunded", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("funds/insufficient"));
    assert!(harness.exchange.placed_orders().is_empty());
}

#[tokio::test]
async fn inactive_account_fails_terminally() {
    let harness = TestHarness::create("exec-inactive");
    harness.seed_standard().await;
    let mut account = tradehook::testkit::fixtures::account("acct-1", "user-1");
    account.active = false;
    harness.seed_account(&account).await;

    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","quantity":1}"#,
    )
    .await;
    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .last_error
        .unwrap()
        .starts_with("config/account_inactive"));
}

// -----------------------------------------------------------------------------
// Price fallback chain (end-to-end scenario 5)
// -----------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_price_chain_fails_and_requeues() {
    let exchange = Arc::new(MockExchange::new().with_balance("USDT", dec!(1000)));
    exchange.script_ticker_error(|| {
        tradehook::error::Error::ExchangeTransient("ticker down".into())
    });
    let harness = TestHarness::with_exchange("exec-no-price", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100}"#,
    )
    .await;

    // Hold the dedup key the way a real enqueue would have.
    harness
        .queue
        .enqueue(WorkItem::new(WorkPayload::Execute {
            job_id: job_id.clone(),
            alert_id: "A1".into(),
        }))
        .await
        .unwrap();
    let delivery = harness.queue.next(WorkKind::Execute).await.unwrap();

    harness.executor().handle(delivery).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert!(job
        .last_error
        .unwrap()
        .starts_with("price/feed_unavailable"));

    // The classification is queue-retryable: a redelivery arrives.
    let redelivery = harness.queue.next(WorkKind::Execute).await.unwrap();
    assert_eq!(redelivery.attempt, 2);
}

#[tokio::test]
async fn mark_price_fallback_is_used_when_ticker_is_down() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_balance("USDT", dec!(1000))
            .with_position(long_position("BTCUSDT", dec!(0.5), dec!(40000))),
    );
    exchange.script_ticker_error(|| {
        tradehook::error::Error::ExchangeTransient("ticker down".into())
    });
    let harness = TestHarness::with_exchange("exec-mark-price", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // Sized against the 40000 mark price: 100 / 40000 = 0.0025
    let placed = harness.exchange.placed_orders();
    assert_eq!(placed[0].amount, dec!(0.0025));
}

// -----------------------------------------------------------------------------
// Close semantics (end-to-end scenario 4)
// -----------------------------------------------------------------------------

#[tokio::test]
async fn close_without_position_completes_with_no_orders() {
    let harness = TestHarness::create("exec-close-empty");
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A2",
        r#"{"ticker":"ETHUSDT","action":"close","alert_id":"A2"}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A2")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.last_error.is_none());
    assert_eq!(count_orders(&harness), 0);
    assert!(harness.exchange.placed_orders().is_empty());
}

#[tokio::test]
async fn close_submits_opposite_sided_reduce_only_market_order() {
    let exchange = Arc::new(
        MockExchange::new().with_position(long_position("BTCUSDT", dec!(0.5), dec!(50000))),
    );
    let harness = TestHarness::with_exchange("exec-close", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A2",
        r#"{"ticker":"BTCUSDT","action":"close","alert_id":"A2"}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A2")).await;

    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].side, OrderSide::Sell);
    assert_eq!(placed[0].amount, dec!(0.5));
    assert!(placed[0].reduce_only);
    assert!(placed[0].client_order_id.starts_with("tv_close_A2_"));

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn close_all_closes_every_position_and_propagates_the_account() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_position(long_position("BTCUSDT", dec!(0.5), dec!(50000)))
            .with_position(long_position("ETHUSDT", dec!(2), dec!(2500))),
    );
    let harness = TestHarness::with_exchange("exec-close-all", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A3",
        r#"{"ticker":"BTCUSDT","action":"close_all","alert_id":"A3"}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A3")).await;

    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 2);
    assert!(placed.iter().all(|o| o.reduce_only));

    // Every stored order carries the account reference.
    for request in &placed {
        let order = harness
            .orders
            .find_by_client_order_id("acct-1", &request.client_order_id)
            .await
            .unwrap()
            .expect("order persisted");
        assert_eq!(order.account_id, "acct-1");
    }

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// -----------------------------------------------------------------------------
// Idempotency (round-trip law 8)
// -----------------------------------------------------------------------------

#[tokio::test]
async fn redelivered_completed_job_is_a_no_op() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    let harness = TestHarness::with_exchange("exec-idempotent", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100}"#,
    )
    .await;

    let executor = harness.executor();
    executor.handle(delivery(&job_id, "A1")).await;
    assert_eq!(count_orders(&harness), 1);

    // Queue redelivery of the same job after completion.
    executor.handle(delivery(&job_id, "A1")).await;
    assert_eq!(count_orders(&harness), 1, "no additional order row");
    assert_eq!(harness.exchange.placed_orders().len(), 1);
}

#[tokio::test]
async fn exchange_rejection_is_terminal_and_notified() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    exchange.script_place_error(|| {
        tradehook::error::Error::ExchangeLogical("below min notional".into())
    });
    let harness = TestHarness::with_exchange("exec-logical", exchange);
    harness.seed_standard().await;
    let job_id = seed_job(
        &harness,
        "A1",
        r#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100}"#,
    )
    .await;

    harness.executor().handle(delivery(&job_id, "A1")).await;

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().starts_with("exchange/logical"));

    let notified = harness.recorder.events().into_iter().any(|event| {
        matches!(
            event,
            tradehook::port::outbound::notifier::Event::JobFailed { ref code, .. }
                if code == "exchange/logical"
        )
    });
    assert!(notified, "terminal failures notify the operator");
}
