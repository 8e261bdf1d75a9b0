//! End-to-end flow: signed POST through intake, queue, and executor.

mod harness;

use std::sync::Arc;

use harness::TestHarness;
use rust_decimal_macros::dec;
use tradehook::application::intake::signature;
use tradehook::domain::job::JobStatus;
use tradehook::domain::order::OrderSide;
use tradehook::port::outbound::queue::{JobQueue, WorkKind};
use tradehook::port::outbound::store::{JobStore, OrderStore};
use tradehook::testkit::exchange::MockExchange;

#[tokio::test]
async fn fresh_buy_flows_from_post_to_persisted_order() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    let harness = TestHarness::with_exchange("e2e-buy", exchange);
    harness.seed_standard().await;
    let intake = harness.intake();
    let executor = harness.executor();

    // Signed ingress.
    let body =
        br#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","size_mode":"quote","size_value":100,"leverage":10}"#;
    let header = signature::sign("topsecret", body);
    let outcome = intake.ingest("hook-1", body, Some(&header)).await.unwrap();
    assert!(!outcome.is_duplicate());

    // Pending job, queued work.
    let job = harness.jobs.get(outcome.job_id()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    // Worker consumes and executes.
    let delivery = harness.queue.next(WorkKind::Execute).await.unwrap();
    executor.handle(delivery).await;

    let job = harness.jobs.get(outcome.job_id()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // One order: buy 0.02 BTCUSDT with the tv_A1_ idempotency token.
    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].amount, dec!(0.02));
    assert_eq!(placed[0].side, OrderSide::Buy);
    assert!(placed[0].client_order_id.starts_with("tv_A1_"));

    let order = harness
        .orders
        .find_by_client_order_id("acct-1", &placed[0].client_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.account_id, "acct-1");

    // Re-POST of the same alert: duplicate, no further work.
    let duplicate = intake.ingest("hook-1", body, Some(&header)).await.unwrap();
    assert!(duplicate.is_duplicate());
    assert_eq!(duplicate.job_id(), outcome.job_id());
    assert_eq!(harness.queue.depth(WorkKind::Execute), 0);
    assert_eq!(harness.exchange.placed_orders().len(), 1);
}

#[tokio::test]
async fn duplicate_while_job_in_flight_does_not_enqueue_twice() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_ticker(dec!(50000))
            .with_balance("USDT", dec!(1000)),
    );
    let harness = TestHarness::with_exchange("e2e-inflight", exchange);
    harness.seed_standard().await;
    let intake = harness.intake();

    let body = br#"{"ticker":"BTCUSDT","action":"buy","alert_id":"A1","quantity":0.1}"#;
    let header = signature::sign("topsecret", body);
    intake.ingest("hook-1", body, Some(&header)).await.unwrap();

    // Delivery taken but not yet acknowledged.
    let _in_flight = harness.queue.next(WorkKind::Execute).await.unwrap();

    let duplicate = intake.ingest("hook-1", body, Some(&header)).await.unwrap();
    assert!(duplicate.is_duplicate());
    assert_eq!(harness.queue.depth(WorkKind::Execute), 0);
}
