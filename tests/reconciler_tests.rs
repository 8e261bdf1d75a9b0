//! Reconciler integration tests.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harness::TestHarness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tradehook::adapter::outbound::events::broadcast::BroadcastPublisher;
use tradehook::application::reconciler::scheduler::ReconcileScheduler;
use tradehook::application::reconciler::service::Reconciler;
use tradehook::domain::account::Exchange;
use tradehook::domain::order::{Order, OrderSide, OrderStatus, OrderType};
use tradehook::domain::position::{Position, PositionSide};
use tradehook::port::outbound::events::EventPublisher;
use tradehook::port::outbound::exchange::Fill;
use tradehook::port::outbound::notifier::Event;
use tradehook::port::outbound::queue::JobQueue;
use tradehook::port::outbound::store::{AccountStore, OrderStore, PnlStore, PositionStore};
use tradehook::testkit::exchange::{long_position, MockAdapterFactory, MockExchange};

type TestReconciler = Reconciler<
    tradehook::adapter::outbound::sqlite::account_store::SqliteAccountStore,
    tradehook::adapter::outbound::sqlite::position_store::SqlitePositionStore,
    tradehook::adapter::outbound::sqlite::trade_store::SqliteTradeStore,
    tradehook::adapter::outbound::sqlite::order_store::SqliteOrderStore,
    tradehook::adapter::outbound::sqlite::pnl_store::SqlitePnlStore,
>;

fn reconciler(harness: &TestHarness, publisher: Arc<BroadcastPublisher>) -> TestReconciler {
    Reconciler::new(
        Arc::clone(&harness.accounts),
        Arc::clone(&harness.positions),
        Arc::clone(&harness.trades),
        Arc::clone(&harness.orders),
        Arc::clone(&harness.pnl),
        Arc::clone(&harness.vault),
        Arc::new(MockAdapterFactory::new(Arc::clone(&harness.exchange))),
        Arc::clone(&harness.breakers),
        publisher as Arc<dyn EventPublisher>,
        Arc::clone(&harness.notifiers),
    )
}

fn local_position(account_id: &str, symbol: &str, size: Decimal) -> Position {
    Position {
        id: uuid::Uuid::new_v4().to_string(),
        account_id: account_id.to_string(),
        exchange: Exchange::Binance,
        symbol: symbol.to_string(),
        side: PositionSide::Long,
        size,
        entry_price: dec!(50000),
        mark_price: dec!(50000),
        unrealized_pnl: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
        leverage: 1,
        liquidation_price: None,
        updated_at: Utc::now(),
    }
}

// -----------------------------------------------------------------------------
// Positions sync (end-to-end scenario 6)
// -----------------------------------------------------------------------------

#[tokio::test]
async fn closed_position_is_deleted_and_snapshot_emitted() {
    let harness = TestHarness::create("recon-close");
    harness.seed_standard().await;

    // Local state holds an open BTCUSDT long; the exchange reports none.
    harness
        .positions
        .replace_all("acct-1", &[local_position("acct-1", "BTCUSDT", dec!(0.5))])
        .await
        .unwrap();

    let publisher = Arc::new(BroadcastPublisher::default());
    let mut events = publisher.subscribe();
    let reconciler = reconciler(&harness, Arc::clone(&publisher));

    reconciler.cycle("acct-1").await.unwrap();

    assert!(harness.positions.list("acct-1").await.unwrap().is_empty());

    let snapshots = harness.pnl.list("acct-1", 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].equity, Decimal::ZERO);

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, "account_update");
    assert_eq!(event.account_id, "acct-1");
    assert_eq!(event.user_id, "user-1");
}

#[tokio::test]
async fn position_set_mirrors_the_exchange_fetch() {
    let exchange = Arc::new(
        MockExchange::new()
            .with_position({
                let mut p = long_position("BTCUSDT", dec!(0.5), dec!(50500));
                p.unrealized_pnl = dec!(25);
                p.realized_pnl = dec!(5);
                p
            })
            .with_position(long_position("ETHUSDT", dec!(2), dec!(2500))),
    );
    let harness = TestHarness::with_exchange("recon-mirror", exchange);
    harness.seed_standard().await;
    // A stale local SOLUSDT row the exchange no longer reports.
    harness
        .positions
        .replace_all("acct-1", &[local_position("acct-1", "SOLUSDT", dec!(10))])
        .await
        .unwrap();

    let publisher = Arc::new(BroadcastPublisher::default());
    reconciler(&harness, publisher).cycle("acct-1").await.unwrap();

    let rows = harness.positions.list("acct-1").await.unwrap();
    let symbols: Vec<&str> = rows.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

    // PnL snapshot sums the live fields; equity = realized + unrealized.
    let snapshot = &harness.pnl.list("acct-1", 1).await.unwrap()[0];
    assert_eq!(snapshot.unrealized, dec!(25));
    assert_eq!(snapshot.realized, dec!(5));
    assert_eq!(snapshot.equity, dec!(30));
}

#[tokio::test]
async fn positions_failure_aborts_the_cycle() {
    let exchange = Arc::new(MockExchange::new());
    exchange.script_positions_error(|| {
        tradehook::error::Error::ExchangeTransient("positions endpoint down".into())
    });
    let harness = TestHarness::with_exchange("recon-abort", exchange);
    harness.seed_standard().await;
    harness
        .positions
        .replace_all("acct-1", &[local_position("acct-1", "BTCUSDT", dec!(0.5))])
        .await
        .unwrap();

    let publisher = Arc::new(BroadcastPublisher::default());
    let err = reconciler(&harness, publisher)
        .cycle("acct-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "exchange/transient");

    // Stale state stands; no snapshot was emitted.
    assert_eq!(harness.positions.list("acct-1").await.unwrap().len(), 1);
    assert!(harness.pnl.list("acct-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn credential_rejection_deactivates_and_notifies() {
    let exchange = Arc::new(MockExchange::new());
    exchange.script_positions_error(|| {
        tradehook::error::Error::CredentialsInvalid("key revoked".into())
    });
    let harness = TestHarness::with_exchange("recon-deactivate", exchange);
    harness.seed_standard().await;

    let publisher = Arc::new(BroadcastPublisher::default());
    let err = reconciler(&harness, publisher)
        .cycle("acct-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "auth/credentials_invalid");

    let account = harness.accounts.get("acct-1").await.unwrap().unwrap();
    assert!(!account.active, "account is flagged until operator action");

    let notified = harness
        .recorder
        .events()
        .into_iter()
        .any(|event| matches!(event, Event::AccountDeactivated { .. }));
    assert!(notified);
}

// -----------------------------------------------------------------------------
// Trades sync
// -----------------------------------------------------------------------------

#[tokio::test]
async fn fills_roll_up_into_their_order() {
    let exchange = Arc::new(MockExchange::new());
    let now = Utc::now();
    exchange.fills.lock().extend([
        Fill {
            trade_id: "t1".into(),
            order_id: "ex-1".into(),
            client_order_id: None,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: dec!(50000),
            fee: dec!(0.2),
            fee_currency: "USDT".into(),
            executed_at: now,
        },
        Fill {
            trade_id: "t2".into(),
            order_id: "ex-1".into(),
            client_order_id: None,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            quantity: dec!(0.01),
            price: dec!(50100),
            fee: dec!(0.2),
            fee_currency: "USDT".into(),
            executed_at: now,
        },
    ]);
    let harness = TestHarness::with_exchange("recon-fills", exchange);
    harness.seed_standard().await;

    let at = Utc::now();
    harness
        .orders
        .upsert(&Order {
            id: "o1".into(),
            client_order_id: "tv_A1_1".into(),
            exchange_order_id: Some("ex-1".into()),
            account_id: "acct-1".into(),
            exchange: Exchange::Binance,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.02),
            price: Decimal::ZERO,
            filled: Decimal::ZERO,
            remaining: dec!(0.02),
            status: OrderStatus::Submitted,
            reduce_only: false,
            created_at: at,
            updated_at: at,
        })
        .await
        .unwrap();

    let publisher = Arc::new(BroadcastPublisher::default());
    reconciler(&harness, publisher).cycle("acct-1").await.unwrap();

    let order = harness
        .orders
        .find_by_exchange_order_id("acct-1", "ex-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.filled, dec!(0.02));
    assert_eq!(order.remaining, Decimal::ZERO);
    assert_eq!(order.status, OrderStatus::Filled);

    // Replaying the same cycle inserts nothing new and keeps fills stable.
    let publisher = Arc::new(BroadcastPublisher::default());
    reconciler(&harness, publisher).cycle("acct-1").await.unwrap();
    let order = harness
        .orders
        .find_by_exchange_order_id("acct-1", "ex-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.filled, dec!(0.02));
}

// -----------------------------------------------------------------------------
// Scheduling
// -----------------------------------------------------------------------------

#[tokio::test]
async fn in_flight_account_is_skipped_not_stacked() {
    let harness = TestHarness::create("recon-reentrance");
    harness.seed_standard().await;

    let publisher = Arc::new(BroadcastPublisher::default());
    let scheduler = Arc::new(ReconcileScheduler::new(
        Arc::new(reconciler(&harness, publisher)),
        harness.queue.clone() as Arc<dyn JobQueue>,
        Duration::from_secs(30),
        Duration::ZERO,
    ));

    // Two deliveries for the same account: the queue's dedup key already
    // suppresses the second enqueue.
    let first = harness
        .queue
        .enqueue(tradehook::port::outbound::queue::WorkItem::new(
            tradehook::port::outbound::queue::WorkPayload::Reconcile {
                account_id: "acct-1".into(),
            },
        ))
        .await
        .unwrap();
    let second = harness
        .queue
        .enqueue(tradehook::port::outbound::queue::WorkItem::new(
            tradehook::port::outbound::queue::WorkPayload::Reconcile {
                account_id: "acct-1".into(),
            },
        ))
        .await
        .unwrap();
    assert!(first);
    assert!(!second, "dedup key forbids stacking cycles");

    let delivery = harness
        .queue
        .next(tradehook::port::outbound::queue::WorkKind::Reconcile)
        .await
        .unwrap();
    scheduler.handle(delivery).await;

    // The cycle ran and emitted one snapshot.
    assert_eq!(harness.pnl.list("acct-1", 10).await.unwrap().len(), 1);
}
