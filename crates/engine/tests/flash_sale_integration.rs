//! End-to-end engine tests over the in-memory store.
//!
//! These drive whole order lifecycles through the public engine API and
//! check the invariants that matter under load: no overselling, one order
//! per idempotency key, and stock conservation across settlement paths.

use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, UserId};
use domain::{InventoryLine, Money, OrderStatus, PaymentOutcome, PaymentResult};
use engine::{
    CancelError, InMemoryRefundScheduler, PlaceOrder, PlaceOrderError, Placement, Reconciliation,
    SaleConfig, SaleEngine, Sweeper,
};
use futures_util::future::join_all;
use store::{MemoryStore, SaleStore};

const SKU: &str = "SKU-HOT-001";

async fn engine_with_stock(
    stock: u32,
    config: SaleConfig,
) -> (
    Arc<SaleEngine<MemoryStore, InMemoryRefundScheduler>>,
    MemoryStore,
    InMemoryRefundScheduler,
) {
    let store = MemoryStore::new();
    let refunds = InMemoryRefundScheduler::new();
    let engine = SaleEngine::new(store.clone(), refunds.clone(), config);
    engine
        .seed_sale(InventoryLine::new(SKU, stock, Money::from_cents(2500)))
        .await
        .unwrap();
    (Arc::new(engine), store, refunds)
}

fn purchase(key: String) -> PlaceOrder {
    PlaceOrder {
        user_id: UserId::new(),
        product_id: ProductId::new(SKU),
        quantity: 1,
        idempotency_key: key,
    }
}

#[tokio::test]
async fn test_oversell_never_happens_under_concurrent_load() {
    let (engine, store, _) = engine_with_stock(100, SaleConfig::default()).await;

    let tasks: Vec<_> = (0..1000)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(
                async move { engine.place_order(purchase(format!("load-test-key-{i:06}"))).await },
            )
        })
        .collect();

    let mut created = 0;
    let mut sold_out = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(placement) => {
                assert!(!placement.is_replay());
                created += 1;
            }
            Err(PlaceOrderError::InsufficientStock { .. }) => sold_out += 1,
            Err(other) => panic!("unexpected placement error: {other}"),
        }
    }

    assert_eq!(created, 100);
    assert_eq!(sold_out, 900);
    assert_eq!(store.order_count().await, 100);

    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.available, 0);
    assert_eq!(line.reserved, 100);
    assert_eq!(line.total(), 100);

    // Losing attempts released their admission records.
    assert_eq!(store.key_count().await, 100);
}

#[tokio::test]
async fn test_concurrent_duplicate_keys_create_one_order() {
    let (engine, store, _) = engine_with_stock(100, SaleConfig::default()).await;
    let cmd = purchase("duplicate-race-key-001".to_string());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let cmd = cmd.clone();
            tokio::spawn(async move { engine.place_order(cmd).await })
        })
        .collect();

    let mut created_ids = Vec::new();
    let mut replayed_ids = Vec::new();
    let mut in_flight = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(Placement::Created(order)) => created_ids.push(order.id),
            Ok(Placement::Replayed(order)) => replayed_ids.push(order.id),
            Err(PlaceOrderError::RequestInFlight) => in_flight += 1,
            Err(other) => panic!("unexpected placement error: {other}"),
        }
    }

    assert_eq!(created_ids.len(), 1);
    assert_eq!(replayed_ids.len() + in_flight, 19);
    assert!(replayed_ids.iter().all(|id| *id == created_ids[0]));
    assert_eq!(store.order_count().await, 1);

    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.reserved, 1);
}

#[tokio::test]
async fn test_replay_returns_settled_order_state() {
    let (engine, _, _) = engine_with_stock(10, SaleConfig::default()).await;
    let cmd = purchase("replay-settled-key-01".to_string());

    let placement = engine.place_order(cmd.clone()).await.unwrap();
    let order_id = placement.order().id;
    assert_eq!(placement.order().status, OrderStatus::Pending);

    let outcome = PaymentOutcome::new(order_id, "pay_replay", PaymentResult::Succeeded);
    engine.apply_payment(&outcome).await.unwrap();

    // The same request now replays the confirmed order.
    let replay = engine.place_order(cmd).await.unwrap();
    assert!(replay.is_replay());
    assert_eq!(replay.order().id, order_id);
    assert_eq!(replay.order().status, OrderStatus::Confirmed);
    assert_eq!(replay.order().payment_ref.as_deref(), Some("pay_replay"));
}

#[tokio::test]
async fn test_expiry_restores_stock_and_defeats_late_outcome() {
    let config = SaleConfig {
        reservation_ttl: chrono::Duration::milliseconds(50),
        ..SaleConfig::default()
    };
    let (engine, store, _) = engine_with_stock(10, config.clone()).await;

    let placement = engine
        .place_order(purchase("expiry-lifecycle-key-1".to_string()))
        .await
        .unwrap();
    let order_id = placement.order().id;

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    let sweeper = Sweeper::new(store.clone(), &config);
    assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 1);

    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.available, 10);
    assert_eq!(line.reserved, 0);

    // A payment outcome arriving after expiry must not resurrect the order
    // or double-release its reservation.
    let late = PaymentOutcome::new(order_id, "pay_too_late", PaymentResult::Succeeded);
    let reconciliation = engine.apply_payment(&late).await.unwrap();
    assert!(matches!(
        reconciliation,
        Reconciliation::AlreadyTerminal(OrderStatus::Expired)
    ));

    let order = engine.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    assert!(order.payment_ref.is_none());
    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.available, 10);
    assert_eq!(line.committed, 0);
}

#[tokio::test]
async fn test_mixed_settlement_preserves_conservation() {
    let config = SaleConfig {
        reservation_ttl: chrono::Duration::milliseconds(80),
        ..SaleConfig::default()
    };
    let (engine, store, _) = engine_with_stock(30, config.clone()).await;

    let placements = join_all((0..20).map(|i| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .place_order(purchase(format!("mixed-settle-key-{i:04}")))
                .await
                .unwrap()
        }
    }))
    .await;
    let order_ids: Vec<_> = placements.iter().map(|p| p.order().id).collect();

    // Confirm 8, fail 6, leave 6 to expire, all concurrently.
    let settlements = order_ids
        .iter()
        .take(14)
        .enumerate()
        .map(|(i, &order_id)| {
            let engine = Arc::clone(&engine);
            let result = if i < 8 {
                PaymentResult::Succeeded
            } else {
                PaymentResult::Failed
            };
            async move {
                let outcome = PaymentOutcome::new(order_id, format!("pay-{i}"), result);
                engine.apply_payment(&outcome).await.unwrap();
            }
        });
    join_all(settlements).await;

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let sweeper = Sweeper::new(store.clone(), &config);
    assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 6);

    let mut confirmed = 0;
    let mut failed = 0;
    let mut expired = 0;
    for order_id in order_ids {
        match engine.get_order(order_id).await.unwrap().unwrap().status {
            OrderStatus::Confirmed => confirmed += 1,
            OrderStatus::Failed => failed += 1,
            OrderStatus::Expired => expired += 1,
            status => panic!("unexpected status {status}"),
        }
    }
    assert_eq!((confirmed, failed, expired), (8, 6, 6));

    // Every unit is accounted for: 8 committed, the rest back on sale.
    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.available, 22);
    assert_eq!(line.reserved, 0);
    assert_eq!(line.committed, 8);
    assert_eq!(line.total(), 30);
}

#[tokio::test]
async fn test_lock_timeout_surfaces_retryable_error() {
    let store = MemoryStore::new();
    store
        .seed_inventory(InventoryLine::new(SKU, 10, Money::from_cents(2500)))
        .await
        .unwrap();

    let contended = store.clone().with_lock_wait(std::time::Duration::from_millis(20));
    let engine = SaleEngine::new(
        contended,
        InMemoryRefundScheduler::new(),
        SaleConfig::default(),
    );

    let holder = tokio::spawn({
        let store = store.clone();
        async move { store.hold_lock(std::time::Duration::from_millis(200)).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let err = engine
        .place_order(purchase("busy-store-key-00001".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaceOrderError::LockTimeout));
    assert!(err.is_retryable());
    holder.await.unwrap();

    // The attempt died before admission; no record was left behind.
    assert_eq!(store.key_count().await, 0);
}

#[tokio::test]
async fn test_cancel_after_confirmation_schedules_refund() {
    let (engine, store, refunds) = engine_with_stock(10, SaleConfig::default()).await;
    let cmd = purchase("cancel-lifecycle-key-1".to_string());
    let user_id = cmd.user_id;

    let placement = engine.place_order(cmd).await.unwrap();
    let order_id = placement.order().id;
    let outcome = PaymentOutcome::new(order_id, "pay_cancel", PaymentResult::Succeeded);
    engine.apply_payment(&outcome).await.unwrap();

    let order = engine.cancel_order(order_id, user_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.refund_due);
    assert_eq!(refunds.scheduled_count(), 1);
    assert_eq!(refunds.scheduled_for(order_id), Some(Money::from_cents(2500)));

    // Committed stock stays consumed after cancellation.
    let line = store
        .get_inventory(&ProductId::new(SKU))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.available, 9);
    assert_eq!(line.committed, 1);

    let err = engine.cancel_order(order_id, user_id).await.unwrap_err();
    assert!(matches!(
        err,
        CancelError::NotCancellable(OrderStatus::Cancelled)
    ));
}
