use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use domain::{
    FinalizeDecision, IdempotencyRecord, InventoryError, InventoryLine, LedgerEffect, Order,
};

use crate::{
    Result, StoreError,
    store::{
        CancelOutcome, FinalizeOutcome, KeyAdmission, OrderDraft, PlacementOutcome, SaleStore,
    },
};

/// Default bound on waiting for the store lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct MemoryState {
    inventory: HashMap<ProductId, InventoryLine>,
    orders: HashMap<OrderId, Order>,
    keys: HashMap<IdempotencyKey, IdempotencyRecord>,
}

/// In-memory sale store for tests and single-process runs.
///
/// One mutex stands in for the database's transaction machinery: holding it
/// for the duration of a composite operation gives the same atomicity, and
/// acquiring it with a bounded wait gives the same fail-fast contention
/// behavior. Operations never leave partial state behind: mutations are
/// applied to copies and written back only when the whole operation
/// succeeded.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<tokio::sync::Mutex<MemoryState>>,
    lock_wait: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the default lock wait.
    pub fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(MemoryState::default())),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Sets the bound on waiting for the store lock.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of idempotency records stored.
    pub async fn key_count(&self) -> usize {
        self.state.lock().await.keys.len()
    }

    /// Clears all state.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.inventory.clear();
        state.orders.clear();
        state.keys.clear();
    }

    /// Test support: occupies the store lock for `duration`, so concurrent
    /// operations run into the bounded wait.
    pub async fn hold_lock(&self, duration: Duration) {
        let guard = self.state.lock().await;
        tokio::time::sleep(duration).await;
        drop(guard);
    }

    async fn lock_state(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>> {
        tokio::time::timeout(self.lock_wait, self.state.lock())
            .await
            .map_err(|_| StoreError::LockTimeout(self.lock_wait))
    }
}

#[async_trait]
impl SaleStore for MemoryStore {
    async fn admit_key(&self, record: IdempotencyRecord) -> Result<KeyAdmission> {
        let mut state = self.lock_state().await?;
        match state.keys.entry(record.key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(KeyAdmission::Inserted)
            }
            Entry::Occupied(entry) => Ok(KeyAdmission::Existing(entry.get().clone())),
        }
    }

    async fn release_key(&self, key: &IdempotencyKey) -> Result<()> {
        let mut state = self.lock_state().await?;
        if let Some(record) = state.keys.get(key)
            && record.order_id.is_none()
        {
            state.keys.remove(key);
        }
        Ok(())
    }

    async fn reserve_and_place(&self, draft: OrderDraft) -> Result<PlacementOutcome> {
        let mut state = self.lock_state().await?;

        let Some(line) = state.inventory.get(&draft.product_id) else {
            return Ok(PlacementOutcome::UnknownProduct {
                product_id: draft.product_id,
            });
        };
        if !line.is_open(draft.placed_at) {
            return Ok(PlacementOutcome::WindowClosed {
                product_id: draft.product_id,
            });
        }

        let mut updated = line.clone();
        match updated.reserve(draft.quantity) {
            Ok(()) => {}
            Err(InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                return Ok(PlacementOutcome::InsufficientStock {
                    product_id,
                    requested,
                    available,
                });
            }
            Err(err) => return Err(StoreError::Integrity(err.to_string())),
        }

        match state.keys.get(&draft.idempotency_key) {
            None => {
                return Err(StoreError::Integrity(format!(
                    "no admission record for key {}",
                    draft.idempotency_key
                )));
            }
            Some(record) if record.order_id.is_some() => {
                return Err(StoreError::Integrity(format!(
                    "key {} is already bound to an order",
                    draft.idempotency_key
                )));
            }
            Some(_) => {}
        }

        let order = Order::place(
            draft.order_id,
            draft.user_id,
            draft.product_id.clone(),
            draft.quantity,
            updated.unit_price,
            draft.idempotency_key.clone(),
            draft.placed_at,
            draft.reservation_deadline,
        );

        state.inventory.insert(draft.product_id, updated);
        state.orders.insert(order.id, order.clone());
        if let Some(record) = state.keys.get_mut(&draft.idempotency_key) {
            record.order_id = Some(order.id);
        }

        Ok(PlacementOutcome::Placed(order))
    }

    async fn finalize_order(
        &self,
        order_id: OrderId,
        decision: FinalizeDecision,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let mut state = self.lock_state().await?;

        let Some(order) = state.orders.get(&order_id) else {
            return Ok(FinalizeOutcome::NotFound);
        };
        if !order.status.can_finalize() {
            return Ok(FinalizeOutcome::AlreadyTerminal(order.status));
        }

        let mut updated_order = order.clone();
        let effect = updated_order
            .finalize(decision, now)
            .map_err(|err| StoreError::Integrity(err.to_string()))?;

        let product_id = match &effect {
            LedgerEffect::Commit { product_id, .. }
            | LedgerEffect::Release { product_id, .. } => product_id.clone(),
        };
        let mut updated_line = state.inventory.get(&product_id).cloned().ok_or_else(|| {
            StoreError::Integrity(format!(
                "order {order_id} references missing inventory line {product_id}"
            ))
        })?;
        match &effect {
            LedgerEffect::Commit { quantity, .. } => updated_line.commit(*quantity),
            LedgerEffect::Release { quantity, .. } => updated_line.release(*quantity),
        }
        .map_err(|err| StoreError::Integrity(err.to_string()))?;

        state.inventory.insert(product_id, updated_line);
        state.orders.insert(order_id, updated_order.clone());
        Ok(FinalizeOutcome::Applied(updated_order))
    }

    async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let mut state = self.lock_state().await?;

        let Some(order) = state.orders.get(&order_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        let mut updated = order.clone();
        match updated.cancel(user_id, window, now) {
            Ok(()) => {
                state.orders.insert(order_id, updated.clone());
                Ok(CancelOutcome::Cancelled(updated))
            }
            Err(err) => Ok(CancelOutcome::Rejected(err)),
        }
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.lock_state().await?;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<InventoryLine>> {
        let state = self.lock_state().await?;
        Ok(state.inventory.get(product_id).cloned())
    }

    async fn seed_inventory(&self, line: InventoryLine) -> Result<()> {
        let mut state = self.lock_state().await?;
        match state.inventory.entry(line.product_id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(line);
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.available = line.available;
                existing.unit_price = line.unit_price;
                existing.window = line.window;
                existing.version += 1;
            }
        }
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OrderId>> {
        let state = self.lock_state().await?;
        let mut due: Vec<(DateTime<Utc>, OrderId)> = state
            .orders
            .values()
            .filter(|order| order.is_expired(now))
            .map(|order| (order.reservation_deadline, order.id))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn prune_keys(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.lock_state().await?;
        let before = state.keys.len();
        state.keys.retain(|_, record| record.created_at >= cutoff);
        Ok((before - state.keys.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domain::{Money, OrderStatus, RequestFingerprint};

    fn fingerprint(user_id: UserId, product: &str, quantity: u32) -> RequestFingerprint {
        RequestFingerprint::compute(user_id, &ProductId::new(product), quantity)
    }

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    async fn seeded_store(stock: u32) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed_inventory(InventoryLine::new("SKU-001", stock, Money::from_cents(999)))
            .await
            .unwrap();
        store
    }

    async fn admitted_draft(store: &MemoryStore, quantity: u32, key_name: &str) -> OrderDraft {
        let now = Utc::now();
        let user_id = UserId::new();
        let record = IdempotencyRecord::new(
            key(key_name),
            fingerprint(user_id, "SKU-001", quantity),
            now,
        );
        assert!(matches!(
            store.admit_key(record).await.unwrap(),
            KeyAdmission::Inserted
        ));
        OrderDraft {
            order_id: OrderId::new(),
            user_id,
            product_id: ProductId::new("SKU-001"),
            quantity,
            idempotency_key: key(key_name),
            placed_at: now,
            reservation_deadline: now + ChronoDuration::minutes(15),
        }
    }

    #[tokio::test]
    async fn admit_key_inserts_once() {
        let store = MemoryStore::new();
        let user_id = UserId::new();
        let record = IdempotencyRecord::new(
            key("admission-key-000001"),
            fingerprint(user_id, "SKU-001", 1),
            Utc::now(),
        );

        assert!(matches!(
            store.admit_key(record.clone()).await.unwrap(),
            KeyAdmission::Inserted
        ));
        match store.admit_key(record.clone()).await.unwrap() {
            KeyAdmission::Existing(existing) => {
                assert_eq!(existing.fingerprint, record.fingerprint);
                assert!(existing.order_id.is_none());
            }
            KeyAdmission::Inserted => panic!("second admission must see the existing record"),
        }
    }

    #[tokio::test]
    async fn release_key_only_removes_unresolved_records() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 1, "release-key-00000001").await;
        let resolved_key = draft.idempotency_key.clone();
        store.reserve_and_place(draft).await.unwrap();

        store.release_key(&resolved_key).await.unwrap();
        assert_eq!(store.key_count().await, 1);

        let user_id = UserId::new();
        let unresolved = IdempotencyRecord::new(
            key("release-key-00000002"),
            fingerprint(user_id, "SKU-001", 1),
            Utc::now(),
        );
        store.admit_key(unresolved).await.unwrap();
        store.release_key(&key("release-key-00000002")).await.unwrap();
        assert_eq!(store.key_count().await, 1);
    }

    #[tokio::test]
    async fn reserve_and_place_debits_and_binds() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 3, "reserve-place-key-001").await;
        let draft_key = draft.idempotency_key.clone();

        let order = match store.reserve_and_place(draft).await.unwrap() {
            PlacementOutcome::Placed(order) => order,
            other => panic!("expected placement, got {other:?}"),
        };

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.unit_price_snapshot, Money::from_cents(999));

        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.available, 7);
        assert_eq!(line.reserved, 3);

        match store
            .admit_key(IdempotencyRecord::new(
                draft_key,
                fingerprint(order.user_id, "SKU-001", 3),
                Utc::now(),
            ))
            .await
            .unwrap()
        {
            KeyAdmission::Existing(record) => assert_eq!(record.order_id, Some(order.id)),
            KeyAdmission::Inserted => panic!("record must persist after placement"),
        }
    }

    #[tokio::test]
    async fn reserve_and_place_insufficient_stock_leaves_no_trace() {
        let store = seeded_store(2).await;
        let draft = admitted_draft(&store, 3, "insufficient-key-0001").await;

        match store.reserve_and_place(draft).await.unwrap() {
            PlacementOutcome::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }

        assert_eq!(store.order_count().await, 0);
        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.available, 2);
        assert_eq!(line.reserved, 0);
    }

    #[tokio::test]
    async fn reserve_and_place_unknown_product() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::new();
        store
            .admit_key(IdempotencyRecord::new(
                key("unknown-product-key-1"),
                fingerprint(user_id, "SKU-MISSING", 1),
                now,
            ))
            .await
            .unwrap();
        let draft = OrderDraft {
            order_id: OrderId::new(),
            user_id,
            product_id: ProductId::new("SKU-MISSING"),
            quantity: 1,
            idempotency_key: key("unknown-product-key-1"),
            placed_at: now,
            reservation_deadline: now + ChronoDuration::minutes(15),
        };

        assert!(matches!(
            store.reserve_and_place(draft).await.unwrap(),
            PlacementOutcome::UnknownProduct { .. }
        ));
    }

    #[tokio::test]
    async fn reserve_and_place_checks_window_under_lock() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .seed_inventory(
                InventoryLine::new("SKU-001", 10, Money::from_cents(999)).with_window(
                    domain::SaleWindow {
                        opens_at: None,
                        closes_at: Some(now - ChronoDuration::minutes(1)),
                    },
                ),
            )
            .await
            .unwrap();
        let draft = admitted_draft(&store, 1, "window-closed-key-001").await;

        assert!(matches!(
            store.reserve_and_place(draft).await.unwrap(),
            PlacementOutcome::WindowClosed { .. }
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn reserve_and_place_without_admission_is_integrity_error() {
        let store = seeded_store(5).await;
        let now = Utc::now();
        let draft = OrderDraft {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            product_id: ProductId::new("SKU-001"),
            quantity: 1,
            idempotency_key: key("never-admitted-key-01"),
            placed_at: now,
            reservation_deadline: now + ChronoDuration::minutes(15),
        };

        let err = store.reserve_and_place(draft).await.unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
        // The failed operation must not have debited stock.
        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.available, 5);
        assert_eq!(line.reserved, 0);
    }

    #[tokio::test]
    async fn finalize_confirm_commits_stock() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 2, "finalize-confirm-key-1").await;
        let order = match store.reserve_and_place(draft).await.unwrap() {
            PlacementOutcome::Placed(order) => order,
            other => panic!("expected placement, got {other:?}"),
        };

        let outcome = store
            .finalize_order(
                order.id,
                FinalizeDecision::Confirm {
                    payment_ref: "pay_mem_1".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        match outcome {
            FinalizeOutcome::Applied(updated) => {
                assert_eq!(updated.status, OrderStatus::Confirmed);
                assert_eq!(updated.payment_ref.as_deref(), Some("pay_mem_1"));
            }
            other => panic!("expected applied, got {other:?}"),
        }

        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.available, 8);
        assert_eq!(line.reserved, 0);
        assert_eq!(line.committed, 2);
    }

    #[tokio::test]
    async fn finalize_twice_reports_already_terminal_without_mutation() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 2, "finalize-twice-key-01").await;
        let order = match store.reserve_and_place(draft).await.unwrap() {
            PlacementOutcome::Placed(order) => order,
            other => panic!("expected placement, got {other:?}"),
        };

        store
            .finalize_order(order.id, FinalizeDecision::Fail, Utc::now())
            .await
            .unwrap();
        let second = store
            .finalize_order(order.id, FinalizeDecision::Fail, Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            second,
            FinalizeOutcome::AlreadyTerminal(OrderStatus::Failed)
        ));
        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        // One release, not two.
        assert_eq!(line.available, 10);
        assert_eq!(line.total(), 10);
    }

    #[tokio::test]
    async fn finalize_missing_order_reports_not_found() {
        let store = seeded_store(1).await;
        let outcome = store
            .finalize_order(OrderId::new(), FinalizeDecision::Fail, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::NotFound));
    }

    #[tokio::test]
    async fn cancel_respects_domain_rules() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 1, "cancel-rules-key-0001").await;
        let user_id = draft.user_id;
        let order = match store.reserve_and_place(draft).await.unwrap() {
            PlacementOutcome::Placed(order) => order,
            other => panic!("expected placement, got {other:?}"),
        };

        // Pending orders cannot be cancelled.
        assert!(matches!(
            store
                .cancel_order(order.id, user_id, ChronoDuration::hours(24), Utc::now())
                .await
                .unwrap(),
            CancelOutcome::Rejected(_)
        ));

        store
            .finalize_order(
                order.id,
                FinalizeDecision::Confirm {
                    payment_ref: "pay_cancel".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        match store
            .cancel_order(order.id, user_id, ChronoDuration::hours(24), Utc::now())
            .await
            .unwrap()
        {
            CancelOutcome::Cancelled(cancelled) => {
                assert_eq!(cancelled.status, OrderStatus::Cancelled);
                assert!(cancelled.refund_due);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }

        // Committed stock stays consumed.
        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.committed, 1);
    }

    #[tokio::test]
    async fn find_expired_orders_oldest_first_with_limit() {
        let store = seeded_store(10).await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3u32 {
            let mut draft =
                admitted_draft(&store, 1, &format!("expired-scan-key-{i:04}")).await;
            draft.reservation_deadline = now - ChronoDuration::minutes(10 - i as i64);
            match store.reserve_and_place(draft).await.unwrap() {
                PlacementOutcome::Placed(order) => ids.push(order.id),
                other => panic!("expected placement, got {other:?}"),
            }
        }

        let due = store.find_expired(now, 10).await.unwrap();
        assert_eq!(due, ids);

        let capped = store.find_expired(now, 2).await.unwrap();
        assert_eq!(capped, ids[..2].to_vec());
    }

    #[tokio::test]
    async fn prune_keys_removes_only_old_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = UserId::new();
        let old = IdempotencyRecord::new(
            key("prune-old-key-000001"),
            fingerprint(user_id, "SKU-001", 1),
            now - ChronoDuration::hours(72),
        );
        let fresh = IdempotencyRecord::new(
            key("prune-new-key-000001"),
            fingerprint(user_id, "SKU-001", 2),
            now,
        );
        store.admit_key(old).await.unwrap();
        store.admit_key(fresh).await.unwrap();

        let removed = store
            .prune_keys(now - ChronoDuration::hours(48))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.key_count().await, 1);
    }

    #[tokio::test]
    async fn seed_preserves_reservation_pools() {
        let store = seeded_store(10).await;
        let draft = admitted_draft(&store, 4, "seed-preserve-key-001").await;
        store.reserve_and_place(draft).await.unwrap();

        store
            .seed_inventory(InventoryLine::new("SKU-001", 50, Money::from_cents(777)))
            .await
            .unwrap();

        let line = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.available, 50);
        assert_eq!(line.reserved, 4);
        assert_eq!(line.unit_price, Money::from_cents(777));
    }

    #[tokio::test]
    async fn bounded_lock_wait_surfaces_timeout() {
        let store = seeded_store(10)
            .await
            .with_lock_wait(Duration::from_millis(20));
        let holder = store.clone();
        let handle = tokio::spawn(async move {
            holder.hold_lock(Duration::from_millis(200)).await;
        });
        // Give the holder time to take the lock.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = store
            .get_inventory(&ProductId::new("SKU-001"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_retryable());
        handle.await.unwrap();
    }
}
