use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use domain::{
    FinalizeDecision, IdempotencyRecord, InventoryLine, Order, OrderError, OrderStatus,
    PaymentOutcome, PaymentResult,
};

use crate::Result;

/// Everything needed to insert a PENDING order inside the reservation
/// transaction.
///
/// The price snapshot is not part of the draft: it is read from the
/// inventory line under the row lock, so the frozen price is the one the
/// reservation actually debited.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    /// Identifier for the order about to be created.
    pub order_id: OrderId,

    /// Buyer placing the order.
    pub user_id: UserId,

    /// Product being purchased.
    pub product_id: ProductId,

    /// Units requested.
    pub quantity: u32,

    /// Admitted key to bind to the order in the same transaction.
    pub idempotency_key: IdempotencyKey,

    /// Placement instant; also the authoritative sale-window check time.
    pub placed_at: DateTime<Utc>,

    /// Deadline after which the sweeper may expire the order.
    pub reservation_deadline: DateTime<Utc>,
}

/// Result of the atomic insert-if-absent key admission.
#[derive(Debug, Clone)]
pub enum KeyAdmission {
    /// The key was free; this caller now owns the attempt.
    Inserted,

    /// The key is already held; the record says by whom and how far along.
    Existing(IdempotencyRecord),
}

/// Result of reserving stock and creating the order, one transaction.
#[derive(Debug, Clone)]
pub enum PlacementOutcome {
    /// Reservation debited and PENDING order created.
    Placed(Order),

    /// Not enough sellable stock; nothing was persisted.
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The sale window was closed at the authoritative check under the lock.
    WindowClosed { product_id: ProductId },

    /// No inventory line exists for the product.
    UnknownProduct { product_id: ProductId },
}

/// Result of driving an order out of PENDING.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// Status change and paired ledger effect committed together.
    Applied(Order),

    /// The order had already left PENDING; nothing was mutated.
    AlreadyTerminal(OrderStatus),

    /// No such order. Signals an upstream integrity problem to the caller.
    NotFound,
}

/// Result of a user cancellation attempt.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The order is cancelled and owes a refund.
    Cancelled(Order),

    /// No such order.
    NotFound,

    /// The transition rules refused the cancellation.
    Rejected(OrderError),
}

/// Returns the lock-acquisition order for a set of inventory rows.
///
/// Ascending product id, duplicates collapsed. Every multi-row operation
/// locks in this order and never in request-arrival order, which makes
/// lock cycles between concurrent reservations structurally impossible.
pub fn lock_plan(product_ids: &[ProductId]) -> Vec<ProductId> {
    let mut plan: Vec<ProductId> = product_ids.to_vec();
    plan.sort();
    plan.dedup();
    plan
}

/// Core trait for sale store implementations.
///
/// Each method is one atomic composite operation: all of its writes commit
/// together or none do. Row locks taken inside an operation are bounded by
/// the implementation's lock wait and surface
/// [`StoreError::LockTimeout`](crate::StoreError::LockTimeout) on expiry.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Inserts an unresolved idempotency record if the key is absent.
    ///
    /// Exactly one caller per key ever observes [`KeyAdmission::Inserted`];
    /// everyone else gets the existing record.
    async fn admit_key(&self, record: IdempotencyRecord) -> Result<KeyAdmission>;

    /// Deletes the record for `key` if it is still unresolved.
    ///
    /// Called when an admitted attempt failed before any order existed, so
    /// a retry of the same key is not wedged behind a dead attempt.
    /// Records bound to an order are never touched.
    async fn release_key(&self, key: &IdempotencyKey) -> Result<()>;

    /// Reserves stock and creates the PENDING order in one transaction.
    ///
    /// Locks the inventory row(s) in ascending product order, re-checks the
    /// sale window and `available >= quantity` under the lock, debits
    /// `available` into `reserved`, inserts the order with the price
    /// snapshot read under the lock, and binds `order_id` into the
    /// idempotency record. On any non-placed outcome nothing is persisted.
    async fn reserve_and_place(&self, draft: OrderDraft) -> Result<PlacementOutcome>;

    /// Drives a PENDING order to its settled status with the paired ledger
    /// effect, one transaction.
    ///
    /// The order row is locked first, then the inventory row. An order
    /// that already left PENDING is reported as
    /// [`FinalizeOutcome::AlreadyTerminal`] and not mutated, which makes
    /// redelivered outcomes and sweeper races no-ops.
    async fn finalize_order(
        &self,
        order_id: OrderId,
        decision: FinalizeDecision,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome>;

    /// Cancels a confirmed order within `window` of its confirmation.
    ///
    /// Mutates no inventory: committed stock stays consumed. The order is
    /// marked as owing a refund.
    async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome>;

    /// Fetches an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Fetches an inventory line without locking it.
    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<InventoryLine>>;

    /// Creates a sale line, or resets an existing line's sellable pool,
    /// price, and window. `reserved` and `committed` are never overwritten.
    async fn seed_inventory(&self, line: InventoryLine) -> Result<()>;

    /// Returns ids of PENDING orders whose deadline elapsed before `now`,
    /// oldest deadline first, at most `limit`.
    ///
    /// A plain scan: each candidate is settled individually through
    /// [`SaleStore::finalize_order`], whose still-PENDING guard absorbs
    /// candidates a racing payment outcome got to first.
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OrderId>>;

    /// Deletes idempotency records created before `cutoff`. Returns the
    /// number removed. Callers enforce the retention floor.
    async fn prune_keys(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Verifies the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for sale stores.
#[async_trait]
pub trait SaleStoreExt: SaleStore {
    /// Finalizes the order a payment outcome refers to.
    ///
    /// `Succeeded` confirms and records the payment reference; `Failed`
    /// fails the order and releases its reservation.
    async fn apply_outcome(&self, outcome: &PaymentOutcome) -> Result<FinalizeOutcome> {
        let decision = match outcome.result {
            PaymentResult::Succeeded => FinalizeDecision::Confirm {
                payment_ref: outcome.external_payment_id.clone(),
            },
            PaymentResult::Failed => FinalizeDecision::Fail,
        };
        self.finalize_order(outcome.order_id, decision, outcome.received_at)
            .await
    }

    /// Returns true if an order with this id exists.
    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.get_order(order_id).await?.is_some())
    }
}

// Blanket implementation for all SaleStore implementations
impl<T: SaleStore + ?Sized> SaleStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_plan_sorts_ascending_and_dedups() {
        let ids = [
            ProductId::new("SKU-010"),
            ProductId::new("SKU-001"),
            ProductId::new("SKU-010"),
            ProductId::new("SKU-002"),
        ];
        let plan = lock_plan(&ids);
        assert_eq!(
            plan.iter().map(ProductId::as_str).collect::<Vec<_>>(),
            vec!["SKU-001", "SKU-002", "SKU-010"],
        );
    }

    #[test]
    fn lock_plan_of_disjoint_sets_is_consistent() {
        // Two requests touching the same pair lock it in the same order
        // regardless of arrival order.
        let a = lock_plan(&[ProductId::new("SKU-B"), ProductId::new("SKU-A")]);
        let b = lock_plan(&[ProductId::new("SKU-A"), ProductId::new("SKU-B")]);
        assert_eq!(a, b);
    }
}
