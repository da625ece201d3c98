//! Order placement engine: intake, reservation, reconciliation, cancellation.

use chrono::Utc;
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use domain::{
    IdempotencyRecord, InventoryLine, Order, OrderError, OrderStatus, PaymentOutcome,
    RequestFingerprint,
};
use store::{
    CancelOutcome, FinalizeOutcome, KeyAdmission, OrderDraft, PlacementOutcome, SaleStore,
    SaleStoreExt, StoreError,
};

use crate::config::SaleConfig;
use crate::error::{CancelError, PlaceOrderError, ReconcileError};
use crate::services::refunds::RefundScheduler;
use crate::stock::StockReport;

/// A buyer's purchase request.
///
/// The idempotency key arrives as the raw client string and is validated
/// at intake.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub idempotency_key: String,
}

/// Result of an accepted placement request.
#[derive(Debug, Clone)]
pub enum Placement {
    /// Stock was reserved and a fresh PENDING order created.
    Created(Order),

    /// The key was already bound; this is the original order, replayed.
    Replayed(Order),
}

impl Placement {
    /// The order this placement resolved to.
    pub fn order(&self) -> &Order {
        match self {
            Placement::Created(order) | Placement::Replayed(order) => order,
        }
    }

    /// Returns true if the order came from an earlier request with the
    /// same key.
    pub fn is_replay(&self) -> bool {
        matches!(self, Placement::Replayed(_))
    }
}

/// Result of applying a payment outcome.
#[derive(Debug, Clone)]
pub enum Reconciliation {
    /// The order settled and its ledger effect was applied.
    Applied(Order),

    /// The order had already settled; the outcome was ignored.
    AlreadyTerminal(OrderStatus),
}

/// Drives the flash-sale order lifecycle against a [`SaleStore`].
///
/// Placement admits the idempotency key first, then reserves stock and
/// creates the order in one store transaction. Payment outcomes and expiry
/// both settle orders through the store's finalize path, whose
/// still-pending guard makes redeliveries and races no-ops.
pub struct SaleEngine<S, R>
where
    S: SaleStore,
    R: RefundScheduler,
{
    store: S,
    refunds: R,
    config: SaleConfig,
}

impl<S, R> SaleEngine<S, R>
where
    S: SaleStore,
    R: RefundScheduler,
{
    /// Creates a new engine.
    pub fn new(store: S, refunds: R, config: SaleConfig) -> Self {
        Self {
            store,
            refunds,
            config,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The engine configuration.
    pub fn config(&self) -> &SaleConfig {
        &self.config
    }

    /// Places an order, deduplicated by idempotency key.
    ///
    /// A replayed key returns the original order without touching stock.
    /// A key whose first attempt failed before an order existed is
    /// released, so the same key can be retried.
    #[tracing::instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, quantity = cmd.quantity)
    )]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<Placement, PlaceOrderError> {
        metrics::counter!("orders_placement_requests_total").increment(1);
        let start = std::time::Instant::now();
        let now = Utc::now();

        // 1. Validate the request shape
        let key = self.validate(&cmd)?;

        // 2. Cheap pre-checks without locks. The authoritative window and
        //    stock checks run again under the row lock.
        let line = self
            .store
            .get_inventory(&cmd.product_id)
            .await?
            .ok_or_else(|| PlaceOrderError::UnknownProduct {
                product_id: cmd.product_id.clone(),
            })?;
        if !line.is_open(now) {
            return Err(PlaceOrderError::SaleWindowClosed {
                product_id: cmd.product_id,
            });
        }

        // 3. Admit the key: exactly one concurrent holder proceeds
        let fingerprint = RequestFingerprint::compute(cmd.user_id, &cmd.product_id, cmd.quantity);
        let record = IdempotencyRecord::new(key.clone(), fingerprint.clone(), now);
        match self.store.admit_key(record).await? {
            KeyAdmission::Inserted => {}
            KeyAdmission::Existing(existing) => {
                if existing.fingerprint != fingerprint {
                    metrics::counter!("orders_idempotency_conflicts_total").increment(1);
                    return Err(PlaceOrderError::IdempotencyConflict);
                }
                return match existing.order_id {
                    Some(order_id) => {
                        let order = self.store.get_order(order_id).await?.ok_or_else(|| {
                            PlaceOrderError::Store(StoreError::Integrity(format!(
                                "key {key} is bound to missing order {order_id}"
                            )))
                        })?;
                        tracing::info!(%order_id, "placement replayed from idempotency record");
                        Ok(Placement::Replayed(order))
                    }
                    None => Err(PlaceOrderError::RequestInFlight),
                };
            }
        }

        // 4. Reserve stock and create the order in one transaction
        let draft = OrderDraft {
            order_id: OrderId::new(),
            user_id: cmd.user_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            idempotency_key: key.clone(),
            placed_at: now,
            reservation_deadline: now + self.config.reservation_ttl,
        };
        let outcome = match self.store.reserve_and_place(draft).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release_admission(&key).await;
                if err.is_retryable() {
                    metrics::counter!("reserve_lock_timeouts_total").increment(1);
                }
                return Err(err.into());
            }
        };

        match outcome {
            PlacementOutcome::Placed(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                metrics::histogram!("reserve_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    order_id = %order.id,
                    reservation_deadline = %order.reservation_deadline,
                    "order placed"
                );
                Ok(Placement::Created(order))
            }
            PlacementOutcome::InsufficientStock {
                product_id,
                requested,
                available,
            } => {
                self.release_admission(&key).await;
                metrics::counter!("reserve_conflicts_total").increment(1);
                Err(PlaceOrderError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                })
            }
            PlacementOutcome::WindowClosed { product_id } => {
                self.release_admission(&key).await;
                Err(PlaceOrderError::SaleWindowClosed { product_id })
            }
            PlacementOutcome::UnknownProduct { product_id } => {
                self.release_admission(&key).await;
                Err(PlaceOrderError::UnknownProduct { product_id })
            }
        }
    }

    /// Applies a payment outcome to its order.
    ///
    /// Success confirms the order and commits its reservation; failure
    /// releases the reservation. Outcomes for already-settled orders are
    /// reported, not treated as errors, so redelivery is harmless.
    #[tracing::instrument(skip(self, outcome), fields(order_id = %outcome.order_id))]
    pub async fn apply_payment(
        &self,
        outcome: &PaymentOutcome,
    ) -> Result<Reconciliation, ReconcileError> {
        match self.store.apply_outcome(outcome).await? {
            FinalizeOutcome::Applied(order) => {
                match order.status {
                    OrderStatus::Confirmed => {
                        metrics::counter!("orders_confirmed_total").increment(1)
                    }
                    _ => metrics::counter!("orders_failed_total").increment(1),
                }
                tracing::info!(status = %order.status, "payment outcome applied");
                Ok(Reconciliation::Applied(order))
            }
            FinalizeOutcome::AlreadyTerminal(status) => {
                tracing::info!(%status, "late payment outcome ignored");
                Ok(Reconciliation::AlreadyTerminal(status))
            }
            FinalizeOutcome::NotFound => {
                tracing::error!("payment outcome references unknown order");
                Err(ReconcileError::OrderNotFound(outcome.order_id))
            }
        }
    }

    /// Cancels a confirmed order on behalf of its owner.
    ///
    /// Committed stock stays consumed. The refund is scheduled after the
    /// cancellation has committed; if scheduling fails, the order's
    /// persisted `refund_due` flag re-drives it later.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, CancelError> {
        let outcome = self
            .store
            .cancel_order(order_id, user_id, self.config.cancel_window, Utc::now())
            .await?;

        match outcome {
            CancelOutcome::Cancelled(order) => {
                metrics::counter!("orders_cancelled_total").increment(1);
                if let Err(err) = self.refunds.schedule(order.id, order.total_amount()).await {
                    tracing::error!(error = %err, "refund scheduling failed, refund_due stays set");
                }
                tracing::info!("order cancelled, refund due");
                Ok(order)
            }
            CancelOutcome::NotFound => Err(CancelError::NotFound(order_id)),
            CancelOutcome::Rejected(err) => Err(match err {
                OrderError::WrongUser => CancelError::WrongUser,
                OrderError::CancelWindowClosed { .. } => CancelError::WindowClosed,
                OrderError::InvalidStateTransition { status, .. } => {
                    CancelError::NotCancellable(status)
                }
                err @ OrderError::DeadlineNotReached { .. } => {
                    CancelError::Store(StoreError::Integrity(err.to_string()))
                }
            }),
        }
    }

    /// Fetches one order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.store.get_order(order_id).await
    }

    /// Advisory stock report for one product.
    pub async fn stock_report(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<StockReport>, StoreError> {
        let line = self.store.get_inventory(product_id).await?;
        Ok(line.map(|line| StockReport::from_line(&line, self.config.low_stock_threshold)))
    }

    /// Creates a sale line, or resets an existing line's sellable pool,
    /// price, and window.
    pub async fn seed_sale(&self, line: InventoryLine) -> Result<(), StoreError> {
        let product_id = line.product_id.clone();
        let available = line.available;
        self.store.seed_inventory(line).await?;
        tracing::info!(%product_id, available, "sale line seeded");
        Ok(())
    }

    /// Verifies the backing store is reachable.
    pub async fn health(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    fn validate(&self, cmd: &PlaceOrder) -> Result<IdempotencyKey, PlaceOrderError> {
        if cmd.quantity == 0 {
            return Err(PlaceOrderError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        if cmd.quantity > self.config.max_quantity_per_order {
            return Err(PlaceOrderError::Validation(format!(
                "quantity {} exceeds the per-order limit of {}",
                cmd.quantity, self.config.max_quantity_per_order
            )));
        }
        if cmd.product_id.as_str().is_empty() {
            return Err(PlaceOrderError::Validation(
                "product_id must not be empty".to_string(),
            ));
        }
        IdempotencyKey::new(cmd.idempotency_key.clone())
            .map_err(|err| PlaceOrderError::Validation(err.to_string()))
    }

    /// Removes the admission record after an attempt that created no order.
    ///
    /// A failure here is logged and swallowed: it never overrides the
    /// attempt's own error, and retention pruning reclaims the record.
    async fn release_admission(&self, key: &IdempotencyKey) {
        if let Err(err) = self.store.release_key(key).await {
            tracing::warn!(key = %key, error = %err, "failed to release admission record");
        }
    }
}
