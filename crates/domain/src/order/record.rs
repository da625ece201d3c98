//! Order record and its lifecycle transitions.

use chrono::{DateTime, Duration, Utc};
use common::{IdempotencyKey, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

use super::{OrderError, OrderStatus};

/// Settlement decision driving an order out of PENDING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeDecision {
    /// Payment succeeded; records the external payment reference.
    Confirm { payment_ref: String },

    /// Payment failed.
    Fail,

    /// The reservation deadline elapsed with no outcome.
    Expire,
}

/// The inventory mutation paired with a transition out of PENDING.
///
/// A store applies the status change and this effect in one transaction;
/// neither is ever persisted without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEffect {
    /// Reserved units become permanently consumed.
    Commit { product_id: ProductId, quantity: u32 },

    /// Reserved units return to the sellable pool.
    Release { product_id: ProductId, quantity: u32 },
}

/// One purchase attempt.
///
/// Created atomically with its inventory reservation, never deleted.
/// Status moves only through [`Order::finalize`] and [`Order::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: OrderId,

    /// Buyer who placed the order.
    pub user_id: UserId,

    /// Product being purchased.
    pub product_id: ProductId,

    /// Units purchased.
    pub quantity: u32,

    /// Sale price per unit, frozen at reservation time.
    pub unit_price_snapshot: Money,

    /// Key that deduplicates this purchase attempt.
    pub idempotency_key: IdempotencyKey,

    /// Current lifecycle status.
    pub status: OrderStatus,

    /// External payment reference, recorded when the order confirms.
    pub payment_ref: Option<String>,

    /// Set when a confirmed order is cancelled and a refund is owed.
    pub refund_due: bool,

    /// Creation instant.
    pub created_at: DateTime<Utc>,

    /// Instant of the last status change.
    pub updated_at: DateTime<Utc>,

    /// Instant after which the sweeper may expire a still-pending order.
    pub reservation_deadline: DateTime<Utc>,
}

impl Order {
    /// Creates a PENDING order holding a fresh reservation.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        unit_price_snapshot: Money,
        idempotency_key: IdempotencyKey,
        now: DateTime<Utc>,
        reservation_deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            product_id,
            quantity,
            unit_price_snapshot,
            idempotency_key,
            status: OrderStatus::Pending,
            payment_ref: None,
            refund_due: false,
            created_at: now,
            updated_at: now,
            reservation_deadline,
        }
    }

    /// Total amount at the snapshot price.
    pub fn total_amount(&self) -> Money {
        self.unit_price_snapshot.multiply(self.quantity)
    }

    /// Returns true if the order is still pending past its deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.reservation_deadline < now
    }

    /// Drives the order out of PENDING and returns the paired ledger effect.
    ///
    /// The caller must persist the new status and the effect in one
    /// transaction. Fails unless the order is still pending; an `Expire`
    /// decision additionally requires the deadline to have elapsed.
    pub fn finalize(
        &mut self,
        decision: FinalizeDecision,
        now: DateTime<Utc>,
    ) -> Result<LedgerEffect, OrderError> {
        if !self.status.can_finalize() {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "finalize",
            });
        }

        let effect = match decision {
            FinalizeDecision::Confirm { payment_ref } => {
                self.status = OrderStatus::Confirmed;
                self.payment_ref = Some(payment_ref);
                LedgerEffect::Commit {
                    product_id: self.product_id.clone(),
                    quantity: self.quantity,
                }
            }
            FinalizeDecision::Fail => {
                self.status = OrderStatus::Failed;
                LedgerEffect::Release {
                    product_id: self.product_id.clone(),
                    quantity: self.quantity,
                }
            }
            FinalizeDecision::Expire => {
                if now <= self.reservation_deadline {
                    return Err(OrderError::DeadlineNotReached {
                        deadline: self.reservation_deadline,
                    });
                }
                self.status = OrderStatus::Expired;
                LedgerEffect::Release {
                    product_id: self.product_id.clone(),
                    quantity: self.quantity,
                }
            }
        };

        self.updated_at = now;
        Ok(effect)
    }

    /// Cancels a confirmed order within the refund window.
    ///
    /// Committed stock is not restored; the order is marked as owing a
    /// refund. The window is measured from the confirmation instant.
    pub fn cancel(
        &mut self,
        user_id: UserId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.user_id != user_id {
            return Err(OrderError::WrongUser);
        }
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "cancel",
            });
        }
        if now - self.updated_at > window {
            return Err(OrderError::CancelWindowClosed {
                confirmed_at: self.updated_at,
            });
        }

        self.status = OrderStatus::Cancelled;
        self.refund_due = true;
        self.updated_at = now;
        Ok(())
    }
}
