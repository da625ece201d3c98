//! Errors surfaced by engine operations.
//!
//! Contention and in-flight duplicates are retryable and callers are
//! expected to back off and resubmit with the same idempotency key.

use common::{OrderId, ProductId};
use domain::OrderStatus;
use store::StoreError;
use thiserror::Error;

/// Why an order placement was refused.
#[derive(Debug, Error)]
pub enum PlaceOrderError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("sale window for product {product_id} is closed")]
    SaleWindowClosed { product_id: ProductId },

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("idempotency key reused with a different request payload")]
    IdempotencyConflict,

    #[error("a request with this idempotency key is still in flight")]
    RequestInFlight,

    #[error("unknown product: {product_id}")]
    UnknownProduct { product_id: ProductId },

    #[error("timed out waiting for a row lock")]
    LockTimeout,

    #[error("store error: {0}")]
    Store(StoreError),
}

impl PlaceOrderError {
    /// True when the same request can be resubmitted unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RequestInFlight | Self::LockTimeout)
    }
}

impl From<StoreError> for PlaceOrderError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            Self::LockTimeout
        } else {
            Self::Store(err)
        }
    }
}

/// Why a payment outcome could not be applied.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("payment outcome references unknown order {0}")]
    OrderNotFound(OrderId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Why a cancellation was refused.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("order in status {0} cannot be cancelled")]
    NotCancellable(OrderStatus),

    #[error("cancellation window has closed")]
    WindowClosed,

    #[error("order belongs to a different user")]
    WrongUser,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(PlaceOrderError::RequestInFlight.is_retryable());
        assert!(PlaceOrderError::LockTimeout.is_retryable());
        assert!(!PlaceOrderError::IdempotencyConflict.is_retryable());
        assert!(!PlaceOrderError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_store_lock_timeout_maps_to_retryable() {
        let err: PlaceOrderError = StoreError::LockTimeout(Duration::from_millis(250)).into();
        assert!(matches!(err, PlaceOrderError::LockTimeout));
        assert!(err.is_retryable());

        let err: PlaceOrderError = StoreError::Integrity("bad row".into()).into();
        assert!(matches!(err, PlaceOrderError::Store(_)));
        assert!(!err.is_retryable());
    }
}
