//! Shared identifier types for the flash-sale engine.

pub mod types;

pub use types::{
    IDEMPOTENCY_KEY_MAX_LEN, IDEMPOTENCY_KEY_MIN_LEN, IdempotencyKey, IdempotencyKeyError,
    OrderId, ProductId, UserId,
};
