//! External service ports used by the engine.

pub mod refunds;

pub use refunds::{InMemoryRefundScheduler, RefundError, RefundScheduler};
