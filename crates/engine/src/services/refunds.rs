//! Refund scheduling trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::Money;
use thiserror::Error;

/// A refund could not be handed to the downstream scheduler.
#[derive(Debug, Error)]
#[error("refund scheduling failed: {0}")]
pub struct RefundError(pub String);

/// Trait for scheduling refunds of captured payments.
///
/// Called after a cancellation has committed. The order's persisted
/// `refund_due` flag is the source of truth; a failed call here is
/// re-driven from that flag, not retried inline.
#[async_trait]
pub trait RefundScheduler: Send + Sync {
    /// Schedules a refund of `amount` for a cancelled order.
    async fn schedule(&self, order_id: OrderId, amount: Money) -> Result<(), RefundError>;
}

#[derive(Debug, Default)]
struct InMemoryRefundState {
    scheduled: Vec<(OrderId, Money)>,
    fail_on_schedule: bool,
}

/// In-memory refund scheduler for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefundScheduler {
    state: Arc<RwLock<InMemoryRefundState>>,
}

impl InMemoryRefundScheduler {
    /// Creates a new in-memory refund scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the scheduler to fail on the next schedule call.
    pub fn set_fail_on_schedule(&self, fail: bool) {
        self.state.write().unwrap().fail_on_schedule = fail;
    }

    /// Returns the number of refunds scheduled so far.
    pub fn scheduled_count(&self) -> usize {
        self.state.read().unwrap().scheduled.len()
    }

    /// Returns the amount scheduled for an order, if any.
    pub fn scheduled_for(&self, order_id: OrderId) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .scheduled
            .iter()
            .find(|(id, _)| *id == order_id)
            .map(|(_, amount)| *amount)
    }
}

#[async_trait]
impl RefundScheduler for InMemoryRefundScheduler {
    async fn schedule(&self, order_id: OrderId, amount: Money) -> Result<(), RefundError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_schedule {
            return Err(RefundError("Refund queue unavailable".to_string()));
        }

        state.scheduled.push((order_id, amount));
        Ok(())
    }
}
