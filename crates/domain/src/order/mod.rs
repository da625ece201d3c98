//! Order record, status machine, and transition rules.

mod record;
mod state;

pub use record::{FinalizeDecision, LedgerEffect, Order};
pub use state::OrderStatus;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from order transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The order is not in a status that permits the attempted action.
    #[error("invalid transition: cannot {action} from {status} status")]
    InvalidStateTransition {
        status: OrderStatus,
        action: &'static str,
    },

    /// An expiry was attempted before the reservation deadline elapsed.
    #[error("reservation deadline {deadline} has not elapsed")]
    DeadlineNotReached { deadline: DateTime<Utc> },

    /// A cancellation arrived after the refund window closed.
    #[error("cancellation window closed (confirmed at {confirmed_at})")]
    CancelWindowClosed { confirmed_at: DateTime<Utc> },

    /// The caller does not own the order.
    #[error("order belongs to a different user")]
    WrongUser,
}
