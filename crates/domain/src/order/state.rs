//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Transitions:
/// ```text
/// Pending ──(payment succeeded)──► Confirmed ──(user cancel, in window)──► Cancelled
///    │
///    ├──(payment failed)─────────► Failed
///    └──(deadline elapsed)───────► Expired
/// ```
///
/// Pending is the only status that holds a reservation. Leaving it pairs the
/// status change with exactly one ledger effect: commit for Confirmed,
/// release for Failed and Expired. Cancelling a confirmed order restores
/// nothing; committed stock stays consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Reservation held, awaiting a payment outcome or the deadline.
    #[default]
    Pending,

    /// Payment succeeded; stock committed. Cancellable within the window.
    Confirmed,

    /// Payment failed; reservation released (terminal).
    Failed,

    /// Deadline elapsed before an outcome; reservation released (terminal).
    Expired,

    /// User cancelled after confirmation; refund scheduled (terminal).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if a payment outcome or expiry can still settle the order.
    pub fn can_finalize(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the user can cancel the order in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Confirmed)
    }

    /// Returns true if no transition out of this status exists.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Expired | OrderStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a status name produced by [`OrderStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "confirmed" => Some(OrderStatus::Confirmed),
            "failed" => Some(OrderStatus::Failed),
            "expired" => Some(OrderStatus::Expired),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
