//! Payment outcomes consumed from the payment collaborator.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

/// Final result reported by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentResult {
    Succeeded,
    Failed,
}

/// An inbound payment outcome.
///
/// The engine consumes these; it owns no payment-provider state. Outcomes
/// may be redelivered, so applying one is idempotent at the order's status
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    /// The order the payment was taken for.
    pub order_id: OrderId,

    /// The collaborator's payment reference.
    pub external_payment_id: String,

    /// Whether the payment went through.
    pub result: PaymentResult,

    /// When the outcome reached this engine.
    pub received_at: DateTime<Utc>,
}

impl PaymentOutcome {
    /// Creates an outcome received now.
    pub fn new(
        order_id: OrderId,
        external_payment_id: impl Into<String>,
        result: PaymentResult,
    ) -> Self {
        Self {
            order_id,
            external_payment_id: external_payment_id.into(),
            result,
            received_at: Utc::now(),
        }
    }
}
