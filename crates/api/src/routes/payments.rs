//! Payment outcome intake endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::{PaymentOutcome, PaymentResult};
use engine::Reconciliation;
use serde::{Deserialize, Serialize};
use store::SaleStore;

use super::orders::{AppState, parse_order_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PaymentOutcomeRequest {
    pub order_id: String,
    pub external_payment_id: String,
    pub result: PaymentResult,
}

// -- Response types --

#[derive(Serialize)]
pub struct PaymentOutcomeResponse {
    pub order_id: String,
    pub applied: bool,
    pub status: String,
}

/// POST /payments/outcome — apply a payment outcome to its order.
///
/// Redelivered outcomes return `applied: false` with the order's settled
/// status, so the payment collaborator can retry blindly.
#[tracing::instrument(skip(state, req))]
pub async fn outcome<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PaymentOutcomeRequest>,
) -> Result<Json<PaymentOutcomeResponse>, ApiError> {
    let order_id = parse_order_id(&req.order_id)?;

    let outcome = PaymentOutcome::new(order_id, req.external_payment_id, req.result);
    let response = match state.engine.apply_payment(&outcome).await? {
        Reconciliation::Applied(order) => PaymentOutcomeResponse {
            order_id: order.id.to_string(),
            applied: true,
            status: order.status.to_string(),
        },
        Reconciliation::AlreadyTerminal(status) => PaymentOutcomeResponse {
            order_id: order_id.to_string(),
            applied: false,
            status: status.to_string(),
        },
    };

    Ok(Json(response))
}
