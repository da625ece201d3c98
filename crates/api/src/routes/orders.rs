//! Order placement, lookup, and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId, UserId};
use domain::Order;
use engine::{InMemoryRefundScheduler, PlaceOrder, SaleEngine};
use serde::{Deserialize, Serialize};
use store::SaleStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SaleStore> {
    pub engine: SaleEngine<S, InMemoryRefundScheduler>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub idempotency_key: String,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub user_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderPlacedResponse {
    pub order_id: String,
    pub status: String,
    pub reservation_deadline: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub status: String,
    pub payment_ref: Option<String>,
    pub refund_due: bool,
    pub created_at: String,
    pub reservation_deadline: String,
}

// -- Handlers --

/// POST /orders — place an order, deduplicated by idempotency key.
///
/// A fresh placement returns 201; a replay of an already-bound key returns
/// 200 with the original order.
#[tracing::instrument(skip(state, req))]
pub async fn place<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderPlacedResponse>), ApiError> {
    let user_id = parse_user_id(&req.user_id)?;

    let placement = state
        .engine
        .place_order(PlaceOrder {
            user_id,
            product_id: ProductId::new(req.product_id),
            quantity: req.quantity,
            idempotency_key: req.idempotency_key,
        })
        .await?;

    let status = if placement.is_replay() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let order = placement.order();
    Ok((
        status,
        Json(OrderPlacedResponse {
            order_id: order.id.to_string(),
            status: order.status.to_string(),
            reservation_deadline: order.reservation_deadline.to_rfc3339(),
        }),
    ))
}

/// GET /orders/{id} — fetch one order.
#[tracing::instrument(skip(state))]
pub async fn get<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .engine
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order_response(order)))
}

/// POST /orders/{id}/cancel — cancel a confirmed order within the window.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let user_id = parse_user_id(&req.user_id)?;

    let order = state.engine.cancel_order(order_id, user_id).await?;
    Ok(Json(order_response(order)))
}

pub(crate) fn order_response(order: Order) -> OrderResponse {
    OrderResponse {
        id: order.id.to_string(),
        user_id: order.user_id.to_string(),
        product_id: order.product_id.to_string(),
        quantity: order.quantity,
        unit_price_cents: order.unit_price_snapshot.cents(),
        total_cents: order.total_amount().cents(),
        status: order.status.to_string(),
        payment_ref: order.payment_ref,
        refund_due: order.refund_due,
        created_at: order.created_at.to_rfc3339(),
        reservation_deadline: order.reservation_deadline.to_rfc3339(),
    }
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID format: {e}")))?;
    Ok(OrderId::from(uuid))
}

pub(crate) fn parse_user_id(id: &str) -> Result<UserId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?;
    Ok(UserId::from(uuid))
}
