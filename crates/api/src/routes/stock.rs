//! Stock visibility and sale seeding endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::ProductId;
use domain::{InventoryLine, Money, SaleWindow};
use engine::StockReport;
use serde::Deserialize;
use store::SaleStore;

use super::orders::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct SeedStockRequest {
    pub available: u32,
    pub unit_price_cents: i64,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

/// GET /stock/{product_id} — advisory stock report for one product.
#[tracing::instrument(skip(state))]
pub async fn get<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockReport>, ApiError> {
    let product_id = ProductId::new(product_id);
    let report = state
        .engine
        .stock_report(&product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {product_id} not found")))?;

    Ok(Json(report))
}

/// PUT /stock/{product_id} — create a sale line, or reset an existing
/// line's sellable pool, price, and window.
#[tracing::instrument(skip(state, req))]
pub async fn put<S: SaleStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
    Json(req): Json<SeedStockRequest>,
) -> Result<StatusCode, ApiError> {
    if req.unit_price_cents <= 0 {
        return Err(ApiError::BadRequest(
            "unit_price_cents must be positive".to_string(),
        ));
    }
    if let (Some(opens_at), Some(closes_at)) = (req.opens_at, req.closes_at)
        && opens_at >= closes_at
    {
        return Err(ApiError::BadRequest(
            "opens_at must be before closes_at".to_string(),
        ));
    }

    let line = InventoryLine::new(
        product_id,
        req.available,
        Money::from_cents(req.unit_price_cents),
    )
    .with_window(SaleWindow {
        opens_at: req.opens_at,
        closes_at: req.closes_at,
    });
    state.engine.seed_sale(line).await?;

    Ok(StatusCode::NO_CONTENT)
}
