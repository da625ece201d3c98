//! Inventory ledger line and its reservation arithmetic.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

/// Errors from inventory ledger mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Not enough sellable stock to cover the requested quantity.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A release or commit exceeded the outstanding reservation.
    ///
    /// This cannot happen while every order leaving PENDING carries exactly
    /// one paired ledger effect; seeing it means that pairing was violated.
    #[error(
        "reservation underflow for {product_id}: requested {requested}, reserved {reserved}"
    )]
    ReservationUnderflow {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },
}

/// The time window during which a sale line accepts reservations.
///
/// An absent bound leaves the window open on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaleWindow {
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

impl SaleWindow {
    /// A window with no bounds, open at all times.
    pub fn always_open() -> Self {
        Self::default()
    }

    /// A window bounded on both sides.
    pub fn between(opens_at: DateTime<Utc>, closes_at: DateTime<Utc>) -> Self {
        Self {
            opens_at: Some(opens_at),
            closes_at: Some(closes_at),
        }
    }

    /// Returns true if `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(opens_at) = self.opens_at
            && now < opens_at
        {
            return false;
        }
        if let Some(closes_at) = self.closes_at
            && now >= closes_at
        {
            return false;
        }
        true
    }
}

/// Coarse stock bucket for the advisory read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    InStock,
    LowStock,
    SoldOut,
}

impl StockLevel {
    /// Returns the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StockLevel::InStock => "in_stock",
            StockLevel::LowStock => "low_stock",
            StockLevel::SoldOut => "sold_out",
        }
    }
}

impl std::fmt::Display for StockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One product's sellable stock.
///
/// Every unit is in exactly one of three pools: `available` (sellable),
/// `reserved` (held by a PENDING order), or `committed` (permanently
/// consumed by a CONFIRMED order). Mutations move units between pools and
/// never create or destroy them, so `available + reserved + committed`
/// stays equal to the seeded stock.
///
/// Mutated only inside a store transaction holding this line's row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    /// Product this line sells.
    pub product_id: ProductId,

    /// Units available for new reservations.
    pub available: u32,

    /// Units held by PENDING orders.
    pub reserved: u32,

    /// Units permanently consumed by CONFIRMED orders.
    pub committed: u32,

    /// Bumps on every mutation; advisory reads use it to detect staleness.
    pub version: u64,

    /// Sale price, frozen into each order at reservation time.
    pub unit_price: Money,

    /// Window during which reservations are accepted.
    pub window: SaleWindow,
}

impl InventoryLine {
    /// Creates a new line with the full stock available and no sale window.
    pub fn new(product_id: impl Into<ProductId>, initial_stock: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            available: initial_stock,
            reserved: 0,
            committed: 0,
            version: 0,
            unit_price,
            window: SaleWindow::always_open(),
        }
    }

    /// Sets the sale window.
    pub fn with_window(mut self, window: SaleWindow) -> Self {
        self.window = window;
        self
    }

    /// Total units across all three pools. Constant between seedings.
    pub fn total(&self) -> u32 {
        self.available + self.reserved + self.committed
    }

    /// Returns true if the sale window accepts reservations at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.window.contains(now)
    }

    /// Moves `quantity` units from `available` to `reserved`.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.available < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id.clone(),
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        self.version += 1;
        Ok(())
    }

    /// Moves `quantity` units from `reserved` back to `available`.
    pub fn release(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.reserved < quantity {
            return Err(InventoryError::ReservationUnderflow {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.available += quantity;
        self.version += 1;
        Ok(())
    }

    /// Moves `quantity` units from `reserved` to `committed`.
    ///
    /// Committed units are never restored.
    pub fn commit(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.reserved < quantity {
            return Err(InventoryError::ReservationUnderflow {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.committed += quantity;
        self.version += 1;
        Ok(())
    }

    /// Buckets `available` for the advisory read path.
    ///
    /// `low_threshold` is the largest `available` still reported as low.
    pub fn stock_level(&self, low_threshold: u32) -> StockLevel {
        if self.available == 0 {
            StockLevel::SoldOut
        } else if self.available <= low_threshold {
            StockLevel::LowStock
        } else {
            StockLevel::InStock
        }
    }
}
