//! Advisory stock report for the read path.

use common::ProductId;
use domain::{InventoryLine, StockLevel};
use serde::Serialize;

/// Point-in-time view of one product's stock, safe to serve without locks.
///
/// The report is advisory: by the time a client acts on it the pools may
/// have moved. Placement re-checks availability under the row lock.
#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub status: StockLevel,
}

impl StockReport {
    /// Builds a report from a ledger line snapshot.
    pub fn from_line(line: &InventoryLine, low_stock_threshold: u32) -> Self {
        Self {
            product_id: line.product_id.clone(),
            available: line.available,
            reserved: line.reserved,
            status: line.stock_level(low_stock_threshold),
        }
    }
}
