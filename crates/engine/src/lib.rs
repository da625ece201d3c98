//! Flash-sale order placement engine.
//!
//! This crate orchestrates the order lifecycle over a
//! [`store::SaleStore`]:
//! 1. Admit the idempotency key, replaying duplicates
//! 2. Reserve stock and create the PENDING order in one transaction
//! 3. Settle the order from a payment outcome, or expire it
//! 4. Cancel confirmed orders and schedule refunds
//!
//! A background [`Sweeper`] expires overdue reservations and prunes aged
//! idempotency records.

pub mod config;
pub mod engine;
pub mod error;
pub mod services;
pub mod stock;
pub mod sweeper;

pub use config::{MIN_KEY_RETENTION_HOURS, SaleConfig};
pub use engine::{PlaceOrder, Placement, Reconciliation, SaleEngine};
pub use error::{CancelError, PlaceOrderError, ReconcileError};
pub use services::{InMemoryRefundScheduler, RefundError, RefundScheduler};
pub use stock::StockReport;
pub use sweeper::Sweeper;
