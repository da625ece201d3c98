//! Domain layer for the flash-sale engine.
//!
//! This crate provides the pure domain model, free of I/O:
//! - Inventory ledger lines with reserve/release/commit arithmetic
//! - Order record and its status machine, with transitions that yield the
//!   paired ledger effect
//! - Idempotency records and request fingerprints
//! - Payment outcomes consumed from the payment collaborator

pub mod idempotency;
pub mod inventory;
pub mod money;
pub mod order;
pub mod payment;

pub use idempotency::{IdempotencyRecord, RequestFingerprint};
pub use inventory::{InventoryError, InventoryLine, SaleWindow, StockLevel};
pub use money::Money;
pub use order::{FinalizeDecision, LedgerEffect, Order, OrderError, OrderStatus};
pub use payment::{PaymentOutcome, PaymentResult};
