//! Persistence layer for the flash-sale engine: one trait, two backends.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{DEFAULT_LOCK_WAIT, MemoryStore};
pub use postgres::PostgresStore;
pub use store::{
    CancelOutcome, FinalizeOutcome, KeyAdmission, OrderDraft, PlacementOutcome, SaleStore,
    SaleStoreExt, lock_plan,
};
