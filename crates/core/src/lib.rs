//! `botica-core` — domain foundation for the stock engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, stock keys, the product catalog seam and the
//! error taxonomy shared by every component.

pub mod catalog;
pub mod error;
pub mod id;
pub mod key;

pub use catalog::{InMemoryCatalog, Lot, ProductCatalog, ProductPolicy, StockCondition};
pub use error::{StockError, StockResult};
pub use id::{AdjustmentId, AlertId, MovementId, ProductId, ReservationId, TransferId, WarehouseId};
pub use key::{DocumentRef, LotNumber, StockKey};
