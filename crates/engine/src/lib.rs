//! `botica-engine` — the stock engine facade.
//!
//! Wires the catalog, ledger, reservation manager, transfer coordinator,
//! adjustment processor and alert engine into the single surface external
//! collaborators (sales, purchasing, clinical, reporting) call.

pub mod engine;

pub use engine::{EngineConfig, StockEngine};

pub use botica_adjustments::{Adjustment, AdjustmentState};
pub use botica_alerts::{Alert, AlertConfig, AlertFilter, AlertState, AlertType};
pub use botica_core::{
    AdjustmentId, AlertId, DocumentRef, Lot, LotNumber, MovementId, ProductId, ProductPolicy,
    ReservationId, StockCondition, StockError, StockKey, StockResult, TransferId, WarehouseId,
};
pub use botica_ledger::{AppendReceipt, MovementRecord, MovementType, StockBalance};
pub use botica_reservations::{Reservation, ReservationState};
pub use botica_transfers::{
    Transfer, TransferLine, TransferLineRequest, TransferReceiptLine, TransferState,
};
