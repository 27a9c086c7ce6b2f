//! Stock keys and reference documents.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{AdjustmentId, ProductId, TransferId, WarehouseId};

/// Lot number of a manufactured batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotNumber(String);

impl LotNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LotNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LotNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The unit of stock identity and of locking: (product, warehouse, lot?).
///
/// Lot-controlled products carry `Some(lot)`; everything else keys on
/// (product, warehouse) alone. A balance exists per key from its first
/// movement onward — zero balance is a valid state, not absence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub lot: Option<LotNumber>,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
            lot: None,
        }
    }

    pub fn with_lot(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        lot: impl Into<LotNumber>,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            lot: Some(lot.into()),
        }
    }

    /// Same product/lot re-keyed to another warehouse (transfer destination).
    pub fn in_warehouse(&self, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id: self.product_id,
            warehouse_id,
            lot: self.lot.clone(),
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.lot {
            Some(lot) => write!(f, "{}@{}#{}", self.product_id, self.warehouse_id, lot),
            None => write!(f, "{}@{}", self.product_id, self.warehouse_id),
        }
    }
}

/// Reference document a movement or reservation traces back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "id", rename_all = "snake_case")]
pub enum DocumentRef {
    /// Sale (cart confirmation / checkout).
    Venta(Uuid),
    /// Purchase receipt.
    Compra(Uuid),
    /// Customer or supplier return.
    Devolucion(Uuid),
    /// Inter-warehouse transfer.
    Transferencia(TransferId),
    /// Physical-count adjustment.
    Ajuste(AdjustmentId),
    /// Clinical/nursing procedure dispensation.
    Procedimiento(Uuid),
    /// Internal system action (sweeps, write-offs without a document).
    Sistema,
}
