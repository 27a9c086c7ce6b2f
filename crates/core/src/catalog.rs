//! Product policies, lots and the catalog seam.
//!
//! Products and warehouses are owned externally; the engine only needs the
//! stock-control policy of a product (lot control, thresholds, oversell
//! override) and the metadata of its lots. `ProductCatalog` is the trait
//! seam external collaborators implement; `InMemoryCatalog` is the
//! in-process implementation used by the engine and by tests.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::ProductId;
use crate::key::LotNumber;

/// Condition of the stock held under a (product, warehouse, lot) key.
///
/// Serialized values are the exact strings external reports depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockCondition {
    Disponible,
    Reservado,
    EnTransito,
    EnCuarentena,
    Defectuoso,
    Vencido,
}

impl StockCondition {
    /// Quarantined, defective and expired stock may only leave as a
    /// shrinkage or expiry write-off.
    pub fn restricts_outbound(self) -> bool {
        matches!(
            self,
            StockCondition::EnCuarentena | StockCondition::Defectuoso | StockCondition::Vencido
        )
    }
}

/// Stock-control policy of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPolicy {
    pub product_id: ProductId,
    pub nombre: String,
    /// Movements must carry a lot when set.
    pub controlado_por_lote: bool,
    /// Lots must carry an expiration date when set.
    pub controlado_por_fecha_vencimiento: bool,
    /// Allows `actual` to go negative on sale; such movements are flagged.
    pub permitir_venta_sin_stock: bool,
    /// Low-stock threshold; 0 disables the alert.
    pub stock_minimo: i64,
    /// Critical-stock threshold; 0 disables the alert.
    pub stock_critico: i64,
    /// Excess-stock threshold; absent disables the alert.
    pub stock_maximo: Option<i64>,
}

impl ProductPolicy {
    /// A plain, untracked product: no lot control, no thresholds.
    pub fn basic(product_id: ProductId, nombre: impl Into<String>) -> Self {
        Self {
            product_id,
            nombre: nombre.into(),
            controlado_por_lote: false,
            controlado_por_fecha_vencimiento: false,
            permitir_venta_sin_stock: false,
            stock_minimo: 0,
            stock_critico: 0,
            stock_maximo: None,
        }
    }

    pub fn with_lot_control(mut self, expiration_controlled: bool) -> Self {
        self.controlado_por_lote = true;
        self.controlado_por_fecha_vencimiento = expiration_controlled;
        self
    }

    pub fn with_thresholds(mut self, minimo: i64, critico: i64, maximo: Option<i64>) -> Self {
        self.stock_minimo = minimo;
        self.stock_critico = critico;
        self.stock_maximo = maximo;
        self
    }

    pub fn allow_oversell(mut self) -> Self {
        self.permitir_venta_sin_stock = true;
        self
    }
}

/// A manufactured batch of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub product_id: ProductId,
    pub lote: LotNumber,
    pub fecha_fabricacion: Option<NaiveDate>,
    pub fecha_vencimiento: Option<NaiveDate>,
    pub estado: StockCondition,
}

impl Lot {
    pub fn new(product_id: ProductId, lote: impl Into<LotNumber>) -> Self {
        Self {
            product_id,
            lote: lote.into(),
            fecha_fabricacion: None,
            fecha_vencimiento: None,
            estado: StockCondition::Disponible,
        }
    }

    pub fn expiring(mut self, fecha_vencimiento: NaiveDate) -> Self {
        self.fecha_vencimiento = Some(fecha_vencimiento);
        self
    }
}

/// Read seam over product reference data.
///
/// Implementations must be safe for concurrent readers; the engine consults
/// the catalog inside ledger critical sections.
pub trait ProductCatalog: Send + Sync {
    fn policy(&self, product_id: ProductId) -> Option<ProductPolicy>;

    fn lot(&self, product_id: ProductId, lote: &LotNumber) -> Option<Lot>;
}

/// In-process catalog backed by `RwLock`ed maps.
///
/// There is deliberately no removal: ledger history references products by
/// id, so a registered product can only be superseded, never deleted.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductPolicy>>,
    lots: RwLock<HashMap<(ProductId, LotNumber), Lot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_product(&self, policy: ProductPolicy) {
        if let Ok(mut products) = self.products.write() {
            products.insert(policy.product_id, policy);
        }
    }

    pub fn register_lot(&self, lot: Lot) {
        if let Ok(mut lots) = self.lots.write() {
            lots.insert((lot.product_id, lot.lote.clone()), lot);
        }
    }

    /// Re-classify a lot (quarantine, mark defective, mark expired).
    pub fn set_lot_condition(
        &self,
        product_id: ProductId,
        lote: &LotNumber,
        estado: StockCondition,
    ) -> bool {
        match self.lots.write() {
            Ok(mut lots) => match lots.get_mut(&(product_id, lote.clone())) {
                Some(lot) => {
                    lot.estado = estado;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn policy(&self, product_id: ProductId) -> Option<ProductPolicy> {
        match self.products.read() {
            Ok(products) => products.get(&product_id).cloned(),
            Err(_) => None,
        }
    }

    fn lot(&self, product_id: ProductId, lote: &LotNumber) -> Option<Lot> {
        match self.lots.read() {
            Ok(lots) => lots.get(&(product_id, lote.clone())).cloned(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_condition_serializes_to_exact_strings() {
        let cases = [
            (StockCondition::Disponible, "disponible"),
            (StockCondition::Reservado, "reservado"),
            (StockCondition::EnTransito, "en_transito"),
            (StockCondition::EnCuarentena, "en_cuarentena"),
            (StockCondition::Defectuoso, "defectuoso"),
            (StockCondition::Vencido, "vencido"),
        ];
        for (condition, expected) in cases {
            assert_eq!(
                serde_json::to_value(condition).unwrap(),
                serde_json::Value::String(expected.to_string())
            );
        }
    }

    #[test]
    fn quarantined_and_expired_lots_restrict_outbound() {
        assert!(StockCondition::EnCuarentena.restricts_outbound());
        assert!(StockCondition::Vencido.restricts_outbound());
        assert!(!StockCondition::Disponible.restricts_outbound());
    }

    #[test]
    fn catalog_registers_and_reads_products_and_lots() {
        let catalog = InMemoryCatalog::new();
        let product_id = ProductId::new();
        catalog.register_product(
            ProductPolicy::basic(product_id, "Amoxicilina 500mg").with_lot_control(true),
        );
        catalog.register_lot(
            Lot::new(product_id, "L-2026-01")
                .expiring(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()),
        );

        let policy = catalog.policy(product_id).unwrap();
        assert!(policy.controlado_por_lote);

        let lot = catalog.lot(product_id, &LotNumber::new("L-2026-01")).unwrap();
        assert_eq!(lot.estado, StockCondition::Disponible);

        assert!(catalog.set_lot_condition(
            product_id,
            &LotNumber::new("L-2026-01"),
            StockCondition::EnCuarentena
        ));
        let lot = catalog.lot(product_id, &LotNumber::new("L-2026-01")).unwrap();
        assert_eq!(lot.estado, StockCondition::EnCuarentena);
    }
}
