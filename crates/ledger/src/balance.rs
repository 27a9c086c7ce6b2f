//! Stock balance snapshot.

use serde::{Deserialize, Serialize};

/// Materialized balance for one (product, warehouse, lot) key.
///
/// `disponible` is always derived from `actual - reservado`, never stored,
/// which eliminates drift between the three figures.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    /// Owned quantity.
    pub actual: i64,
    /// Quantity held by active reservations.
    pub reservado: i64,
}

impl StockBalance {
    pub fn new(actual: i64, reservado: i64) -> Self {
        Self { actual, reservado }
    }

    /// Quantity safely offerable for new reservations.
    pub fn disponible(&self) -> i64 {
        self.actual - self.reservado
    }
}
