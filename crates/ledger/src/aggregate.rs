//! Materialized per-key balances.

use std::collections::HashMap;
use std::sync::RwLock;

use botica_core::StockKey;

use crate::balance::StockBalance;

/// Materialized cache of balances keyed by (product, warehouse, lot).
///
/// Mutated only by [`crate::MovementLedger`] under its per-key critical
/// section. Reads may be stale by at most one in-flight mutation. Disposable:
/// any entry can be rebuilt from the ledger via replay.
#[derive(Debug, Default)]
pub struct StockAggregate {
    balances: RwLock<HashMap<StockKey, StockBalance>>,
}

impl StockAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only snapshot; missing keys read as zero balance.
    pub fn get(&self, key: &StockKey) -> StockBalance {
        match self.balances.read() {
            Ok(balances) => balances.get(key).copied().unwrap_or_default(),
            Err(_) => StockBalance::default(),
        }
    }

    pub(crate) fn set(&self, key: &StockKey, balance: StockBalance) {
        if let Ok(mut balances) = self.balances.write() {
            balances.insert(key.clone(), balance);
        }
    }
}
