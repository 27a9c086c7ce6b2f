//! Append-only movement ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use botica_core::{MovementId, ProductCatalog, ProductPolicy, StockError, StockKey, StockResult};

use crate::aggregate::StockAggregate;
use crate::balance::StockBalance;
use crate::movement::{BalanceTarget, MovementDraft, MovementRecord, MovementType};

/// Outcome of an append.
///
/// `replayed = true` means the idempotency key had already been committed
/// for this stock key and the prior records are returned unchanged
/// (exactly-once semantics for retried calls).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub records: Vec<MovementRecord>,
    pub replayed: bool,
}

/// Synchronous observer notified after every successful append.
///
/// The engine wires the alert engine through this seam. Observers run
/// inside the per-key critical section so notifications arrive in commit
/// order and the last balance an observer sees is the live one; keep them
/// fast and never append back into the ledger for the same key.
pub trait MovementObserver: Send + Sync {
    fn on_movement(&self, key: &StockKey, records: &[MovementRecord], balance: StockBalance);
}

/// Append-only, immutable log of every stock-affecting event.
///
/// Appends are all-or-nothing per call: every draft in the batch is
/// validated against the projected balance under the per-key lock before
/// any record is written, so a rejected operation leaves zero records
/// behind. Batches exist because some state transitions are two movements
/// that must commit together (consume = `liberacion_reserva` +
/// `salida_venta`).
pub struct MovementLedger {
    catalog: Arc<dyn ProductCatalog>,
    streams: RwLock<HashMap<StockKey, Vec<MovementRecord>>>,
    committed: RwLock<HashMap<(StockKey, String), Vec<MovementRecord>>>,
    locks: Mutex<HashMap<StockKey, Arc<Mutex<()>>>>,
    aggregate: Arc<StockAggregate>,
    observers: RwLock<Vec<Arc<dyn MovementObserver>>>,
}

impl MovementLedger {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self {
            catalog,
            streams: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            aggregate: Arc::new(StockAggregate::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Materialized balances, shared with readers.
    pub fn aggregate(&self) -> Arc<StockAggregate> {
        Arc::clone(&self.aggregate)
    }

    pub fn register_observer(&self, observer: Arc<dyn MovementObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Append a batch of movements for one key.
    ///
    /// A duplicate idempotency key returns the prior records with
    /// `replayed = true`. Validation failures return an error and write
    /// nothing.
    pub fn append(
        &self,
        key: &StockKey,
        drafts: Vec<MovementDraft>,
        idempotency_key: &str,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<AppendReceipt> {
        if drafts.is_empty() {
            return Err(StockError::validation("append requires at least one movement"));
        }
        self.append_with(key, idempotency_key, occurred_at, move |_| Ok(drafts))
    }

    /// Append movements computed from the balance current at commit time.
    ///
    /// The closure runs inside the per-key critical section: the balance it
    /// receives cannot change before its drafts commit, so read-then-correct
    /// flows (inventory count adjustments) are race-free. Returning an empty
    /// batch commits nothing and records no idempotency entry.
    pub fn append_with<F>(
        &self,
        key: &StockKey,
        idempotency_key: &str,
        occurred_at: DateTime<Utc>,
        drafts: F,
    ) -> StockResult<AppendReceipt>
    where
        F: FnOnce(StockBalance) -> StockResult<Vec<MovementDraft>>,
    {
        let policy = self
            .catalog
            .policy(key.product_id)
            .ok_or_else(|| StockError::not_found(format!("product {}", key.product_id)))?;

        let lock = self.key_lock(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| StockError::concurrent("key lock poisoned"))?;

        if let Some(prior) = self.prior_commit(key, idempotency_key)? {
            return Ok(AppendReceipt {
                records: prior,
                replayed: true,
            });
        }

        let start = self.aggregate.get(key);
        let drafts = drafts(start)?;
        if drafts.is_empty() {
            return Ok(AppendReceipt {
                records: Vec::new(),
                replayed: false,
            });
        }
        for draft in &drafts {
            if draft.cantidad <= 0 {
                return Err(StockError::validation("movement quantity must be positive"));
            }
        }
        self.validate_lot(key, &policy, &drafts)?;

        // Project the whole batch before writing anything.
        let mut running = start;
        let mut projected = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let before = running;
            let delta = draft.movement_type.sign() * draft.cantidad;
            let mut oversold = false;
            match draft.movement_type.target() {
                BalanceTarget::Actual => {
                    running.actual += delta;
                    if delta < 0 && (running.actual < 0 || running.disponible() < 0) {
                        if policy.permitir_venta_sin_stock {
                            oversold = true;
                        } else {
                            return Err(StockError::InsufficientStock {
                                key: key.clone(),
                                requested: draft.cantidad,
                                actual: before.actual,
                            });
                        }
                    }
                }
                BalanceTarget::Reservado => {
                    running.reservado += delta;
                    if draft.movement_type == MovementType::Reserva && running.disponible() < 0 {
                        return Err(StockError::InsufficientAvailableStock {
                            key: key.clone(),
                            requested: draft.cantidad,
                            disponible: before.disponible(),
                        });
                    }
                    if running.reservado < 0 {
                        return Err(StockError::validation(
                            "release exceeds currently reserved quantity",
                        ));
                    }
                }
            }
            projected.push((delta, before, running, oversold));
        }

        // Commit.
        let records: Vec<MovementRecord> = drafts
            .into_iter()
            .zip(projected)
            .map(|(draft, (delta, before, after, oversold))| MovementRecord {
                movement_id: MovementId::new(),
                key: key.clone(),
                movement_type: draft.movement_type,
                cantidad: delta,
                balance_before: before,
                balance_after: after,
                reference: draft.reference,
                idempotency_key: idempotency_key.to_string(),
                occurred_at,
                oversold,
            })
            .collect();

        {
            let mut streams = self
                .streams
                .write()
                .map_err(|_| StockError::concurrent("stream lock poisoned"))?;
            streams.entry(key.clone()).or_default().extend(records.iter().cloned());
        }
        {
            let mut committed = self
                .committed
                .write()
                .map_err(|_| StockError::concurrent("idempotency lock poisoned"))?;
            committed.insert((key.clone(), idempotency_key.to_string()), records.clone());
        }
        self.aggregate.set(key, running);

        tracing::debug!(
            key = %key,
            movements = records.len(),
            actual = running.actual,
            reservado = running.reservado,
            "movimientos registrados"
        );
        // Notified under the key lock: notifications reach observers in
        // commit order, so the last balance they see is the live one.
        self.notify(key, &records, running);

        Ok(AppendReceipt {
            records,
            replayed: false,
        })
    }

    /// Like [`append`](Self::append), but a duplicate idempotency key is an
    /// error instead of a replay.
    pub fn append_strict(
        &self,
        key: &StockKey,
        drafts: Vec<MovementDraft>,
        idempotency_key: &str,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<Vec<MovementRecord>> {
        let receipt = self.append(key, drafts, idempotency_key, occurred_at)?;
        if receipt.replayed {
            return Err(StockError::DuplicateMovement {
                idempotency_key: idempotency_key.to_string(),
            });
        }
        Ok(receipt.records)
    }

    /// Fold the full stream for a key to recompute its balance.
    ///
    /// Used for crash recovery and consistency auditing; must equal the
    /// cached aggregate at all times.
    pub fn replay(&self, key: &StockKey) -> StockBalance {
        let mut balance = StockBalance::default();
        if let Ok(streams) = self.streams.read() {
            if let Some(stream) = streams.get(key) {
                for record in stream {
                    match record.movement_type.target() {
                        BalanceTarget::Actual => balance.actual += record.cantidad,
                        BalanceTarget::Reservado => balance.reservado += record.cantidad,
                    }
                }
            }
        }
        balance
    }

    /// Force the cached aggregate back to the replayed value.
    pub fn recompute(&self, key: &StockKey) -> StockResult<StockBalance> {
        let lock = self.key_lock(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| StockError::concurrent("key lock poisoned"))?;
        let balance = self.replay(key);
        self.aggregate.set(key, balance);
        Ok(balance)
    }

    /// Full movement history for a key, in append order.
    pub fn history(&self, key: &StockKey) -> Vec<MovementRecord> {
        match self.streams.read() {
            Ok(streams) => streams.get(key).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn validate_lot(
        &self,
        key: &StockKey,
        policy: &ProductPolicy,
        drafts: &[MovementDraft],
    ) -> StockResult<()> {
        let lot_number = match &key.lot {
            Some(lot) => lot,
            None => {
                if policy.controlado_por_lote {
                    return Err(StockError::validation(format!(
                        "product '{}' is lot-controlled; movements must carry a lot",
                        policy.nombre
                    )));
                }
                return Ok(());
            }
        };

        let lot = self.catalog.lot(key.product_id, lot_number);
        if policy.controlado_por_fecha_vencimiento {
            match &lot {
                Some(lot) if lot.fecha_vencimiento.is_some() => {}
                _ => {
                    return Err(StockError::validation(format!(
                        "product '{}' requires a registered lot with an expiration date",
                        policy.nombre
                    )));
                }
            }
        }
        if let Some(lot) = lot {
            if lot.estado.restricts_outbound() {
                for draft in drafts {
                    if draft.movement_type.is_outbound() && !draft.movement_type.is_write_off() {
                        return Err(StockError::validation(format!(
                            "lot '{}' is not in a sellable condition",
                            lot_number
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn key_lock(&self, key: &StockKey) -> StockResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StockError::concurrent("lock registry poisoned"))?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }

    fn prior_commit(
        &self,
        key: &StockKey,
        idempotency_key: &str,
    ) -> StockResult<Option<Vec<MovementRecord>>> {
        let committed = self
            .committed
            .read()
            .map_err(|_| StockError::concurrent("idempotency lock poisoned"))?;
        Ok(committed
            .get(&(key.clone(), idempotency_key.to_string()))
            .cloned())
    }

    fn notify(&self, key: &StockKey, records: &[MovementRecord], balance: StockBalance) {
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.on_movement(key, records, balance);
            }
        }
    }
}
