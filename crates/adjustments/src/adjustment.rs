//! Adjustment lifecycle and processor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use botica_core::{AdjustmentId, DocumentRef, StockError, StockKey, StockResult};
use botica_ledger::{MovementDraft, MovementLedger, MovementRecord, MovementType};

/// Adjustment lifecycle. Serialized values are the exact strings external
/// reports depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentState {
    Pendiente,
    Aprobado,
    Rechazado,
    Ejecutado,
    Cancelado,
}

impl core::fmt::Display for AdjustmentState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AdjustmentState::Pendiente => "pendiente",
            AdjustmentState::Aprobado => "aprobado",
            AdjustmentState::Rechazado => "rechazado",
            AdjustmentState::Ejecutado => "ejecutado",
            AdjustmentState::Cancelado => "cancelado",
        };
        f.write_str(s)
    }
}

/// A physical-count adjustment for one stock key.
///
/// `diff = cantidad_fisica - cantidad_sistema`; the system quantity is
/// snapshotted at submission and re-read at execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub key: StockKey,
    pub cantidad_sistema: i64,
    pub cantidad_fisica: i64,
    pub diff: i64,
    pub estado: AdjustmentState,
    pub motivo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Submit/approve/execute workflow over count adjustments.
pub struct AdjustmentProcessor {
    ledger: Arc<MovementLedger>,
    store: RwLock<HashMap<AdjustmentId, Adjustment>>,
}

impl AdjustmentProcessor {
    pub fn new(ledger: Arc<MovementLedger>) -> Self {
        Self {
            ledger,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Record a physical count against the current system balance.
    pub fn submit(
        &self,
        key: &StockKey,
        cantidad_fisica: i64,
        now: DateTime<Utc>,
    ) -> StockResult<Adjustment> {
        if cantidad_fisica < 0 {
            return Err(StockError::validation("counted quantity cannot be negative"));
        }

        let cantidad_sistema = self.ledger.aggregate().get(key).actual;
        let adjustment = Adjustment {
            id: AdjustmentId::new(),
            key: key.clone(),
            cantidad_sistema,
            cantidad_fisica,
            diff: cantidad_fisica - cantidad_sistema,
            estado: AdjustmentState::Pendiente,
            motivo: None,
            created_at: now,
            executed_at: None,
        };
        let mut store = self.write_store()?;
        store.insert(adjustment.id, adjustment.clone());
        tracing::debug!(adjustment = %adjustment.id, diff = adjustment.diff, "ajuste registrado");
        Ok(adjustment)
    }

    /// Pure state transition; the ledger is untouched until execution.
    pub fn approve(&self, id: AdjustmentId) -> StockResult<Adjustment> {
        self.transition(id, AdjustmentState::Aprobado, "aprobar", None)
    }

    /// Pure state transition; records the rejection reason.
    pub fn reject(&self, id: AdjustmentId, reason: impl Into<String>) -> StockResult<Adjustment> {
        self.transition(id, AdjustmentState::Rechazado, "rechazar", Some(reason.into()))
    }

    /// Cancel from any pre-executed state. Idempotent on `Cancelado`.
    pub fn cancel(&self, id: AdjustmentId) -> StockResult<Adjustment> {
        let mut store = self.write_store()?;
        let adjustment = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("adjustment {id}")))?;
        match adjustment.estado {
            AdjustmentState::Cancelado => {}
            AdjustmentState::Ejecutado => {
                return Err(StockError::invalid_transition(
                    "adjustment",
                    adjustment.estado.to_string(),
                    "cancelar",
                ));
            }
            _ => adjustment.estado = AdjustmentState::Cancelado,
        }
        Ok(adjustment.clone())
    }

    /// Apply an approved adjustment to the ledger.
    ///
    /// The diff is re-derived inside the ledger's per-key critical section,
    /// so no movement can land between the balance read and the correction:
    /// the correction always targets the counted quantity, never a stale
    /// diff. A diff that drifted to zero executes without a movement.
    /// Re-executing an already executed adjustment is a no-op.
    pub fn execute(
        &self,
        id: AdjustmentId,
        now: DateTime<Utc>,
    ) -> StockResult<Option<MovementRecord>> {
        let mut store = self.write_store()?;
        let adjustment = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("adjustment {id}")))?;

        match adjustment.estado {
            AdjustmentState::Ejecutado => return Ok(None),
            AdjustmentState::Aprobado => {}
            state => {
                return Err(StockError::invalid_transition(
                    "adjustment",
                    state.to_string(),
                    "ejecutar",
                ));
            }
        }

        let cantidad_fisica = adjustment.cantidad_fisica;
        let mut live = adjustment.cantidad_sistema;
        let receipt = self.ledger.append_with(
            &adjustment.key,
            &format!("ajuste:{id}"),
            now,
            |balance| {
                live = balance.actual;
                let diff = cantidad_fisica - balance.actual;
                if diff == 0 {
                    return Ok(Vec::new());
                }
                let movement_type = if diff > 0 {
                    MovementType::EntradaAjuste
                } else {
                    MovementType::SalidaAjuste
                };
                Ok(vec![MovementDraft::new(
                    movement_type,
                    diff.abs(),
                    DocumentRef::Ajuste(id),
                )])
            },
        )?;
        if receipt.replayed {
            return Err(StockError::DuplicateMovement {
                idempotency_key: format!("ajuste:{id}"),
            });
        }

        adjustment.cantidad_sistema = live;
        adjustment.diff = cantidad_fisica - live;
        adjustment.estado = AdjustmentState::Ejecutado;
        adjustment.executed_at = Some(now);
        tracing::info!(adjustment = %id, diff = adjustment.diff, "ajuste ejecutado");
        Ok(receipt.records.into_iter().next())
    }

    pub fn get(&self, id: AdjustmentId) -> Option<Adjustment> {
        match self.store.read() {
            Ok(store) => store.get(&id).cloned(),
            Err(_) => None,
        }
    }

    fn transition(
        &self,
        id: AdjustmentId,
        target: AdjustmentState,
        attempted: &'static str,
        motivo: Option<String>,
    ) -> StockResult<Adjustment> {
        let mut store = self.write_store()?;
        let adjustment = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("adjustment {id}")))?;
        if adjustment.estado != AdjustmentState::Pendiente {
            return Err(StockError::invalid_transition(
                "adjustment",
                adjustment.estado.to_string(),
                attempted,
            ));
        }
        adjustment.estado = target;
        if motivo.is_some() {
            adjustment.motivo = motivo;
        }
        Ok(adjustment.clone())
    }

    fn write_store(
        &self,
    ) -> StockResult<std::sync::RwLockWriteGuard<'_, HashMap<AdjustmentId, Adjustment>>> {
        self.store
            .write()
            .map_err(|_| StockError::concurrent("adjustment store poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botica_core::{InMemoryCatalog, ProductCatalog, ProductId, ProductPolicy, WarehouseId};
    use uuid::Uuid;

    fn setup(initial_stock: i64) -> (Arc<MovementLedger>, AdjustmentProcessor, StockKey) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let product_id = ProductId::new();
        catalog.register_product(ProductPolicy::basic(product_id, "Alcohol 70%"));
        let ledger = Arc::new(MovementLedger::new(catalog as Arc<dyn ProductCatalog>));
        let key = StockKey::new(product_id, WarehouseId::new());
        if initial_stock > 0 {
            ledger
                .append(
                    &key,
                    vec![MovementDraft::new(
                        MovementType::EntradaCompra,
                        initial_stock,
                        DocumentRef::Compra(Uuid::nil()),
                    )],
                    "seed",
                    Utc::now(),
                )
                .unwrap();
        }
        (ledger.clone(), AdjustmentProcessor::new(ledger), key)
    }

    #[test]
    fn negative_count_adjustment_removes_exactly_the_diff() {
        let (ledger, processor, key) = setup(20);
        let adjustment = processor.submit(&key, 15, Utc::now()).unwrap();
        assert_eq!(adjustment.cantidad_sistema, 20);
        assert_eq!(adjustment.diff, -5);

        processor.approve(adjustment.id).unwrap();
        let record = processor.execute(adjustment.id, Utc::now()).unwrap().unwrap();

        assert_eq!(record.movement_type, MovementType::SalidaAjuste);
        assert_eq!(record.cantidad, -5);
        assert_eq!(ledger.aggregate().get(&key).actual, 15);

        let ajustes = ledger
            .history(&key)
            .iter()
            .filter(|r| r.movement_type == MovementType::SalidaAjuste)
            .count();
        assert_eq!(ajustes, 1);
    }

    #[test]
    fn positive_count_adjustment_adds_stock() {
        let (ledger, processor, key) = setup(8);
        let adjustment = processor.submit(&key, 12, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();
        let record = processor.execute(adjustment.id, Utc::now()).unwrap().unwrap();

        assert_eq!(record.movement_type, MovementType::EntradaAjuste);
        assert_eq!(ledger.aggregate().get(&key).actual, 12);
    }

    #[test]
    fn execute_recomputes_diff_against_the_live_balance() {
        let (ledger, processor, key) = setup(20);
        let adjustment = processor.submit(&key, 15, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();

        // Stock moved between submission and execution.
        ledger
            .append(
                &key,
                vec![MovementDraft::new(
                    MovementType::SalidaVenta,
                    3,
                    DocumentRef::Venta(Uuid::nil()),
                )],
                "venta-1",
                Utc::now(),
            )
            .unwrap();

        processor.execute(adjustment.id, Utc::now()).unwrap();
        // Correction targets the counted quantity, not the stale diff.
        assert_eq!(ledger.aggregate().get(&key).actual, 15);
        assert_eq!(processor.get(adjustment.id).unwrap().diff, -2);
    }

    #[test]
    fn concurrent_sale_during_execute_never_double_corrects() {
        let (ledger, processor, key) = setup(20);
        let adjustment = processor.submit(&key, 15, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();

        let seller = {
            let ledger = Arc::clone(&ledger);
            let key = key.clone();
            std::thread::spawn(move || {
                ledger
                    .append(
                        &key,
                        vec![MovementDraft::new(
                            MovementType::SalidaVenta,
                            3,
                            DocumentRef::Venta(Uuid::nil()),
                        )],
                        "venta-1",
                        Utc::now(),
                    )
                    .unwrap();
            })
        };
        processor.execute(adjustment.id, Utc::now()).unwrap();
        seller.join().unwrap();

        // Whichever side won the key lock, the correction hit the counted
        // quantity exactly once: 15 if the sale committed first, 12 if the
        // sale landed after the correction. Never a double correction.
        let balance = ledger.aggregate().get(&key);
        assert!(balance.actual == 15 || balance.actual == 12);
        assert_eq!(ledger.replay(&key), balance);

        let stored = processor.get(adjustment.id).unwrap();
        assert_eq!(stored.cantidad_fisica - stored.cantidad_sistema, stored.diff);
        let correcciones = ledger
            .history(&key)
            .iter()
            .filter(|r| r.movement_type == MovementType::SalidaAjuste)
            .count();
        assert_eq!(correcciones, 1);
    }

    #[test]
    fn diff_drifted_to_zero_executes_without_a_movement() {
        let (ledger, processor, key) = setup(20);
        let adjustment = processor.submit(&key, 17, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();
        ledger
            .append(
                &key,
                vec![MovementDraft::new(
                    MovementType::SalidaVenta,
                    3,
                    DocumentRef::Venta(Uuid::nil()),
                )],
                "venta-1",
                Utc::now(),
            )
            .unwrap();

        let record = processor.execute(adjustment.id, Utc::now()).unwrap();
        assert!(record.is_none());
        assert_eq!(
            processor.get(adjustment.id).unwrap().estado,
            AdjustmentState::Ejecutado
        );
        assert_eq!(ledger.aggregate().get(&key).actual, 17);
    }

    #[test]
    fn execute_requires_approval_first() {
        let (_, processor, key) = setup(10);
        let adjustment = processor.submit(&key, 9, Utc::now()).unwrap();

        let err = processor.execute(adjustment.id, Utc::now()).unwrap_err();
        assert!(matches!(err, StockError::InvalidStateTransition { .. }));
    }

    #[test]
    fn re_executing_is_a_no_op() {
        let (ledger, processor, key) = setup(10);
        let adjustment = processor.submit(&key, 7, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();
        processor.execute(adjustment.id, Utc::now()).unwrap();

        let again = processor.execute(adjustment.id, Utc::now()).unwrap();
        assert!(again.is_none());
        assert_eq!(ledger.aggregate().get(&key).actual, 7);
    }

    #[test]
    fn rejected_adjustment_never_touches_the_ledger() {
        let (ledger, processor, key) = setup(10);
        let adjustment = processor.submit(&key, 4, Utc::now()).unwrap();
        let rejected = processor.reject(adjustment.id, "conteo mal hecho").unwrap();

        assert_eq!(rejected.estado, AdjustmentState::Rechazado);
        assert_eq!(rejected.motivo.as_deref(), Some("conteo mal hecho"));
        assert_eq!(ledger.aggregate().get(&key).actual, 10);

        let err = processor.execute(adjustment.id, Utc::now()).unwrap_err();
        assert!(matches!(err, StockError::InvalidStateTransition { .. }));
    }

    #[test]
    fn cancel_is_legal_pre_execution_and_idempotent() {
        let (_, processor, key) = setup(10);
        let adjustment = processor.submit(&key, 4, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();

        let cancelled = processor.cancel(adjustment.id).unwrap();
        assert_eq!(cancelled.estado, AdjustmentState::Cancelado);
        processor.cancel(adjustment.id).unwrap();

        let err = processor.execute(adjustment.id, Utc::now()).unwrap_err();
        assert!(matches!(err, StockError::InvalidStateTransition { .. }));
    }

    #[test]
    fn cancel_after_execution_is_rejected() {
        let (_, processor, key) = setup(10);
        let adjustment = processor.submit(&key, 9, Utc::now()).unwrap();
        processor.approve(adjustment.id).unwrap();
        processor.execute(adjustment.id, Utc::now()).unwrap();

        let err = processor.cancel(adjustment.id).unwrap_err();
        assert!(matches!(err, StockError::InvalidStateTransition { .. }));
    }
}
