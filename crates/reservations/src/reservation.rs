//! Reservation lifecycle and manager.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use botica_core::{DocumentRef, ReservationId, StockError, StockKey, StockResult};
use botica_ledger::{MovementDraft, MovementLedger, MovementRecord, MovementType};

/// Reservation lifecycle: `Activa` is the only non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Activa,
    Consumida,
    Liberada,
    Expirada,
}

impl core::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ReservationState::Activa => "activa",
            ReservationState::Consumida => "consumida",
            ReservationState::Liberada => "liberada",
            ReservationState::Expirada => "expirada",
        };
        f.write_str(s)
    }
}

/// A hold of `cantidad` units against the available stock of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub key: StockKey,
    pub cantidad: i64,
    pub estado: ReservationState,
    pub reference: DocumentRef,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_terminal(&self) -> bool {
        self.estado != ReservationState::Activa
    }
}

/// Creates, consumes and releases reservations against the ledger.
///
/// Lifecycle mutations take the store write lock before entering the
/// ledger; this single nesting order (store, then ledger key lock) holds
/// across the whole engine.
pub struct ReservationManager {
    ledger: Arc<MovementLedger>,
    store: RwLock<HashMap<ReservationId, Reservation>>,
}

impl ReservationManager {
    pub fn new(ledger: Arc<MovementLedger>) -> Self {
        Self {
            ledger,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically check `disponible >= cantidad` and take the hold.
    ///
    /// The check happens inside the ledger's per-key critical section, so
    /// there is no check-then-act gap.
    pub fn reserve(
        &self,
        key: &StockKey,
        cantidad: i64,
        reference: DocumentRef,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StockResult<Reservation> {
        if cantidad <= 0 {
            return Err(StockError::validation("reservation quantity must be positive"));
        }

        let id = ReservationId::new();
        self.ledger.append(
            key,
            vec![MovementDraft::new(
                MovementType::Reserva,
                cantidad,
                reference.clone(),
            )],
            &format!("reserva:{id}"),
            now,
        )?;

        let reservation = Reservation {
            id,
            key: key.clone(),
            cantidad,
            estado: ReservationState::Activa,
            reference,
            created_at: now,
            expires_at: now + ttl,
        };
        let mut store = self.write_store()?;
        store.insert(id, reservation.clone());
        tracing::debug!(reservation = %id, key = %key, cantidad, "reserva creada");
        Ok(reservation)
    }

    /// Consume an active reservation: swap the hold for a real outbound
    /// movement in one atomic batch. Partial consumption is not supported;
    /// callers size reservations to exact intended usage.
    pub fn consume(&self, id: ReservationId, now: DateTime<Utc>) -> StockResult<MovementRecord> {
        let mut store = self.write_store()?;
        let reservation = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("reservation {id}")))?;
        if reservation.estado != ReservationState::Activa {
            return Err(StockError::invalid_transition(
                "reservation",
                reservation.estado.to_string(),
                "consumir",
            ));
        }

        let salida_type = match reservation.reference {
            DocumentRef::Transferencia(_) => MovementType::SalidaTransferencia,
            _ => MovementType::SalidaVenta,
        };
        let receipt = self.ledger.append(
            &reservation.key,
            vec![
                MovementDraft::new(
                    MovementType::LiberacionReserva,
                    reservation.cantidad,
                    reservation.reference.clone(),
                ),
                MovementDraft::new(salida_type, reservation.cantidad, reservation.reference.clone()),
            ],
            &format!("consumo:{id}"),
            now,
        )?;

        reservation.estado = ReservationState::Consumida;
        tracing::debug!(reservation = %id, "reserva consumida");
        // The batch is [liberacion, salida]; return the outbound record.
        Ok(receipt.records[1].clone())
    }

    /// Return the hold to the pool. Idempotent: releasing a terminal
    /// reservation is a no-op, not an error.
    pub fn release(&self, id: ReservationId, now: DateTime<Utc>) -> StockResult<()> {
        self.terminate(id, ReservationState::Liberada, "liberacion", now)
    }

    /// Sweep active reservations past their deadline. Returns the ids that
    /// were expired by this pass. Safe to re-run.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> StockResult<Vec<ReservationId>> {
        let overdue: Vec<ReservationId> = {
            let store = self
                .store
                .read()
                .map_err(|_| StockError::concurrent("reservation store poisoned"))?;
            store
                .values()
                .filter(|r| r.estado == ReservationState::Activa && r.expires_at <= now)
                .map(|r| r.id)
                .collect()
        };

        let mut expired = Vec::with_capacity(overdue.len());
        for id in overdue {
            self.terminate(id, ReservationState::Expirada, "expiracion", now)?;
            expired.push(id);
        }
        Ok(expired)
    }

    pub fn get(&self, id: ReservationId) -> Option<Reservation> {
        match self.store.read() {
            Ok(store) => store.get(&id).cloned(),
            Err(_) => None,
        }
    }

    fn terminate(
        &self,
        id: ReservationId,
        target: ReservationState,
        idem_prefix: &str,
        now: DateTime<Utc>,
    ) -> StockResult<()> {
        let mut store = self.write_store()?;
        let reservation = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("reservation {id}")))?;
        if reservation.is_terminal() {
            return Ok(());
        }

        self.ledger.append(
            &reservation.key,
            vec![MovementDraft::new(
                MovementType::LiberacionReserva,
                reservation.cantidad,
                reservation.reference.clone(),
            )],
            &format!("{idem_prefix}:{id}"),
            now,
        )?;
        reservation.estado = target;
        tracing::debug!(reservation = %id, estado = %target, "reserva terminada");
        Ok(())
    }

    fn write_store(
        &self,
    ) -> StockResult<std::sync::RwLockWriteGuard<'_, HashMap<ReservationId, Reservation>>> {
        self.store
            .write()
            .map_err(|_| StockError::concurrent("reservation store poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botica_core::{InMemoryCatalog, ProductCatalog, ProductId, ProductPolicy, WarehouseId};
    use uuid::Uuid;

    fn setup(initial_stock: i64) -> (Arc<MovementLedger>, ReservationManager, StockKey) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let product_id = ProductId::new();
        catalog.register_product(ProductPolicy::basic(product_id, "Ibuprofeno 400mg"));
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
        let manager = ReservationManager::new(ledger.clone());
        (ledger, manager, key)
    }

    fn sale_ref() -> DocumentRef {
        DocumentRef::Venta(Uuid::nil())
    }

    #[test]
    fn reserve_holds_available_stock() {
        let (ledger, manager, key) = setup(40);
        let reservation = manager
            .reserve(&key, 30, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap();

        assert_eq!(reservation.estado, ReservationState::Activa);
        let balance = ledger.aggregate().get(&key);
        assert_eq!(balance.actual, 40);
        assert_eq!(balance.reservado, 30);
        assert_eq!(balance.disponible(), 10);
    }

    #[test]
    fn reserve_fails_when_disponible_is_short() {
        let (_, manager, key) = setup(10);
        manager
            .reserve(&key, 8, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap();

        let err = manager
            .reserve(&key, 3, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StockError::InsufficientAvailableStock { .. }));
    }

    #[test]
    fn consume_swaps_the_hold_for_an_outbound_movement() {
        let (ledger, manager, key) = setup(20);
        let reservation = manager
            .reserve(&key, 5, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap();

        let record = manager.consume(reservation.id, Utc::now()).unwrap();
        assert_eq!(record.movement_type, MovementType::SalidaVenta);
        assert_eq!(record.cantidad, -5);

        let balance = ledger.aggregate().get(&key);
        assert_eq!(balance.actual, 15);
        assert_eq!(balance.reservado, 0);
        assert_eq!(
            manager.get(reservation.id).unwrap().estado,
            ReservationState::Consumida
        );
    }

    #[test]
    fn consume_is_rejected_on_terminal_reservation() {
        let (_, manager, key) = setup(20);
        let reservation = manager
            .reserve(&key, 5, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap();
        manager.consume(reservation.id, Utc::now()).unwrap();

        let err = manager.consume(reservation.id, Utc::now()).unwrap_err();
        assert!(matches!(err, StockError::InvalidStateTransition { .. }));
    }

    #[test]
    fn release_is_idempotent() {
        let (ledger, manager, key) = setup(20);
        let reservation = manager
            .reserve(&key, 5, sale_ref(), Duration::minutes(15), Utc::now())
            .unwrap();

        manager.release(reservation.id, Utc::now()).unwrap();
        manager.release(reservation.id, Utc::now()).unwrap();

        let balance = ledger.aggregate().get(&key);
        assert_eq!(balance.reservado, 0);
        assert_eq!(
            manager.get(reservation.id).unwrap().estado,
            ReservationState::Liberada
        );
        // Exactly one liberacion in the ledger despite the double release.
        let liberaciones = ledger
            .history(&key)
            .iter()
            .filter(|r| r.movement_type == MovementType::LiberacionReserva)
            .count();
        assert_eq!(liberaciones, 1);
    }

    #[test]
    fn expire_overdue_sweeps_only_past_deadline_holds() {
        let (ledger, manager, key) = setup(20);
        let now = Utc::now();
        let stale = manager
            .reserve(&key, 3, sale_ref(), Duration::minutes(5), now)
            .unwrap();
        let fresh = manager
            .reserve(&key, 4, sale_ref(), Duration::hours(2), now)
            .unwrap();

        let expired = manager.expire_overdue(now + Duration::minutes(30)).unwrap();
        assert_eq!(expired, vec![stale.id]);
        assert_eq!(
            manager.get(stale.id).unwrap().estado,
            ReservationState::Expirada
        );
        assert_eq!(
            manager.get(fresh.id).unwrap().estado,
            ReservationState::Activa
        );
        assert_eq!(ledger.aggregate().get(&key).reservado, 4);

        // Re-running the sweep is a no-op.
        let again = manager.expire_overdue(now + Duration::minutes(30)).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn concurrent_reserves_for_the_last_units_resolve_to_exactly_one_success() {
        let (_, manager, key) = setup(40);
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                manager.reserve(&key, 30, sale_ref(), Duration::minutes(15), Utc::now())
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(StockError::InsufficientAvailableStock { .. })
        )));
    }
}
