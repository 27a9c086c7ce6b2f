//! Stock engine facade and alert wiring.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use botica_adjustments::{Adjustment, AdjustmentProcessor};
use botica_alerts::{Alert, AlertConfig, AlertEngine, AlertFilter};
use botica_core::{
    AdjustmentId, AlertId, DocumentRef, InMemoryCatalog, Lot, LotNumber, ProductCatalog,
    ProductId, ProductPolicy, ReservationId, StockCondition, StockError, StockKey, StockResult,
    TransferId, WarehouseId,
};
use botica_ledger::{
    AppendReceipt, MovementDraft, MovementLedger, MovementObserver, MovementRecord, MovementType,
    StockBalance,
};
use botica_reservations::{Reservation, ReservationManager};
use botica_transfers::{Transfer, TransferCoordinator, TransferLineRequest, TransferReceiptLine};

/// Engine-level knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default reservation time-to-live, in seconds.
    pub reservation_ttl_secs: i64,
    /// Bounded internal retries on concurrent-modification races.
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 900,
            max_retries: 3,
        }
    }
}

/// Feeds ledger updates into the alert engine.
///
/// Registered as a movement observer so every committed append (including
/// reservation holds) re-evaluates the alert set for the touched key.
struct AlertBridge {
    catalog: Arc<InMemoryCatalog>,
    alerts: Arc<AlertEngine>,
}

impl MovementObserver for AlertBridge {
    fn on_movement(&self, key: &StockKey, records: &[MovementRecord], balance: StockBalance) {
        let Some(policy) = self.catalog.policy(key.product_id) else {
            return;
        };
        let lot = key
            .lot
            .as_ref()
            .and_then(|lote| self.catalog.lot(key.product_id, lote));
        // Evaluate at the batch's business time for deterministic replays.
        let now = records
            .last()
            .map(|r| r.occurred_at)
            .unwrap_or_else(Utc::now);
        self.alerts.evaluate(key, balance, &policy, lot.as_ref(), now);
    }
}

/// The domain engine external collaborators call.
///
/// Sales reserve at cart confirmation and consume at checkout; purchasing
/// records `entrada_compra` on receipt; clinical modules reserve/consume
/// dispensed items; reporting reads balances and history.
pub struct StockEngine {
    catalog: Arc<InMemoryCatalog>,
    ledger: Arc<MovementLedger>,
    reservations: ReservationManager,
    transfers: TransferCoordinator,
    adjustments: AdjustmentProcessor,
    alerts: Arc<AlertEngine>,
    config: EngineConfig,
}

impl StockEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), AlertConfig::default())
    }

    pub fn with_config(config: EngineConfig, alert_config: AlertConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(MovementLedger::new(
            Arc::clone(&catalog) as Arc<dyn ProductCatalog>
        ));
        let alerts = Arc::new(AlertEngine::new(alert_config));
        ledger.register_observer(Arc::new(AlertBridge {
            catalog: Arc::clone(&catalog),
            alerts: Arc::clone(&alerts),
        }));
        Self {
            reservations: ReservationManager::new(Arc::clone(&ledger)),
            transfers: TransferCoordinator::new(Arc::clone(&ledger), config.max_retries),
            adjustments: AdjustmentProcessor::new(Arc::clone(&ledger)),
            catalog,
            ledger,
            alerts,
            config,
        }
    }

    // --- catalog -----------------------------------------------------------

    pub fn register_product(&self, policy: ProductPolicy) {
        self.catalog.register_product(policy);
    }

    pub fn register_lot(&self, lot: Lot) {
        self.catalog.register_lot(lot);
    }

    pub fn set_lot_condition(
        &self,
        product_id: ProductId,
        lote: &LotNumber,
        estado: StockCondition,
    ) -> StockResult<()> {
        if self.catalog.set_lot_condition(product_id, lote, estado) {
            Ok(())
        } else {
            Err(StockError::not_found(format!("lot {lote} of product {product_id}")))
        }
    }

    // --- movements ---------------------------------------------------------

    /// Record a stock movement (purchases, returns, shrinkage, expiry).
    ///
    /// Reservation holds are managed by [`reserve`](Self::reserve) and
    /// friends; passing `reserva`/`liberacion_reserva` here is rejected so
    /// the reservation store can never drift from the ledger.
    pub fn record_movement(
        &self,
        key: &StockKey,
        movement_type: MovementType,
        cantidad: i64,
        reference: DocumentRef,
        idempotency_key: &str,
        occurred_at: DateTime<Utc>,
    ) -> StockResult<AppendReceipt> {
        if matches!(
            movement_type,
            MovementType::Reserva | MovementType::LiberacionReserva
        ) {
            return Err(StockError::validation(
                "reservation movements must go through the reservation manager",
            ));
        }
        let _span =
            tracing::info_span!("record_movement", key = %key, tipo = ?movement_type, cantidad)
                .entered();
        self.ledger.append(
            key,
            vec![MovementDraft::new(movement_type, cantidad, reference)],
            idempotency_key,
            occurred_at,
        )
    }

    pub fn get_balance(&self, key: &StockKey) -> StockBalance {
        self.ledger.aggregate().get(key)
    }

    /// Force the cached balance back to the ledger-replayed value.
    pub fn recompute_balance(&self, key: &StockKey) -> StockResult<StockBalance> {
        self.ledger.recompute(key)
    }

    pub fn history(&self, key: &StockKey) -> Vec<MovementRecord> {
        self.ledger.history(key)
    }

    // --- reservations ------------------------------------------------------

    pub fn reserve(
        &self,
        key: &StockKey,
        cantidad: i64,
        reference: DocumentRef,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StockResult<Reservation> {
        let _span = tracing::info_span!("reserve", key = %key, cantidad).entered();
        let ttl = ttl.unwrap_or_else(|| Duration::seconds(self.config.reservation_ttl_secs));
        self.reservations.reserve(key, cantidad, reference, ttl, now)
    }

    pub fn consume_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StockResult<MovementRecord> {
        let _span = tracing::info_span!("consume_reservation", reservation = %id).entered();
        self.reservations.consume(id, now)
    }

    pub fn release_reservation(&self, id: ReservationId, now: DateTime<Utc>) -> StockResult<()> {
        self.reservations.release(id, now)
    }

    /// Periodic sweep releasing reservations past their deadline.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> StockResult<Vec<ReservationId>> {
        self.reservations.expire_overdue(now)
    }

    pub fn get_reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.get(id)
    }

    // --- transfers ---------------------------------------------------------

    pub fn initiate_transfer(
        &self,
        origen: WarehouseId,
        destino: WarehouseId,
        lines: Vec<TransferLineRequest>,
        now: DateTime<Utc>,
    ) -> StockResult<Transfer> {
        let _span = tracing::info_span!("initiate_transfer", %origen, %destino).entered();
        self.transfers.initiate(origen, destino, lines, now)
    }

    pub fn receive_transfer(
        &self,
        id: TransferId,
        lines: Vec<TransferReceiptLine>,
        now: DateTime<Utc>,
    ) -> StockResult<Transfer> {
        let _span = tracing::info_span!("receive_transfer", transfer = %id).entered();
        self.transfers.receive(id, lines, now)
    }

    pub fn cancel_transfer(&self, id: TransferId, now: DateTime<Utc>) -> StockResult<Transfer> {
        self.transfers.cancel(id, now)
    }

    /// Close a short transfer's gap as shrinkage at the origin.
    pub fn write_off_transfer(&self, id: TransferId, now: DateTime<Utc>) -> StockResult<Transfer> {
        self.transfers.write_off_outstanding(id, now)
    }

    pub fn get_transfer(&self, id: TransferId) -> Option<Transfer> {
        self.transfers.get(id)
    }

    // --- adjustments -------------------------------------------------------

    pub fn submit_adjustment(
        &self,
        key: &StockKey,
        cantidad_fisica: i64,
        now: DateTime<Utc>,
    ) -> StockResult<Adjustment> {
        self.adjustments.submit(key, cantidad_fisica, now)
    }

    pub fn approve_adjustment(&self, id: AdjustmentId) -> StockResult<Adjustment> {
        self.adjustments.approve(id)
    }

    pub fn reject_adjustment(
        &self,
        id: AdjustmentId,
        reason: impl Into<String>,
    ) -> StockResult<Adjustment> {
        self.adjustments.reject(id, reason)
    }

    pub fn execute_adjustment(
        &self,
        id: AdjustmentId,
        now: DateTime<Utc>,
    ) -> StockResult<Option<MovementRecord>> {
        let _span = tracing::info_span!("execute_adjustment", adjustment = %id).entered();
        self.adjustments.execute(id, now)
    }

    pub fn cancel_adjustment(&self, id: AdjustmentId) -> StockResult<Adjustment> {
        self.adjustments.cancel(id)
    }

    pub fn get_adjustment(&self, id: AdjustmentId) -> Option<Adjustment> {
        self.adjustments.get(id)
    }

    // --- alerts ------------------------------------------------------------

    pub fn list_active_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.list_active(filter)
    }

    pub fn acknowledge_alert(&self, id: AlertId, now: DateTime<Utc>) -> StockResult<Alert> {
        self.alerts.acknowledge(id, now)
    }

    pub fn dismiss_alert(&self, id: AlertId, now: DateTime<Utc>) -> StockResult<Alert> {
        self.alerts.dismiss(id, now)
    }
}

impl Default for StockEngine {
    fn default() -> Self {
        Self::new()
    }
}
