//! Transfer lifecycle and coordinator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use botica_core::{
    DocumentRef, LotNumber, ProductId, StockError, StockKey, StockResult, TransferId, WarehouseId,
};
use botica_ledger::{MovementDraft, MovementLedger, MovementType};

/// Transfer lifecycle. Serialized values are the exact strings external
/// reports depend on.
///
/// `Pendiente` is the created-but-unshipped state for transfers persisted
/// ahead of dispatch. [`TransferCoordinator::initiate`] ships synchronously
/// inside the same call, so coordinator-created transfers first become
/// visible already `EnTransito`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pendiente,
    EnTransito,
    Recibida,
    Parcial,
    Cancelada,
}

impl core::fmt::Display for TransferState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            TransferState::Pendiente => "pendiente",
            TransferState::EnTransito => "en_transito",
            TransferState::Recibida => "recibida",
            TransferState::Parcial => "parcial",
            TransferState::Cancelada => "cancelada",
        };
        f.write_str(s)
    }
}

/// Requested line of a new transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineRequest {
    pub product_id: ProductId,
    pub lot: Option<LotNumber>,
    pub cantidad: i64,
}

/// Received quantities for one line of an in-transit transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceiptLine {
    pub product_id: ProductId,
    pub lot: Option<LotNumber>,
    pub cantidad: i64,
}

/// One transfer line. `solicitada - recibida - mermada` is the quantity
/// still logically in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub lot: Option<LotNumber>,
    pub solicitada: i64,
    pub recibida: i64,
    pub mermada: i64,
}

impl TransferLine {
    pub fn pendiente(&self) -> i64 {
        self.solicitada - self.recibida - self.mermada
    }
}

/// An inter-warehouse transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub origen: WarehouseId,
    pub destino: WarehouseId,
    pub lines: Vec<TransferLine>,
    pub estado: TransferState,
    pub created_at: DateTime<Utc>,
    /// Number of receipt calls applied; part of receipt idempotency keys.
    pub receipts: u32,
}

impl Transfer {
    pub fn total_solicitada(&self) -> i64 {
        self.lines.iter().map(|l| l.solicitada).sum()
    }

    pub fn total_recibida(&self) -> i64 {
        self.lines.iter().map(|l| l.recibida).sum()
    }

    pub fn total_pendiente(&self) -> i64 {
        self.lines.iter().map(|l| l.pendiente()).sum()
    }

    pub fn total_mermada(&self) -> i64 {
        self.lines.iter().map(|l| l.mermada).sum()
    }

    fn line_index(&self, product_id: ProductId, lot: &Option<LotNumber>) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.product_id == product_id && &l.lot == lot)
    }
}

/// Orchestrates ship/receive/cancel/write-off over the ledger.
///
/// Initiation is all-or-nothing: every line's `disponible` is pre-validated
/// before any movement is appended. If a concurrent movement still
/// invalidates a line between pre-validation and its append, the
/// already-shipped lines are compensated with return movements and the
/// whole initiation is retried a bounded number of times.
pub struct TransferCoordinator {
    ledger: Arc<MovementLedger>,
    store: RwLock<HashMap<TransferId, Transfer>>,
    max_retries: u32,
}

impl TransferCoordinator {
    pub fn new(ledger: Arc<MovementLedger>, max_retries: u32) -> Self {
        Self {
            ledger,
            store: RwLock::new(HashMap::new()),
            max_retries,
        }
    }

    pub fn initiate(
        &self,
        origen: WarehouseId,
        destino: WarehouseId,
        lines: Vec<TransferLineRequest>,
        now: DateTime<Utc>,
    ) -> StockResult<Transfer> {
        if origen == destino {
            return Err(StockError::validation(
                "transfer origin and destination must differ",
            ));
        }
        if lines.is_empty() {
            return Err(StockError::validation("transfer requires at least one line"));
        }
        for line in &lines {
            if line.cantidad <= 0 {
                return Err(StockError::validation("transfer quantity must be positive"));
            }
        }

        let id = TransferId::new();
        let aggregate = self.ledger.aggregate();

        for attempt in 0..=self.max_retries {
            // Pre-validate every line before appending any movement.
            for line in &lines {
                let key = origin_key(origen, line.product_id, &line.lot);
                let balance = aggregate.get(&key);
                if balance.disponible() < line.cantidad {
                    return Err(StockError::InsufficientAvailableStock {
                        key,
                        requested: line.cantidad,
                        disponible: balance.disponible(),
                    });
                }
            }

            let mut shipped: Vec<(StockKey, i64, usize)> = Vec::new();
            let mut raced = false;
            let mut hard_error = None;
            for (i, line) in lines.iter().enumerate() {
                let key = origin_key(origen, line.product_id, &line.lot);
                let result = self.ledger.append(
                    &key,
                    vec![MovementDraft::new(
                        MovementType::SalidaTransferencia,
                        line.cantidad,
                        DocumentRef::Transferencia(id),
                    )],
                    &format!("transferencia:{id}:intento:{attempt}:salida:{i}"),
                    now,
                );
                match result {
                    Ok(_) => shipped.push((key, line.cantidad, i)),
                    Err(
                        StockError::InsufficientStock { .. }
                        | StockError::InsufficientAvailableStock { .. },
                    ) => {
                        raced = true;
                        break;
                    }
                    Err(e) => {
                        hard_error = Some(e);
                        break;
                    }
                }
            }

            if raced || hard_error.is_some() {
                // Compensate already-shipped lines, then retry or surface.
                for (key, cantidad, i) in shipped {
                    self.ledger.append(
                        &key,
                        vec![MovementDraft::new(
                            MovementType::EntradaTransferencia,
                            cantidad,
                            DocumentRef::Transferencia(id),
                        )],
                        &format!("transferencia:{id}:intento:{attempt}:compensacion:{i}"),
                        now,
                    )?;
                }
                if let Some(e) = hard_error {
                    return Err(e);
                }
                tracing::warn!(transfer = %id, attempt, "initiation raced, retrying");
                continue;
            }

            let transfer = Transfer {
                id,
                origen,
                destino,
                lines: lines
                    .iter()
                    .map(|l| TransferLine {
                        product_id: l.product_id,
                        lot: l.lot.clone(),
                        solicitada: l.cantidad,
                        recibida: 0,
                        mermada: 0,
                    })
                    .collect(),
                estado: TransferState::EnTransito,
                created_at: now,
                receipts: 0,
            };
            let mut store = self.write_store()?;
            store.insert(id, transfer.clone());
            tracing::info!(transfer = %id, lines = transfer.lines.len(), "transferencia en transito");
            return Ok(transfer);
        }

        Err(StockError::concurrent(
            "transfer initiation kept losing stock to concurrent movements",
        ))
    }

    /// Receive shipped quantities at the destination.
    ///
    /// Short receipts leave the transfer `Parcial` with the remainder
    /// tracked on the line. Receiving an already-`Recibida` transfer is a
    /// no-op.
    pub fn receive(
        &self,
        id: TransferId,
        receipts: Vec<TransferReceiptLine>,
        now: DateTime<Utc>,
    ) -> StockResult<Transfer> {
        let mut store = self.write_store()?;
        let transfer = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))?;

        match transfer.estado {
            TransferState::Recibida => return Ok(transfer.clone()),
            TransferState::EnTransito | TransferState::Parcial => {}
            state => {
                return Err(StockError::invalid_transition(
                    "transfer",
                    state.to_string(),
                    "recibir",
                ));
            }
        }
        if receipts.is_empty() {
            return Err(StockError::validation("receipt requires at least one line"));
        }

        // Validate every receipt line before appending any movement.
        let mut resolved = Vec::with_capacity(receipts.len());
        for receipt in &receipts {
            if receipt.cantidad <= 0 {
                return Err(StockError::validation("received quantity must be positive"));
            }
            let idx = transfer
                .line_index(receipt.product_id, &receipt.lot)
                .ok_or_else(|| {
                    StockError::validation("received line does not belong to the transfer")
                })?;
            if receipt.cantidad > transfer.lines[idx].pendiente() {
                return Err(StockError::validation(
                    "received quantity exceeds in-transit quantity",
                ));
            }
            resolved.push((idx, receipt.cantidad));
        }

        transfer.receipts += 1;
        let pass = transfer.receipts;
        for (idx, cantidad) in resolved {
            let line = &transfer.lines[idx];
            let key = StockKey {
                product_id: line.product_id,
                warehouse_id: transfer.destino,
                lot: line.lot.clone(),
            };
            self.ledger.append(
                &key,
                vec![MovementDraft::new(
                    MovementType::EntradaTransferencia,
                    cantidad,
                    DocumentRef::Transferencia(id),
                )],
                &format!("transferencia:{id}:recepcion:{pass}:{idx}"),
                now,
            )?;
            transfer.lines[idx].recibida += cantidad;
        }

        transfer.estado = if transfer.lines.iter().all(|l| l.recibida == l.solicitada) {
            TransferState::Recibida
        } else {
            TransferState::Parcial
        };
        tracing::info!(transfer = %id, estado = %transfer.estado, "transferencia recibida");
        Ok(transfer.clone())
    }

    /// Cancel an unshipped-or-unreceived transfer, returning the full
    /// quantity to the origin. Idempotent on an already-cancelled transfer.
    pub fn cancel(&self, id: TransferId, now: DateTime<Utc>) -> StockResult<Transfer> {
        let mut store = self.write_store()?;
        let transfer = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))?;

        match transfer.estado {
            TransferState::Cancelada => return Ok(transfer.clone()),
            TransferState::Pendiente | TransferState::EnTransito => {}
            state => {
                return Err(StockError::invalid_transition(
                    "transfer",
                    state.to_string(),
                    "cancelar",
                ));
            }
        }
        if transfer.total_recibida() > 0 {
            return Err(StockError::invalid_transition(
                "transfer",
                transfer.estado.to_string(),
                "cancelar con lineas recibidas",
            ));
        }

        for (i, line) in transfer.lines.iter().enumerate() {
            let key = origin_key(transfer.origen, line.product_id, &line.lot);
            self.ledger.append(
                &key,
                vec![MovementDraft::new(
                    MovementType::EntradaTransferencia,
                    line.solicitada,
                    DocumentRef::Transferencia(id),
                )],
                &format!("transferencia:{id}:cancelacion:{i}"),
                now,
            )?;
        }
        transfer.estado = TransferState::Cancelada;
        tracing::info!(transfer = %id, "transferencia cancelada");
        Ok(transfer.clone())
    }

    /// Write off the outstanding in-transit quantity as shrinkage.
    ///
    /// The origin balance was already debited at initiation, so the loss is
    /// recorded as a return-plus-shrinkage pair at the origin key: net-zero
    /// balance effect, auditable in the ledger. After this,
    /// `solicitada == recibida + mermada` on every line.
    pub fn write_off_outstanding(&self, id: TransferId, now: DateTime<Utc>) -> StockResult<Transfer> {
        let mut store = self.write_store()?;
        let transfer = store
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("transfer {id}")))?;

        match transfer.estado {
            TransferState::EnTransito | TransferState::Parcial => {}
            state => {
                return Err(StockError::invalid_transition(
                    "transfer",
                    state.to_string(),
                    "mermar",
                ));
            }
        }
        if transfer.total_pendiente() == 0 {
            return Err(StockError::validation("transfer has no outstanding quantity"));
        }

        for i in 0..transfer.lines.len() {
            let pendiente = transfer.lines[i].pendiente();
            if pendiente == 0 {
                continue;
            }
            let line = &transfer.lines[i];
            let key = origin_key(transfer.origen, line.product_id, &line.lot);
            self.ledger.append(
                &key,
                vec![
                    MovementDraft::new(
                        MovementType::EntradaTransferencia,
                        pendiente,
                        DocumentRef::Transferencia(id),
                    ),
                    MovementDraft::new(
                        MovementType::SalidaMerma,
                        pendiente,
                        DocumentRef::Transferencia(id),
                    ),
                ],
                &format!("transferencia:{id}:merma:{i}"),
                now,
            )?;
            transfer.lines[i].mermada += pendiente;
        }
        transfer.estado = TransferState::Parcial;
        tracing::info!(transfer = %id, mermada = transfer.total_mermada(), "faltante mermado");
        Ok(transfer.clone())
    }

    pub fn get(&self, id: TransferId) -> Option<Transfer> {
        match self.store.read() {
            Ok(store) => store.get(&id).cloned(),
            Err(_) => None,
        }
    }

    fn write_store(
        &self,
    ) -> StockResult<std::sync::RwLockWriteGuard<'_, HashMap<TransferId, Transfer>>> {
        self.store
            .write()
            .map_err(|_| StockError::concurrent("transfer store poisoned"))
    }
}

fn origin_key(origen: WarehouseId, product_id: ProductId, lot: &Option<LotNumber>) -> StockKey {
    StockKey {
        product_id,
        warehouse_id: origen,
        lot: lot.clone(),
    }
}
