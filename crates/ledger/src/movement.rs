//! Movement types and immutable movement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use botica_core::{DocumentRef, MovementId, StockKey};

use crate::balance::StockBalance;

/// High-level movement category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementCategory {
    Entrada,
    Salida,
    Ajuste,
    Reserva,
}

/// Which balance figure a movement mutates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BalanceTarget {
    Actual,
    Reservado,
}

/// Movement type. Each type carries a fixed sign and category; serialized
/// values are the exact strings external reports depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    EntradaCompra,
    EntradaDevolucion,
    EntradaAjuste,
    EntradaTransferencia,
    SalidaVenta,
    SalidaDevolucion,
    SalidaAjuste,
    SalidaTransferencia,
    SalidaMerma,
    SalidaVencimiento,
    Reserva,
    LiberacionReserva,
}

impl MovementType {
    pub fn category(self) -> MovementCategory {
        match self {
            MovementType::EntradaCompra
            | MovementType::EntradaDevolucion
            | MovementType::EntradaTransferencia => MovementCategory::Entrada,
            MovementType::SalidaVenta
            | MovementType::SalidaDevolucion
            | MovementType::SalidaTransferencia
            | MovementType::SalidaMerma
            | MovementType::SalidaVencimiento => MovementCategory::Salida,
            MovementType::EntradaAjuste | MovementType::SalidaAjuste => MovementCategory::Ajuste,
            MovementType::Reserva | MovementType::LiberacionReserva => MovementCategory::Reserva,
        }
    }

    /// Sign applied to the draft magnitude.
    pub fn sign(self) -> i64 {
        match self {
            MovementType::EntradaCompra
            | MovementType::EntradaDevolucion
            | MovementType::EntradaAjuste
            | MovementType::EntradaTransferencia
            | MovementType::Reserva => 1,
            MovementType::SalidaVenta
            | MovementType::SalidaDevolucion
            | MovementType::SalidaAjuste
            | MovementType::SalidaTransferencia
            | MovementType::SalidaMerma
            | MovementType::SalidaVencimiento
            | MovementType::LiberacionReserva => -1,
        }
    }

    /// `reserva`/`liberacion_reserva` move the hold; everything else moves
    /// owned stock.
    pub fn target(self) -> BalanceTarget {
        match self.category() {
            MovementCategory::Reserva => BalanceTarget::Reservado,
            _ => BalanceTarget::Actual,
        }
    }

    pub fn is_outbound(self) -> bool {
        self.target() == BalanceTarget::Actual && self.sign() < 0
    }

    /// Shrinkage/expiry write-offs are the only outbound movements allowed
    /// from quarantined, defective or expired lots.
    pub fn is_write_off(self) -> bool {
        matches!(self, MovementType::SalidaMerma | MovementType::SalidaVencimiento)
    }
}

/// Immutable ledger entry. Created exactly once per state transition; never
/// mutated or deleted, only superseded by compensating entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub movement_id: MovementId,
    pub key: StockKey,
    pub movement_type: MovementType,
    /// Signed delta applied to the target balance figure.
    pub cantidad: i64,
    pub balance_before: StockBalance,
    pub balance_after: StockBalance,
    pub reference: DocumentRef,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    /// Set when the sell-without-stock override let `actual` go negative.
    pub oversold: bool,
}

/// A not-yet-committed movement: positive magnitude plus type and reference;
/// the sign comes from the type at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub movement_type: MovementType,
    pub cantidad: i64,
    pub reference: DocumentRef,
}

impl MovementDraft {
    pub fn new(movement_type: MovementType, cantidad: i64, reference: DocumentRef) -> Self {
        Self {
            movement_type,
            cantidad,
            reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_types_serialize_to_exact_strings() {
        let cases = [
            (MovementType::EntradaCompra, "entrada_compra"),
            (MovementType::EntradaDevolucion, "entrada_devolucion"),
            (MovementType::EntradaAjuste, "entrada_ajuste"),
            (MovementType::EntradaTransferencia, "entrada_transferencia"),
            (MovementType::SalidaVenta, "salida_venta"),
            (MovementType::SalidaDevolucion, "salida_devolucion"),
            (MovementType::SalidaAjuste, "salida_ajuste"),
            (MovementType::SalidaTransferencia, "salida_transferencia"),
            (MovementType::SalidaMerma, "salida_merma"),
            (MovementType::SalidaVencimiento, "salida_vencimiento"),
            (MovementType::Reserva, "reserva"),
            (MovementType::LiberacionReserva, "liberacion_reserva"),
        ];
        for (movement_type, expected) in cases {
            assert_eq!(
                serde_json::to_value(movement_type).unwrap(),
                serde_json::Value::String(expected.to_string())
            );
        }
    }

    #[test]
    fn signs_match_categories() {
        assert_eq!(MovementType::EntradaCompra.sign(), 1);
        assert_eq!(MovementType::SalidaVenta.sign(), -1);
        assert_eq!(MovementType::Reserva.sign(), 1);
        assert_eq!(MovementType::LiberacionReserva.sign(), -1);
    }

    #[test]
    fn reservation_movements_target_reservado() {
        assert_eq!(MovementType::Reserva.target(), BalanceTarget::Reservado);
        assert_eq!(MovementType::SalidaVenta.target(), BalanceTarget::Actual);
        assert!(!MovementType::Reserva.is_outbound());
        assert!(MovementType::SalidaMerma.is_outbound());
    }
}
