//! Domain error model.

use thiserror::Error;

use crate::key::StockKey;

/// Result type used across the stock domain.
pub type StockResult<T> = Result<T, StockError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Every
/// rejected operation leaves zero movement records behind, so any variant
/// below means "nothing happened".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// A movement would drive `actual` below zero without the
    /// sell-without-stock override.
    #[error("insufficient stock for {key}: requested {requested}, actual {actual}")]
    InsufficientStock {
        key: StockKey,
        requested: i64,
        actual: i64,
    },

    /// A reservation asked for more than the currently available quantity.
    #[error("insufficient available stock for {key}: requested {requested}, disponible {disponible}")]
    InsufficientAvailableStock {
        key: StockKey,
        requested: i64,
        disponible: i64,
    },

    /// An idempotency key was replayed for the same stock key.
    ///
    /// The append path treats this as a non-fatal replay and returns the
    /// prior records; this variant is only surfaced by the strict form.
    #[error("duplicate movement for idempotency key '{idempotency_key}'")]
    DuplicateMovement { idempotency_key: String },

    /// A lifecycle operation was attempted from a state that does not allow it.
    #[error("invalid state transition for {entity}: {from} -> {attempted}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        attempted: String,
    },

    /// A value failed validation (e.g. missing lot on a lot-controlled product).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic-retry signal: the balance changed underneath an operation.
    /// Retried internally a bounded number of times before surfacing.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.into(),
            attempted: attempted.into(),
        }
    }
}
