//! `botica-ledger` — movement ledger and materialized stock balances.
//!
//! The ledger is the append-only source of truth for every stock-affecting
//! event. Balances are a materialized projection over it, recomputable by
//! replay at any time. All mutations run inside a per-key critical section,
//! so check-and-act sequences (reserve, consume) are atomic by construction.

pub mod aggregate;
pub mod balance;
pub mod ledger;
pub mod movement;

pub use aggregate::StockAggregate;
pub use balance::StockBalance;
pub use ledger::{AppendReceipt, MovementLedger, MovementObserver};
pub use movement::{BalanceTarget, MovementCategory, MovementDraft, MovementRecord, MovementType};
