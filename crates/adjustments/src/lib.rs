//! `botica-adjustments` — physical-count reconciliation workflow.
//!
//! An adjustment reconciles a physical count against the system balance
//! through an approval workflow. Only an executed adjustment ever touches
//! the ledger, and it does so with exactly one `ajuste` movement.

pub mod adjustment;

pub use adjustment::{Adjustment, AdjustmentProcessor, AdjustmentState};
