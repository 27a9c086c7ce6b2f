//! `botica-alerts` — threshold and expiration alerting.
//!
//! Alerts are derived from aggregate state after each mutation, never
//! stored as independent truth: re-evaluating unchanged state is a no-op,
//! and a cleared condition resolves its alert.

pub mod alert;

pub use alert::{Alert, AlertConfig, AlertEngine, AlertFilter, AlertState, AlertType};
