//! `botica-reservations` — short-lived holds against available stock.
//!
//! A reservation reduces `disponible` without touching `actual` until it is
//! consumed (dispensed) or returned to the pool. The check-and-act pair
//! "is there enough available? then hold it" runs inside the ledger's
//! per-key critical section, so two racing reservations for the last unit
//! resolve to exactly one success.

pub mod reservation;

pub use reservation::{Reservation, ReservationManager, ReservationState};
