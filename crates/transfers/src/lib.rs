//! `botica-transfers` — two-phase inter-warehouse stock movement.
//!
//! A transfer debits the origin at initiation and credits the destination
//! at receipt; the quantity in between lives on the transfer line, not in
//! any stock balance, so no lock is held across the (possibly days-long)
//! gap and no operation ever touches two keys at once.

pub mod transfer;

pub use transfer::{
    Transfer, TransferCoordinator, TransferLine, TransferLineRequest, TransferReceiptLine,
    TransferState,
};
