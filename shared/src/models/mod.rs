//! Domain models for the Stock Ledger platform

mod audit;
mod idempotency;
mod inventory;
mod log;
mod movement;
mod receipt;

pub use audit::*;
pub use idempotency::*;
pub use inventory::*;
pub use log::*;
pub use movement::*;
pub use receipt::*;
