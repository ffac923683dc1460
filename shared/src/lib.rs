//! Shared types and models for the Stock Ledger platform
//!
//! This crate contains the domain model, the weighted-average cost engine and
//! request validation shared by the backend and any other consumer of the
//! ledger contract.

pub mod costing;
pub mod models;
pub mod types;
pub mod validation;

pub use costing::*;
pub use models::*;
pub use types::*;
pub use validation::*;
