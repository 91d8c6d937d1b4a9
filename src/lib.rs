//! Biblio circulation engine
//!
//! The availability-reconciliation and reservation-queue core of a library
//! circulation system: it decides which queued reservation gets a physical
//! copy when one frees up, rebinds reservations when an assigned copy is
//! lost, recomputes cached availability counters from ground truth, audits
//! the catalog for integrity drift, and drives periodic maintenance.

pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod tx;

pub use config::AppConfig;
pub use error::{EngineError, EngineResult};
pub use tx::TxScope;
