//! The three engine workers.
//!
//! Acquisition opens pairs, Reconciliation confirms fills and drives status,
//! Disposal places the sell legs. They run as independent tokio tasks and
//! coordinate only through the ledger's compare-and-set transitions.

pub mod acquisition;
pub mod disposal;
pub mod math;
pub mod reconciler;

pub use acquisition::AcquisitionWorker;
pub use disposal::DisposalWorker;
pub use reconciler::ReconciliationWorker;

use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::ledger::LedgerError;
use crate::params::ParamError;

/// Worker-level failure.
///
/// Only ledger invariant violations are fatal: they indicate a corrupted or
/// corruptible ledger and halt the offending worker. Everything else is
/// retried on the next cycle.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Params(#[from] ParamError),
}

impl WorkerError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::Ledger(LedgerError::InvariantViolation { .. })
        )
    }
}
