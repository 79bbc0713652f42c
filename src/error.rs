use thiserror::Error;

use crate::ledger::LedgerError;
use crate::state_machine::{JobEvent, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no supported tree covers a capacity of {requested} items (max {max})")]
    InvalidCapacity { requested: u64, max: u64 },

    #[error("no supported buffer width >= {requested} for depth {depth}")]
    InvalidBufferWidth { depth: u32, requested: u32 },

    #[error("canopy depth {canopy} is invalid for depth {depth} (max {max})")]
    InvalidCanopy { depth: u32, canopy: u32, max: u32 },
}

/// Terminal failure of one call made through the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("remote call failed after {attempts} attempts: {cause}")]
    RemoteFailure { attempts: u32, cause: LedgerError },

    #[error("remote call rejected: {0}")]
    Rejected(LedgerError),
}

impl GatewayError {
    /// The last ledger error seen for this call.
    pub fn cause(&self) -> &LedgerError {
        match self {
            GatewayError::RemoteFailure { cause, .. } => cause,
            GatewayError::Rejected(cause) => cause,
        }
    }

    /// Fee the ledger reported as charged despite the failure.
    pub fn fee_charged(&self) -> u64 {
        self.cause().fee_charged()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("cannot apply {event} to a job in state {from}")]
    InvalidTransition { from: JobStatus, event: JobEvent },

    #[error("invalid records: {0}")]
    InvalidRecords(String),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}
