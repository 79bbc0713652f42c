mod job;
mod state;

pub use job::{
    AuditRecord, ItemFailure, ItemTracker, Job, JobOptions, MAX_ERROR_SAMPLES, Outcome, Record,
    SkipReason,
};
pub use state::{JobEvent, JobStatus, StateMachine};
