use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::Job;
use crate::error::JobError;

/// Lifecycle status of a minting job.
///
/// `Pending → Processing ⇄ Paused → {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Paused => "Paused",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        };
        f.pad(name)
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEvent {
    Start,
    Pause,
    Resume,
    /// Every item has a terminal outcome.
    Finish,
    /// The job-level failure threshold was exceeded.
    ThresholdExceeded,
    Cancel,
    /// A job-level error (e.g. persistence) stopped the run.
    Fatal,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transition table for [`JobStatus`].
pub struct StateMachine;

impl StateMachine {
    /// Target status for `event` in state `from`, or `InvalidTransition`.
    pub fn transition(from: JobStatus, event: JobEvent) -> Result<JobStatus, JobError> {
        use JobEvent as E;
        use JobStatus as S;

        let to = match (from, event) {
            (S::Pending, E::Start) => S::Processing,
            (S::Processing, E::Pause) => S::Paused,
            (S::Paused, E::Resume) => S::Processing,
            (S::Processing | S::Paused, E::Finish) => S::Completed,
            (S::Processing | S::Paused, E::ThresholdExceeded | E::Fatal) => S::Failed,
            (S::Processing | S::Paused, E::Cancel) => S::Cancelled,
            _ => return Err(JobError::InvalidTransition { from, event }),
        };
        Ok(to)
    }

    /// Apply `event` to `job`, maintaining its timestamps.
    ///
    /// `error` is recorded as `last_error` when the job lands in `Failed`
    /// and cleared otherwise.
    pub fn apply(job: &mut Job, event: JobEvent, error: Option<String>) -> Result<JobStatus, JobError> {
        let to = Self::transition(job.status, event)?;
        let now = Utc::now();

        if to == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        job.last_error = if to == JobStatus::Failed {
            Some(error.unwrap_or_else(|| "job failed".to_string()))
        } else {
            None
        };
        job.status = to;
        job.updated_at = now;
        Ok(to)
    }
}
