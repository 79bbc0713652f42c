//! Progress and cost figures derived from a job snapshot.
//!
//! Nothing here is stored; [`Progress::of`] is recomputed on every query.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state_machine::Job;

/// Terminal items needed before an ETA is reported.
pub const MIN_ETA_SAMPLE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Eta {
    Indeterminate,
    Remaining(Duration),
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
    pub percent_complete: f64,
    pub eta: Eta,
    /// Terminal items per second since the job started.
    pub items_per_sec: Option<f64>,
    pub accrued_cost: u64,
    pub estimated_cost: Option<u64>,
}

impl Progress {
    pub fn of(job: &Job, now: DateTime<Utc>) -> Self {
        let processed = job.processed();
        let elapsed = job
            .started_at
            .and_then(|start| (now - start).to_std().ok());

        Self {
            processed,
            total: job.total_items,
            percent_complete: percent_complete(processed, job.total_items),
            eta: eta(job, elapsed),
            items_per_sec: elapsed
                .filter(|e| !e.is_zero() && processed > 0)
                .map(|e| processed as f64 / e.as_secs_f64()),
            accrued_cost: job.accrued_cost,
            estimated_cost: job.estimated_cost,
        }
    }
}

pub fn percent_complete(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    processed as f64 / total as f64 * 100.0
}

/// Remaining time at the mean rate observed so far.
pub fn eta(job: &Job, elapsed: Option<Duration>) -> Eta {
    if job.status.is_terminal() {
        return Eta::Done;
    }
    let processed = job.processed();
    match elapsed {
        Some(elapsed) if processed >= MIN_ETA_SAMPLE => {
            let per_item = elapsed.as_secs_f64() / processed as f64;
            Eta::Remaining(Duration::from_secs_f64(per_item * job.remaining() as f64))
        }
        _ => Eta::Indeterminate,
    }
}
