use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobStatus;
use crate::error::GatewayError;
use crate::ledger::MintReceipt;
use crate::planner::{PlanRequest, TreeParams};

/// Failure reasons kept on a job for display.
pub const MAX_ERROR_SAMPLES: usize = 5;

/// One item to mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    /// Content-address reference to the item's metadata blob.
    pub metadata_uri: String,
    /// Destination identity; `None` mints to the payer.
    #[serde(default)]
    pub owner: Option<String>,
}

impl Record {
    pub fn new(name: impl Into<String>, metadata_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata_uri: metadata_uri.into(),
            owner: None,
        }
    }
}

/// Why an item was closed out without being submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Cancelled,
    ThresholdExceeded,
    Aborted,
}

impl SkipReason {
    pub fn tag(self) -> &'static str {
        match self {
            SkipReason::Cancelled => "skipped: cancelled",
            SkipReason::ThresholdExceeded => "skipped: failure threshold exceeded",
            SkipReason::Aborted => "skipped: job aborted",
        }
    }
}

/// Terminal result for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub leaf_index: u64,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fee actually charged for this item, in lamports.
    #[serde(default)]
    pub fee_lamports: u64,
    /// Closed out by cancel/abort rather than by the ledger.
    #[serde(default)]
    pub skipped: bool,
}

impl Outcome {
    pub fn minted(leaf_index: u64, receipt: MintReceipt) -> Self {
        Self {
            leaf_index,
            succeeded: true,
            signature: Some(receipt.signature),
            error: None,
            fee_lamports: receipt.fee_lamports,
            skipped: false,
        }
    }

    pub fn failed(leaf_index: u64, err: &GatewayError) -> Self {
        Self {
            leaf_index,
            succeeded: false,
            signature: None,
            error: Some(err.to_string()),
            fee_lamports: err.fee_charged(),
            skipped: false,
        }
    }

    pub fn skipped(leaf_index: u64, reason: SkipReason) -> Self {
        Self {
            leaf_index,
            succeeded: false,
            signature: None,
            error: Some(reason.tag().to_string()),
            fee_lamports: 0,
            skipped: true,
        }
    }
}

/// A sampled per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub leaf_index: u64,
    pub error: String,
}

/// Per-job execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub batch_size: usize,
    /// Fail the job once more than this many items have failed.
    #[serde(default)]
    pub max_failed_items: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_failed_items: None,
        }
    }
}

/// One minting operation. Callers only ever see clones of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total_items: u64,
    pub succeeded_count: u64,
    pub failed_count: u64,
    pub plan_request: PlanRequest,
    pub options: JobOptions,
    pub tree_params: Option<TreeParams>,
    pub estimated_cost: Option<u64>,
    pub accrued_cost: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_samples: Vec<ItemFailure>,
}

impl Job {
    pub fn new(total_items: u64, plan_request: PlanRequest, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            total_items,
            succeeded_count: 0,
            failed_count: 0,
            plan_request,
            options,
            tree_params: None,
            estimated_cost: None,
            accrued_cost: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            last_error: None,
            error_samples: Vec::new(),
        }
    }

    pub fn processed(&self) -> u64 {
        self.succeeded_count + self.failed_count
    }

    pub fn remaining(&self) -> u64 {
        self.total_items - self.processed()
    }

    pub fn failure_threshold_exceeded(&self) -> bool {
        self.options
            .max_failed_items
            .is_some_and(|max| self.failed_count > max)
    }

    fn count(&mut self, outcome: &Outcome) {
        if outcome.succeeded {
            self.succeeded_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.accrued_cost = self.accrued_cost.saturating_add(outcome.fee_lamports);
        if let (false, false, Some(error)) = (outcome.succeeded, outcome.skipped, &outcome.error) {
            if self.error_samples.len() == MAX_ERROR_SAMPLES {
                self.error_samples.remove(0);
            }
            self.error_samples.push(ItemFailure {
                leaf_index: outcome.leaf_index,
                error: error.clone(),
            });
        }
        self.updated_at = Utc::now();
    }
}

/// Terminal outcome per leaf. The only path through which job counters move.
#[derive(Debug, Clone, Default)]
pub struct ItemTracker {
    outcomes: Vec<Option<Outcome>>,
}

impl ItemTracker {
    pub fn new(total_items: u64) -> Self {
        Self {
            outcomes: vec![None; total_items as usize],
        }
    }

    pub fn is_terminal(&self, leaf_index: u64) -> bool {
        self.outcomes
            .get(leaf_index as usize)
            .is_some_and(Option::is_some)
    }

    /// Whether `outcome` would be counted: in range and not yet terminal.
    pub fn accepts(&self, outcome: &Outcome) -> bool {
        matches!(self.outcomes.get(outcome.leaf_index as usize), Some(None))
    }

    /// Count `outcome` against `job`. Returns `false` and changes nothing if
    /// the leaf already has a terminal outcome.
    pub fn record(&mut self, job: &mut Job, outcome: Outcome) -> bool {
        if !self.accepts(&outcome) {
            return false;
        }
        job.count(&outcome);
        let slot = outcome.leaf_index as usize;
        self.outcomes[slot] = Some(outcome);
        true
    }

    /// Leaf indices without a terminal outcome, in order.
    pub fn pending(&self) -> impl Iterator<Item = u64> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i as u64)
    }

    /// The next `size` pending leaves in order.
    pub fn next_batch(&self, size: usize) -> Vec<u64> {
        self.pending().take(size.max(1)).collect()
    }

    /// Skip outcomes for every pending leaf.
    pub fn close_out(&self, reason: SkipReason) -> Vec<Outcome> {
        self.pending()
            .map(|leaf| Outcome::skipped(leaf, reason))
            .collect()
    }
}

/// Summary produced once a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub total_items: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub tree_params: Option<TreeParams>,
    pub estimated_cost: Option<u64>,
    pub accrued_cost: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub last_error: Option<String>,
    pub error_samples: Vec<ItemFailure>,
}

impl AuditRecord {
    pub fn from_job(job: &Job) -> Self {
        let duration_ms = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        Self {
            job_id: job.id.clone(),
            status: job.status,
            total_items: job.total_items,
            succeeded: job.succeeded_count,
            failed: job.failed_count,
            tree_params: job.tree_params,
            estimated_cost: job.estimated_cost,
            accrued_cost: job.accrued_cost,
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_ms,
            last_error: job.last_error.clone(),
            error_samples: job.error_samples.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;

    fn make_job(total: u64) -> Job {
        Job::new(total, PlanRequest::for_capacity(total), JobOptions::default())
    }

    fn receipt(fee: u64) -> MintReceipt {
        MintReceipt {
            signature: "sig".into(),
            fee_lamports: fee,
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = make_job(10);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_items, 10);
        assert_eq!(job.processed(), 0);
        assert!(job.tree_params.is_none());
        assert!(job.started_at.is_none());
        assert_eq!(job.options.batch_size, 50);
    }

    #[test]
    fn tracker_counts_each_leaf_once() {
        let mut job = make_job(3);
        let mut tracker = ItemTracker::new(3);

        assert!(tracker.record(&mut job, Outcome::minted(0, receipt(5000))));
        assert!(!tracker.record(&mut job, Outcome::minted(0, receipt(5000))));
        let failure = GatewayError::RemoteFailure {
            attempts: 4,
            cause: LedgerError::Timeout,
        };
        assert!(!tracker.record(&mut job, Outcome::failed(0, &failure)));

        assert_eq!(job.succeeded_count, 1);
        assert_eq!(job.failed_count, 0);
        assert_eq!(job.accrued_cost, 5000);
        assert!(tracker.is_terminal(0));
        assert!(!tracker.is_terminal(1));
    }

    #[test]
    fn out_of_range_leaves_are_ignored() {
        let mut job = make_job(2);
        let mut tracker = ItemTracker::new(2);
        assert!(!tracker.record(&mut job, Outcome::minted(2, receipt(1))));
        assert_eq!(job.processed(), 0);
    }

    #[test]
    fn failures_are_sampled_and_charged_fees_accrue() {
        let mut job = make_job(10);
        let mut tracker = ItemTracker::new(10);
        for leaf in 0..7 {
            let err = GatewayError::Rejected(LedgerError::Rejected {
                message: format!("bad leaf {leaf}"),
                fee_charged: 100,
            });
            tracker.record(&mut job, Outcome::failed(leaf, &err));
        }
        assert_eq!(job.failed_count, 7);
        assert_eq!(job.accrued_cost, 700);
        assert_eq!(job.error_samples.len(), MAX_ERROR_SAMPLES);
        assert_eq!(job.error_samples[0].leaf_index, 2);
        assert_eq!(job.error_samples[4].leaf_index, 6);
    }

    #[test]
    fn close_out_skips_pending_only() {
        let mut job = make_job(4);
        let mut tracker = ItemTracker::new(4);
        tracker.record(&mut job, Outcome::minted(1, receipt(10)));

        let skipped = tracker.close_out(SkipReason::Cancelled);
        assert_eq!(
            skipped.iter().map(|o| o.leaf_index).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        for outcome in skipped {
            assert_eq!(outcome.error.as_deref(), Some("skipped: cancelled"));
            tracker.record(&mut job, outcome);
        }
        assert_eq!(job.processed(), job.total_items);
        assert_eq!(job.failed_count, 3);
        assert!(job.error_samples.is_empty());
        assert_eq!(tracker.next_batch(10), Vec::<u64>::new());
    }

    #[test]
    fn next_batch_is_ordered_and_bounded() {
        let mut job = make_job(6);
        let mut tracker = ItemTracker::new(6);
        tracker.record(&mut job, Outcome::minted(0, receipt(0)));
        tracker.record(&mut job, Outcome::minted(2, receipt(0)));
        assert_eq!(tracker.next_batch(3), vec![1, 3, 4]);
    }

    #[test]
    fn failure_threshold() {
        let mut job = Job::new(
            5,
            PlanRequest::for_capacity(5),
            JobOptions {
                batch_size: 2,
                max_failed_items: Some(1),
            },
        );
        job.failed_count = 1;
        assert!(!job.failure_threshold_exceeded());
        job.failed_count = 2;
        assert!(job.failure_threshold_exceeded());
        assert!(!make_job(5).failure_threshold_exceeded());
    }

    #[test]
    fn audit_record_from_job() {
        let mut job = make_job(2);
        job.succeeded_count = 2;
        job.accrued_cost = 10_000;
        let record = AuditRecord::from_job(&job);
        assert_eq!(record.job_id, job.id);
        assert_eq!(record.succeeded, 2);
        assert_eq!(record.accrued_cost, 10_000);
        assert!(record.duration_ms.is_none());
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = make_job(7);
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn record_owner_is_optional_in_json() {
        let record: Record =
            serde_json::from_str(r#"{"name":"A","metadata_uri":"ipfs://a"}"#).unwrap();
        assert_eq!(record, Record::new("A", "ipfs://a"));
    }
}
