use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accountant::Progress;
use crate::dispatcher::{Dispatcher, PendingItem};
use crate::error::{GatewayError, JobError};
use crate::gateway::Gateway;
use crate::ledger::LedgerClient;
use crate::planner::{CapacityPlanner, PlanRequest};
use crate::state_machine::{
    ItemTracker, Job, JobEvent, JobOptions, JobStatus, Outcome, Record, SkipReason, StateMachine,
};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Concurrent submissions within one batch.
    pub batch_parallelism: usize,
    /// Options for jobs created through [`Orchestrator::create_job`].
    pub job_options: JobOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_parallelism: 2,
            job_options: JobOptions::default(),
        }
    }
}

struct JobState {
    job: Job,
    tracker: ItemTracker,
}

struct JobHandle {
    records: Arc<Vec<Record>>,
    state: tokio::sync::Mutex<JobState>,
    status: watch::Sender<JobStatus>,
    /// True while a batch is being dispatched.
    busy: watch::Sender<bool>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    fn driver_alive(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

struct Shared<C, S> {
    dispatcher: Dispatcher<C>,
    store: Arc<S>,
    config: OrchestratorConfig,
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
}

/// Owns every job's lifecycle and drives its batches through the dispatcher.
///
/// Cloning is cheap; clones share jobs, store and gateway.
pub struct Orchestrator<C, S> {
    shared: Arc<Shared<C, S>>,
}

impl<C, S> Clone for Orchestrator<C, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: LedgerClient, S: JobStore> Orchestrator<C, S> {
    pub fn new(
        client: Arc<C>,
        gateway: Arc<Gateway>,
        store: Arc<S>,
        config: OrchestratorConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(client, gateway, config.batch_parallelism);
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                store,
                config,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        self.shared.dispatcher.gateway()
    }

    /// Sample the ledger's per-item fee so later plans use it.
    pub async fn refresh_fee(&self) -> Result<u64, GatewayError> {
        let client = self.shared.dispatcher.client();
        self.gateway().refresh_fee(client.as_ref()).await
    }

    /// Create a `Pending` job with the default job options.
    pub async fn create_job(
        &self,
        records: Vec<Record>,
        target_capacity: u64,
    ) -> Result<String, JobError> {
        self.create_job_with(
            records,
            PlanRequest::for_capacity(target_capacity),
            self.shared.config.job_options,
        )
        .await
    }

    pub async fn create_job_with(
        &self,
        records: Vec<Record>,
        request: PlanRequest,
        options: JobOptions,
    ) -> Result<String, JobError> {
        validate_records(&records, request.target_capacity)?;

        let job = Job::new(records.len() as u64, request, options);
        self.shared.store.save_job(&job).await?;
        self.shared.store.save_records(&job.id, &records).await?;

        let id = job.id.clone();
        info!(job_id = %id, items = job.total_items, capacity = request.target_capacity, "job created");
        let tracker = ItemTracker::new(job.total_items);
        self.register(job, records, tracker);
        Ok(id)
    }

    /// Replace the capacity request of a job that has not started yet.
    pub async fn replan(&self, id: &str, request: PlanRequest) -> Result<(), JobError> {
        let handle = self.handle(id)?;
        let mut state = handle.state.lock().await;
        if state.job.status != JobStatus::Pending {
            return Err(JobError::InvalidTransition {
                from: state.job.status,
                event: JobEvent::Start,
            });
        }
        validate_records(&handle.records, request.target_capacity)?;
        let mut next = state.job.clone();
        next.plan_request = request;
        next.updated_at = Utc::now();
        self.shared.store.save_job(&next).await?;
        state.job = next;
        Ok(())
    }

    /// Plan the tree, freeze its parameters and begin dispatching.
    ///
    /// A planning or persistence failure leaves the job `Pending`.
    pub async fn start(&self, id: &str) -> Result<(), JobError> {
        let handle = self.handle(id)?;
        {
            let mut state = handle.state.lock().await;
            StateMachine::transition(state.job.status, JobEvent::Start)?;

            let fee = self.gateway().cached_fee();
            let plan = CapacityPlanner::plan(&state.job.plan_request, fee)?;

            let mut next = state.job.clone();
            next.tree_params = Some(plan.params);
            next.estimated_cost = Some(plan.estimated_cost);
            StateMachine::apply(&mut next, JobEvent::Start, None)?;
            self.shared.store.save_job(&next).await?;

            info!(
                job_id = id,
                depth = plan.params.depth,
                buffer_width = plan.params.buffer_width,
                canopy_depth = plan.params.canopy_depth,
                estimated_cost = plan.estimated_cost,
                "job started"
            );
            state.job = next;
            handle.status.send_replace(state.job.status);
        }
        self.ensure_driver(id, &handle);
        Ok(())
    }

    /// Stop dispatching at the next batch boundary.
    pub async fn pause(&self, id: &str) -> Result<(), JobError> {
        let handle = self.handle(id)?;
        self.transition(&handle, JobEvent::Pause).await?;
        info!(job_id = id, "job paused");
        Ok(())
    }

    /// Continue from the first record without a terminal outcome.
    pub async fn resume(&self, id: &str) -> Result<(), JobError> {
        let handle = self.handle(id)?;
        self.transition(&handle, JobEvent::Resume).await?;
        self.ensure_driver(id, &handle);
        info!(job_id = id, "job resumed");
        Ok(())
    }

    /// Skip every record without a terminal outcome and stop the job.
    ///
    /// Calls already in flight finish, but their outcomes are not counted.
    pub async fn cancel(&self, id: &str) -> Result<(), JobError> {
        let handle = self.handle(id)?;
        let mut state = handle.state.lock().await;
        StateMachine::transition(state.job.status, JobEvent::Cancel)?;

        let skipped = state.tracker.close_out(SkipReason::Cancelled);
        self.shared.store.append_outcomes(id, &skipped).await?;
        handle.cancel.cancel();

        let JobState { job, tracker } = &mut *state;
        let count = skipped.len();
        for outcome in skipped {
            tracker.record(job, outcome);
        }
        let finished = self.finish(id, &mut state, JobEvent::Cancel, None).await;
        if let Err(err) = finished {
            // Every item is already closed out, so the job cannot go back to
            // running; a lost snapshot write is fatal.
            let _ = StateMachine::apply(&mut state.job, JobEvent::Fatal, Some(err.to_string()));
            handle.status.send_replace(state.job.status);
            return Err(err);
        }
        handle.status.send_replace(state.job.status);
        info!(job_id = id, skipped = count, "job cancelled");
        Ok(())
    }

    /// A consistent snapshot of the job.
    pub async fn get_status(&self, id: &str) -> Result<Job, JobError> {
        let handle = self.handle(id)?;
        let state = handle.state.lock().await;
        Ok(state.job.clone())
    }

    pub async fn progress(&self, id: &str) -> Result<Progress, JobError> {
        let job = self.get_status(id).await?;
        Ok(Progress::of(&job, Utc::now()))
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        let handles: Vec<_> = self
            .jobs()
            .values()
            .cloned()
            .collect();
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            jobs.push(handle.state.lock().await.job.clone());
        }
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Resolve once the job reaches a terminal status.
    pub async fn wait(&self, id: &str) -> Result<Job, JobError> {
        let handle = self.handle(id)?;
        let mut rx = handle.status.subscribe();
        // The sender lives in the handle, which we hold.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.get_status(id).await
    }

    /// Resolve once no batch of the job is in flight.
    ///
    /// After [`Orchestrator::pause`] this means every outcome the job will
    /// produce before parking has been persisted.
    pub async fn quiesce(&self, id: &str) -> Result<Job, JobError> {
        let handle = self.handle(id)?;
        let mut rx = handle.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
        self.get_status(id).await
    }

    /// Load every stored job, rebuilding counters from persisted outcomes.
    ///
    /// A job stored as `Processing` lost its driver with the previous process
    /// and is reopened as `Paused`.
    pub async fn recover(&self) -> Result<Vec<String>, JobError> {
        let mut recovered = Vec::new();
        for id in self.shared.store.list_ids().await? {
            if self.jobs().contains_key(&id) {
                continue;
            }
            let Some(stored) = self.shared.store.load(&id).await? else {
                continue;
            };
            let mut job = stored.job;
            if stored.records.len() as u64 != job.total_items {
                warn!(job_id = %id, "stored records do not match job size, skipping");
                continue;
            }

            job.succeeded_count = 0;
            job.failed_count = 0;
            job.accrued_cost = 0;
            job.error_samples.clear();
            let mut tracker = ItemTracker::new(job.total_items);
            for outcome in stored.outcomes {
                tracker.record(&mut job, outcome);
            }

            if job.status == JobStatus::Processing {
                StateMachine::apply(&mut job, JobEvent::Pause, None)?;
                self.shared.store.save_job(&job).await?;
                info!(job_id = %id, processed = job.processed(), "interrupted job reopened as paused");
            }
            self.register(job, stored.records, tracker);
            recovered.push(id);
        }
        Ok(recovered)
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<JobHandle>>> {
        self.shared.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, id: &str) -> Result<Arc<JobHandle>, JobError> {
        self.jobs()
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn register(&self, job: Job, records: Vec<Record>, tracker: ItemTracker) {
        let (status, _) = watch::channel(job.status);
        let id = job.id.clone();
        let handle = Arc::new(JobHandle {
            records: Arc::new(records),
            state: tokio::sync::Mutex::new(JobState { job, tracker }),
            status,
            busy: watch::channel(false).0,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        });
        self.jobs().insert(id, handle);
    }

    /// Apply a status-only event, persisting before it becomes visible.
    async fn transition(&self, handle: &JobHandle, event: JobEvent) -> Result<(), JobError> {
        let mut state = handle.state.lock().await;
        let mut next = state.job.clone();
        StateMachine::apply(&mut next, event, None)?;
        self.shared.store.save_job(&next).await?;
        state.job = next;
        handle.status.send_replace(state.job.status);
        Ok(())
    }

    fn ensure_driver(&self, id: &str, handle: &Arc<JobHandle>) {
        if handle.driver_alive() {
            return;
        }
        let this = self.clone();
        let task = tokio::spawn(this.drive(id.to_string(), Arc::clone(handle)));
        *handle.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Batch loop for one job. Runs until the job is terminal.
    async fn drive(self, id: String, handle: Arc<JobHandle>) {
        loop {
            let (items, params) = {
                let mut state = handle.state.lock().await;
                let settled = self.settle(&id, &mut state).await;
                handle.status.send_replace(state.job.status);
                let batch = match settled {
                    Ok(Some(batch)) => batch,
                    Ok(None) => break,
                    Err(err) => {
                        drop(state);
                        self.fail(&handle, &id, err.to_string()).await;
                        break;
                    }
                };

                if state.job.status == JobStatus::Paused {
                    let mut rx = handle.status.subscribe();
                    drop(state);
                    debug!(job_id = %id, "parked at batch boundary");
                    let _ = rx.wait_for(|status| *status != JobStatus::Paused).await;
                    continue;
                }

                let Some(params) = state.job.tree_params else {
                    drop(state);
                    self.fail(&handle, &id, "job started without tree parameters".into())
                        .await;
                    break;
                };
                let items: Vec<PendingItem> = batch
                    .into_iter()
                    .map(|leaf_index| PendingItem {
                        leaf_index,
                        record: handle.records[leaf_index as usize].clone(),
                    })
                    .collect();
                handle.busy.send_replace(true);
                (items, params)
            };

            debug!(
                job_id = %id,
                first_leaf = items[0].leaf_index,
                size = items.len(),
                "dispatching batch"
            );

            let (tx, mut rx) = mpsc::unbounded_channel();
            let dispatcher = &self.shared.dispatcher;
            let cancel = &handle.cancel;
            let items = &items;
            let job_id = id.as_str();
            let dispatch = async move {
                dispatcher
                    .dispatch_into(job_id, items, params, &tx, cancel)
                    .await;
            };
            let reconcile = async {
                let mut fatal = None;
                while let Some(outcome) = rx.recv().await {
                    if fatal.is_some() {
                        continue;
                    }
                    if let Err(err) = self.apply_outcome(&handle, &id, outcome).await {
                        fatal = Some(err);
                    }
                }
                fatal
            };
            let ((), fatal) = tokio::join!(dispatch, reconcile);
            handle.busy.send_replace(false);

            if let Some(err) = fatal {
                self.fail(&handle, &id, err.to_string()).await;
                break;
            }
        }
        debug!(job_id = %id, "driver finished");
    }

    /// Batch-boundary bookkeeping. Returns the next batch, or `None` once the
    /// job is terminal.
    async fn settle(&self, id: &str, state: &mut JobState) -> Result<Option<Vec<u64>>, JobError> {
        if state.job.status.is_terminal() {
            return Ok(None);
        }
        let store = &self.shared.store;

        if state.job.failure_threshold_exceeded() {
            let mut message = format!(
                "{} items failed, more than the allowed {}",
                state.job.failed_count,
                state.job.options.max_failed_items.unwrap_or_default()
            );
            if let Some(sample) = state.job.error_samples.last() {
                message.push_str(&format!("; last error: {}", sample.error));
            }

            let skipped = state.tracker.close_out(SkipReason::ThresholdExceeded);
            store.append_outcomes(id, &skipped).await?;
            let JobState { job, tracker } = &mut *state;
            for outcome in skipped {
                tracker.record(job, outcome);
            }
            self.finish(id, state, JobEvent::ThresholdExceeded, Some(message))
                .await?;
            warn!(job_id = id, failed = state.job.failed_count, "job failed: failure threshold exceeded");
            return Ok(None);
        }

        let batch = state.tracker.next_batch(state.job.options.batch_size);
        if batch.is_empty() {
            self.finish(id, state, JobEvent::Finish, None).await?;
            info!(
                job_id = id,
                succeeded = state.job.succeeded_count,
                failed = state.job.failed_count,
                accrued_cost = state.job.accrued_cost,
                "job completed"
            );
            return Ok(None);
        }

        store.save_job(&state.job).await?;
        Ok(Some(batch))
    }

    /// Move the job to a terminal status, persisting before it becomes
    /// visible. On a failed write the job keeps its previous status.
    async fn finish(
        &self,
        id: &str,
        state: &mut JobState,
        event: JobEvent,
        error: Option<String>,
    ) -> Result<(), JobError> {
        let mut next = state.job.clone();
        StateMachine::apply(&mut next, event, error)?;
        if let Err(err) = self.shared.store.save_job(&next).await {
            warn!(job_id = id, "could not persist {event}: {err}");
            return Err(err.into());
        }
        state.job = next;
        Ok(())
    }

    /// Persist and count one outcome, unless its leaf is already terminal.
    async fn apply_outcome(
        &self,
        handle: &JobHandle,
        id: &str,
        outcome: Outcome,
    ) -> Result<(), JobError> {
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() || !state.tracker.accepts(&outcome) {
            debug!(job_id = id, leaf_index = outcome.leaf_index, "discarding outcome");
            return Ok(());
        }
        self.shared
            .store
            .append_outcomes(id, std::slice::from_ref(&outcome))
            .await?;
        let JobState { job, tracker } = &mut *state;
        tracker.record(job, outcome);
        Ok(())
    }

    /// Move the job to `Failed` after a job-level error.
    async fn fail(&self, handle: &JobHandle, id: &str, message: String) {
        error!(job_id = id, "job failed: {message}");
        let mut state = handle.state.lock().await;
        if state.job.status.is_terminal() {
            return;
        }
        let skipped = state.tracker.close_out(SkipReason::Aborted);
        if let Err(err) = self.shared.store.append_outcomes(id, &skipped).await {
            warn!(job_id = id, "could not persist skipped items: {err}");
        }
        let JobState { job, tracker } = &mut *state;
        for outcome in skipped {
            tracker.record(job, outcome);
        }
        if StateMachine::apply(job, JobEvent::Fatal, Some(message)).is_ok() {
            handle.status.send_replace(job.status);
            if let Err(err) = self.shared.store.save_job(job).await {
                warn!(job_id = id, "could not persist failed job: {err}");
            }
        }
        handle.cancel.cancel();
    }
}

fn validate_records(records: &[Record], target_capacity: u64) -> Result<(), JobError> {
    if records.is_empty() {
        return Err(JobError::InvalidRecords("no records to mint".into()));
    }
    if let Some(i) = records.iter().position(|r| r.name.trim().is_empty()) {
        return Err(JobError::InvalidRecords(format!("record {i} has an empty name")));
    }
    if let Some(i) = records
        .iter()
        .position(|r| r.metadata_uri.trim().is_empty())
    {
        return Err(JobError::InvalidRecords(format!(
            "record {i} has an empty metadata uri"
        )));
    }
    if records.len() as u64 > target_capacity {
        return Err(JobError::InvalidRecords(format!(
            "{} records exceed the target capacity of {target_capacity}",
            records.len()
        )));
    }
    Ok(())
}
