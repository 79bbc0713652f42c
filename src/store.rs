//! Durable job state.
//!
//! The orchestrator writes the job snapshot, its records and every terminal
//! outcome through a [`JobStore`] before the change becomes visible to
//! callers, so a restarted process can rebuild exactly which records remain.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StoreError;
use crate::state_machine::{Job, Outcome, Record};

const JOB_FILE: &str = "job.json";
const RECORDS_FILE: &str = "records.json";
const OUTCOMES_FILE: &str = "outcomes.jsonl";

/// Everything persisted for one job.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job: Job,
    pub records: Vec<Record>,
    pub outcomes: Vec<Outcome>,
}

pub trait JobStore: Send + Sync + 'static {
    fn save_job(&self, job: &Job) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn save_records(
        &self,
        job_id: &str,
        records: &[Record],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn append_outcomes(
        &self,
        job_id: &str,
        outcomes: &[Outcome],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn load(&self, job_id: &str)
    -> impl Future<Output = Result<Option<StoredJob>, StoreError>> + Send;

    fn list_ids(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

/// One directory per job under `root`.
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Write via a temp file and rename so readers never see a torn file.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl JobStore for FileJobStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let dir = self.job_dir(&job.id);
        fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(job)?;
        self.write_atomic(&dir.join(JOB_FILE), &bytes).await
    }

    async fn save_records(&self, job_id: &str, records: &[Record]) -> Result<(), StoreError> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec(records)?;
        self.write_atomic(&dir.join(RECORDS_FILE), &bytes).await
    }

    async fn append_outcomes(&self, job_id: &str, outcomes: &[Outcome]) -> Result<(), StoreError> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let mut lines = Vec::new();
        for outcome in outcomes {
            serde_json::to_writer(&mut lines, outcome)?;
            lines.push(b'\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.job_dir(job_id).join(OUTCOMES_FILE))
            .await?;
        file.write_all(&lines).await?;
        file.sync_data().await?;
        debug!(job_id, count = outcomes.len(), "persisted outcomes");
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<StoredJob>, StoreError> {
        let dir = self.job_dir(job_id);
        let job_bytes = match fs::read(dir.join(JOB_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let job: Job = serde_json::from_slice(&job_bytes)?;
        let records: Vec<Record> = serde_json::from_slice(&fs::read(dir.join(RECORDS_FILE)).await?)?;

        let outcomes = match fs::read_to_string(dir.join(OUTCOMES_FILE)).await {
            Ok(text) => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str::<Outcome>)
                .collect::<Result<Vec<Outcome>, _>>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(StoredJob {
            job,
            records,
            outcomes,
        }))
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && fs::try_exists(entry.path().join(JOB_FILE)).await?
            {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-process store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut HashMap<String, StoredJob>) -> R) -> R {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut jobs)
    }
}

impl JobStore for MemoryJobStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.with_jobs(|jobs| {
            jobs.entry(job.id.clone())
                .and_modify(|stored| stored.job = job.clone())
                .or_insert_with(|| StoredJob {
                    job: job.clone(),
                    records: Vec::new(),
                    outcomes: Vec::new(),
                });
        });
        Ok(())
    }

    async fn save_records(&self, job_id: &str, records: &[Record]) -> Result<(), StoreError> {
        self.with_jobs(|jobs| match jobs.get_mut(job_id) {
            Some(stored) => {
                stored.records = records.to_vec();
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("unknown job {job_id}"))),
        })
    }

    async fn append_outcomes(&self, job_id: &str, outcomes: &[Outcome]) -> Result<(), StoreError> {
        self.with_jobs(|jobs| match jobs.get_mut(job_id) {
            Some(stored) => {
                stored.outcomes.extend_from_slice(outcomes);
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!("unknown job {job_id}"))),
        })
    }

    async fn load(&self, job_id: &str) -> Result<Option<StoredJob>, StoreError> {
        Ok(self.with_jobs(|jobs| jobs.get(job_id).cloned()))
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = self.with_jobs(|jobs| jobs.keys().cloned().collect::<Vec<_>>());
        ids.sort();
        Ok(ids)
    }
}
