//! Persistent job records.

use crate::job::{Function, Source, StreamJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Errors reported by job stores.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Job {0} not found")]
    NotFound(String),
    #[error("Job store request failed: {0}")]
    Request(String),
    #[error("Job store responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Lifecycle status of a job record.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    FailedToStart,
    FailedToStop,
}

/// Persisted view of a job.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub id: String,
    pub account_id: String,
    pub invocation_id: String,
    pub memory: u32,
    pub source: Source,
    pub functions: Vec<Function>,
    pub status: JobStatus,
    #[serde(default)]
    pub error_descr: String,
    #[serde(default)]
    pub description: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl JobData {
    /// Record of a job that is about to be launched.
    pub fn started(account_id: &str, job_id: &str, job: &StreamJob) -> Self {
        let now = Utc::now();
        JobData {
            id: job_id.to_string(),
            account_id: account_id.to_string(),
            invocation_id: job.invocation_id.clone(),
            memory: job.memory,
            source: job.source.clone(),
            functions: job.functions.clone(),
            status: JobStatus::Started,
            error_descr: String::new(),
            description: job.description.clone(),
            created_on: now,
            updated_on: now,
        }
    }
}

/// Status transition written by the master.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: JobStatus,
    pub error_descr: String,
}

/// Job store collaborator.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn add_job(&self, job: &JobData) -> Result<(), Error>;

    async fn update_job(&self, account_id: &str, job_id: &str, update: &JobUpdate) -> Result<(), Error>;

    async fn delete_job(&self, account_id: &str, job_id: &str) -> Result<(), Error>;
}

/// Process local store for standalone runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    /// Records keyed by account and job id.
    jobs: Mutex<HashMap<(String, String), JobData>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &str, job_id: &str) -> Option<JobData> {
        self.jobs
            .lock()
            .ok()?
            .get(&(account_id.to_string(), job_id.to_string()))
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<JobData> {
        self.jobs
            .lock()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), JobData>>, Error> {
        self.jobs
            .lock()
            .map_err(|e| Error::Request(format!("Job store lock poisoned: {e}")))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: &JobData) -> Result<(), Error> {
        self.lock()?
            .insert((job.account_id.clone(), job.id.clone()), job.clone());
        Ok(())
    }

    async fn update_job(&self, account_id: &str, job_id: &str, update: &JobUpdate) -> Result<(), Error> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(&(account_id.to_string(), job_id.to_string()))
            .ok_or_else(|| Error::NotFound(job_id.to_string()))?;
        job.status = update.status;
        job.error_descr = update.error_descr.clone();
        job.updated_on = Utc::now();
        Ok(())
    }

    async fn delete_job(&self, account_id: &str, job_id: &str) -> Result<(), Error> {
        self.lock()?
            .remove(&(account_id.to_string(), job_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(job_id.to_string()))
    }
}
