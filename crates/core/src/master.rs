//! Master service: starts and stops stream jobs.
//!
//! Starting a job is a small saga. The job record is written first, the
//! fleet is sized and launched next, and every failure after the record
//! exists leaves it in `FAILED_TO_START`. A failed launch also stops
//! whatever part of the fleet already came up.

use crate::host::{self, Cluster};
use crate::job::{self, StartJob, StreamJob};
use crate::source::{self, SourceResolver};
use crate::store::{self, JobData, JobStatus, JobStore, JobUpdate};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Errors returned by the master service.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Account id is missing")]
    MissingAccountId,
    #[error("Job id is missing")]
    MissingJobId,
    #[error(transparent)]
    Validation(#[from] job::Error),
    #[error(transparent)]
    Resolution(#[from] source::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Cluster(#[from] host::Error),
}

impl Error {
    /// Errors caused by the request rather than by a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MissingAccountId | Error::MissingJobId | Error::Validation(_)
        )
    }
}

/// Coordinates the job store, source resolver and orchestrator.
#[derive(Clone)]
pub struct StreamService {
    /// Orchestrator launching worker fleets.
    cluster: Arc<dyn Cluster>,
    /// Persistent job records.
    store: Arc<dyn JobStore>,
    /// Sizes the fleet from the source.
    resolver: SourceResolver,
}

impl StreamService {
    /// Validates, records and launches `job`, returning its id.
    #[tracing::instrument(skip(self, job), fields(invocation_id = %job.invocation_id))]
    pub async fn start_job(&self, account_id: &str, job: StreamJob) -> Result<String, Error> {
        if account_id.trim().is_empty() {
            return Err(Error::MissingAccountId);
        }
        job.validate()?;

        let job_id = uuid::Uuid::new_v4().to_string();
        self.store
            .add_job(&JobData::started(account_id, &job_id, &job))
            .await?;

        let instances = match self.resolver.worker_count(&job.source).await {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to resolve source for job {}: {}", job_id, e);
                self.record_failure(account_id, &job_id, JobStatus::FailedToStart, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let start_job = StartJob::new(account_id, &job_id, instances, job);
        if let Err(e) = self.cluster.start_job(&start_job).await {
            error!("Failed to launch job {}: {}", job_id, e);
            self.rollback_launch(account_id, &job_id).await;
            self.record_failure(account_id, &job_id, JobStatus::FailedToStart, &e.to_string())
                .await;
            return Err(e.into());
        }

        info!("Started job {} with {} workers", job_id, instances);
        Ok(job_id)
    }

    /// Stops the fleet of a job and removes its record.
    #[tracing::instrument(skip(self))]
    pub async fn stop_job(&self, account_id: &str, job_id: &str) -> Result<(), Error> {
        if account_id.trim().is_empty() {
            return Err(Error::MissingAccountId);
        }
        if job_id.trim().is_empty() {
            return Err(Error::MissingJobId);
        }

        match self.cluster.stop_job(account_id, job_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("Workers of job {} already gone: {}", job_id, e);
            }
            Err(e) => {
                error!("Failed to stop job {}: {}", job_id, e);
                self.record_failure(account_id, job_id, JobStatus::FailedToStop, &e.to_string())
                    .await;
                return Err(e.into());
            }
        }

        match self.store.delete_job(account_id, job_id).await {
            Ok(()) | Err(store::Error::NotFound(_)) => {
                info!("Stopped job {}", job_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of instances launched before a failure.
    async fn rollback_launch(&self, account_id: &str, job_id: &str) {
        match self.cluster.stop_job(account_id, job_id).await {
            Ok(()) => info!("Rolled back partially launched job {}", job_id),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to roll back job {}: {}", job_id, e),
        }
    }

    async fn record_failure(&self, account_id: &str, job_id: &str, status: JobStatus, descr: &str) {
        let update = JobUpdate {
            status,
            error_descr: descr.to_string(),
        };
        if let Err(e) = self.store.update_job(account_id, job_id, &update).await {
            error!("Failed to record {:?} for job {}: {}", status, job_id, e);
        }
    }
}

/// Builder for [`StreamService`].
#[derive(Default)]
pub struct StreamServiceBuilder {
    cluster: Option<Arc<dyn Cluster>>,
    store: Option<Arc<dyn JobStore>>,
    resolver: Option<SourceResolver>,
}

/// Error returned when a builder attribute is missing.
#[derive(thiserror::Error, Debug)]
#[error("Missing required attribute: {0}")]
pub struct MissingRequiredAttribute(pub String);

impl StreamServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: SourceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<StreamService, MissingRequiredAttribute> {
        Ok(StreamService {
            cluster: self
                .cluster
                .ok_or_else(|| MissingRequiredAttribute("cluster".to_string()))?,
            store: self
                .store
                .ok_or_else(|| MissingRequiredAttribute("store".to_string()))?,
            resolver: self
                .resolver
                .ok_or_else(|| MissingRequiredAttribute("resolver".to_string()))?,
        })
    }
}
