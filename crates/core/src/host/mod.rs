//! Cluster orchestrator port.
//!
//! Launches and tears down the fleet of worker processes serving a job.
//! Instances are addressed hierarchically so a whole job can be removed by
//! its group name.

use crate::job::StartJob;
use async_trait::async_trait;

pub mod k8s;

/// Path segment grouping every stream job.
pub const JOBS_SEGMENT: &str = "dpe-stream-jobs";

/// Classification callers branch on.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ErrorKind {
    /// The addressed job group does not exist.
    NotFound,
    /// The scheduler could not be reached or was overloaded.
    Transient,
    /// The scheduler rejected the request.
    Fatal,
}

/// Orchestrator failure. Displays as the bare scheduler message.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Launches and stops job fleets.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Starts `job.instances` workers, each receiving the whole job.
    async fn start_job(&self, job: &StartJob) -> Result<(), Error>;

    /// Removes every worker of the job.
    async fn stop_job(&self, account_id: &str, job_id: &str) -> Result<(), Error>;
}

/// Hierarchical instance naming: `/{group}/{env}/dpe-stream-jobs/{account}/{job}/worker-{i}`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct InstanceNaming {
    pub group: String,
    pub env: String,
}

impl InstanceNaming {
    pub fn new(group: &str, env: &str) -> Self {
        InstanceNaming {
            group: group.to_string(),
            env: env.to_string(),
        }
    }

    pub fn group_name(&self, account_id: &str, job_id: &str) -> String {
        format!(
            "/{}/{}/{}/{}/{}",
            self.group, self.env, JOBS_SEGMENT, account_id, job_id
        )
    }

    pub fn instance_name(&self, account_id: &str, job_id: &str, index: u32) -> String {
        format!("{}/worker-{}", self.group_name(account_id, job_id), index)
    }

    /// Every instance name of `job`, in index order.
    pub fn instance_names(&self, job: &StartJob) -> Vec<String> {
        (0..job.instances)
            .map(|index| self.instance_name(&job.account_id, &job.job_id, index))
            .collect()
    }
}
