//! Output events published after every executed message.

use crate::job::StartJob;
use crate::queue::Producer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Default topic output events are published to.
pub const DEFAULT_OUTPUT_TOPIC: &str = "dpe-stream-output";

/// Default log message for published events.
pub const DEFAULT_LOG_MESSAGE: &str = "Output event published";

/// Errors that can occur while publishing output events.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("JSON serialization failed with error: {source}")]
    SerdeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("Publishing output event failed with error: {source}")]
    Publish {
        #[source]
        source: crate::queue::Error,
    },
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// Result of running a chain over one message.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub account_id: String,
    pub job_id: String,
    pub invocation_id: String,
    pub stdout: String,
    pub stderr: String,
    pub result: String,
}

/// Builder for [`OutputEvent`].
#[derive(Default, Debug)]
pub struct OutputEventBuilder {
    account_id: Option<String>,
    job_id: Option<String>,
    invocation_id: Option<String>,
    stdout: String,
    stderr: String,
    result: String,
}

impl OutputEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the identifiers of `job`.
    pub fn job(mut self, job: &StartJob) -> Self {
        self.account_id = Some(job.account_id.clone());
        self.job_id = Some(job.job_id.clone());
        self.invocation_id = Some(job.invocation_id.clone());
        self
    }
    pub fn stdout(mut self, stdout: String) -> Self {
        self.stdout = stdout;
        self
    }
    pub fn stderr(mut self, stderr: String) -> Self {
        self.stderr = stderr;
        self
    }
    pub fn result(mut self, result: String) -> Self {
        self.result = result;
        self
    }

    pub fn build(self) -> Result<OutputEvent, Error> {
        Ok(OutputEvent {
            account_id: self
                .account_id
                .ok_or_else(|| Error::MissingRequiredAttribute("account_id".to_string()))?,
            job_id: self
                .job_id
                .ok_or_else(|| Error::MissingRequiredAttribute("job_id".to_string()))?,
            invocation_id: self
                .invocation_id
                .ok_or_else(|| Error::MissingRequiredAttribute("invocation_id".to_string()))?,
            stdout: self.stdout,
            stderr: self.stderr,
            result: self.result,
        })
    }
}

/// Publishes [`OutputEvent`]s as JSON, keyed by job id.
#[derive(Clone)]
pub struct EventsProducer {
    /// Queue the events are written to.
    producer: Arc<dyn Producer>,
}

impl EventsProducer {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        EventsProducer { producer }
    }

    pub async fn publish(&self, event: &OutputEvent) -> Result<(), Error> {
        let payload = serde_json::to_vec(event).map_err(|source| Error::SerdeJson { source })?;
        self.producer
            .send(&event.job_id, payload)
            .await
            .map_err(|source| Error::Publish { source })?;
        debug!("{}: {}", DEFAULT_LOG_MESSAGE, event.job_id);
        Ok(())
    }
}
