//! Per-message executor.

use super::runner::Runner;
use crate::execution::{self, ExecutionEngine, Flow};
use crate::job::StartJob;
use crate::queue::{self, Consumer, QueueMessage};
use std::sync::Arc;
use tracing::{debug, error};

/// Errors that end the processing of a single message.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Message execution failed with error: {source}")]
    Execution {
        #[source]
        source: execution::Error,
    },
    #[error("Streaming processing ended, should be shutting down worker")]
    PipelineEnded,
    #[error("Message acknowledgement failed with error: {source}")]
    Ack {
        #[source]
        source: queue::Error,
    },
}

/// Runs the job's chain over one message and acknowledges it on success.
pub struct PartitionWorker {
    /// Decoded job.
    job: Arc<StartJob>,
    /// Message to process.
    message: QueueMessage,
    /// Consumer the message is acknowledged on.
    consumer: Arc<dyn Consumer>,
    /// Chain interpreter.
    engine: Arc<dyn ExecutionEngine>,
}

impl PartitionWorker {
    pub fn new(
        job: Arc<StartJob>,
        message: QueueMessage,
        consumer: Arc<dyn Consumer>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        PartitionWorker {
            job,
            message,
            consumer,
            engine,
        }
    }
}

impl Runner for PartitionWorker {
    type Error = Error;

    async fn run(self) -> Result<(), Error> {
        let flow = self
            .engine
            .execute(&self.message.payload, &self.job)
            .await
            .map_err(|source| {
                error!(
                    "Failed to execute job {} on offset {}: {}",
                    self.job.job_id, self.message.offset, source
                );
                Error::Execution { source }
            })?;

        if flow == Flow::Terminate {
            return Err(Error::PipelineEnded);
        }

        self.consumer
            .ack(&self.message)
            .await
            .map_err(|source| Error::Ack { source })?;
        debug!(
            "Acknowledged offset {} on partition {}",
            self.message.offset, self.message.partition
        );
        Ok(())
    }
}
