//! Partition receiver: the worker's consume loop.
//!
//! Every received message becomes a [`PartitionWorker`] on the bounded pool.
//! A ticker reports throughput and raises an alarm when a whole interval
//! passed without messages. Once an executor reports that the pipeline
//! ended, the receiver stops pulling messages and drains the pool.

use super::executor::{self, PartitionWorker};
use super::pool::{self, WorkerPool};
use super::runner::Runner;
use crate::execution::ExecutionEngine;
use crate::job::{self, StartJob};
use crate::queue::Consumer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

/// Default interval between throughput reports.
pub const DEFAULT_THROUGHPUT_INTERVAL: Duration = Duration::from_secs(120);

/// Errors raised by the receiver.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Job failed to decode with error: {source}")]
    Decode {
        #[source]
        source: job::Error,
    },
    #[error(transparent)]
    Pool(#[from] pool::Error),
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    #[error("Throughput interval must be greater than zero")]
    ZeroInterval,
}

/// Messages per second over `interval`.
pub fn throughput(count: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    count as f64 / secs
}

/// Consume loop bound to one topic.
pub struct PartitionReceiver {
    /// Decoded job shared by every executor.
    job: Arc<StartJob>,
    /// Topic the consumer is subscribed to.
    topic: String,
    /// Source of messages and target of acknowledgements.
    consumer: Arc<dyn Consumer>,
    /// Chain interpreter.
    engine: Arc<dyn ExecutionEngine>,
    /// Bounded pool running one executor per message.
    pool: WorkerPool,
    /// Period of the throughput report.
    interval: Duration,
}

/// Runs a worker and turns a pipeline end into a signal for the receiver.
struct Supervised {
    worker: PartitionWorker,
    ended: mpsc::UnboundedSender<()>,
}

impl Runner for Supervised {
    type Error = executor::Error;

    async fn run(self) -> Result<(), executor::Error> {
        match self.worker.run().await {
            Err(executor::Error::PipelineEnded) => {
                let _ = self.ended.send(());
                Ok(())
            }
            other => other,
        }
    }
}

impl Runner for PartitionReceiver {
    type Error = Error;

    #[tracing::instrument(skip(self), fields(topic = %self.topic, job_id = %self.job.job_id))]
    async fn run(self) -> Result<(), Error> {
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        let mut processed: u64 = 0;

        info!("Receiving messages from topic {}", self.topic);
        loop {
            tokio::select! {
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        processed += 1;
                        let offset = message.offset;
                        let worker = PartitionWorker::new(
                            Arc::clone(&self.job),
                            message,
                            Arc::clone(&self.consumer),
                            Arc::clone(&self.engine),
                        );
                        let task = Supervised { worker, ended: ended_tx.clone() };
                        if let Err(e) = self.pool.dispatch("Message execution", task) {
                            error!("Failed to dispatch message at offset {}: {}", offset, e);
                        }
                    }
                    Err(e) => error!("Failed to receive message on topic {}: {}", self.topic, e),
                },
                _ = ticker.tick() => {
                    let rate = throughput(processed, self.interval);
                    info!("Throughput on topic {}: {:.3} msg/s", self.topic, rate);
                    if processed == 0 {
                        warn!(
                            alarm = true,
                            "No messages on topic {} for {} seconds",
                            self.topic,
                            self.interval.as_secs()
                        );
                    }
                    processed = 0;
                }
                Some(()) = ended_rx.recv() => {
                    info!("Stream processing ended on topic {}, no longer consuming", self.topic);
                    break;
                }
            }
        }

        self.pool.shutdown().await?;
        Ok(())
    }
}

/// Builder for [`PartitionReceiver`].
#[derive(Default)]
pub struct PartitionReceiverBuilder {
    job: Option<StartJob>,
    topic: Option<String>,
    consumer: Option<Arc<dyn Consumer>>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    threads: Option<usize>,
    capacity: Option<usize>,
    interval: Option<Duration>,
}

impl PartitionReceiverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(mut self, job: StartJob) -> Self {
        self.job = Some(job);
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn Consumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Decodes the job and starts the worker pool. Must be called within a Tokio runtime.
    pub fn build(self) -> Result<PartitionReceiver, Error> {
        let interval = self.interval.unwrap_or(DEFAULT_THROUGHPUT_INTERVAL);
        if interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        let job = self
            .job
            .ok_or_else(|| Error::MissingRequiredAttribute("job".to_string()))?
            .decode()
            .map_err(|source| Error::Decode { source })?;
        let consumer = self
            .consumer
            .ok_or_else(|| Error::MissingRequiredAttribute("consumer".to_string()))?;
        let engine = self
            .engine
            .ok_or_else(|| Error::MissingRequiredAttribute("engine".to_string()))?;

        let topic = self
            .topic
            .ok_or_else(|| Error::MissingRequiredAttribute("topic".to_string()))?;

        let pool = pool::WorkerPoolBuilder::new()
            .threads(self.threads.unwrap_or(pool::DEFAULT_THREADS))
            .capacity(self.capacity.unwrap_or(pool::DEFAULT_CAPACITY))
            .start()?;

        Ok(PartitionReceiver {
            job: Arc::new(job),
            topic,
            consumer,
            engine,
            pool,
            interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::task::fakes::{message, start_job, FakeConsumer, ScriptedEngine};

    fn receiver(consumer: Arc<FakeConsumer>, threads: usize) -> PartitionReceiver {
        PartitionReceiverBuilder::new()
            .job(start_job())
            .topic("clicks")
            .consumer(consumer)
            .engine(Arc::new(ScriptedEngine))
            .threads(threads)
            .capacity(16)
            .interval(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    async fn wait_for_acks(consumer: &FakeConsumer, count: usize) -> Vec<i64> {
        for _ in 0..100 {
            let acks = consumer.acks();
            if acks.len() >= count {
                return acks;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        consumer.acks()
    }

    #[tokio::test]
    async fn test_acknowledges_on_completion_out_of_order() {
        let consumer = Arc::new(FakeConsumer::new(vec![
            Ok(message(0, "slow")),
            Ok(message(1, "fast")),
        ]));
        let handle = tokio::spawn(receiver(consumer.clone(), 2).run());

        assert_eq!(wait_for_acks(&consumer, 2).await, vec![1, 0]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_failed_message_is_skipped_and_loop_continues() {
        let consumer = Arc::new(FakeConsumer::new(vec![
            Ok(message(0, "fail")),
            Err(queue::Error::Receive("broker hiccup".to_string())),
            Ok(message(2, "ok")),
        ]));
        let handle = tokio::spawn(receiver(consumer.clone(), 1).run());

        assert_eq!(wait_for_acks(&consumer, 1).await, vec![2]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_pipeline_end_stops_consumption() {
        let consumer = Arc::new(FakeConsumer::new(vec![
            Ok(message(0, "ok")),
            Ok(message(1, "end")),
        ]));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            receiver(consumer.clone(), 1).run(),
        )
        .await
        .expect("receiver should stop after the pipeline ended");

        assert!(result.is_ok());
        assert_eq!(consumer.acks(), vec![0]);
    }

    #[tokio::test]
    async fn test_idle_ticks_keep_running() {
        let consumer = Arc::new(FakeConsumer::new(vec![]));
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            receiver(consumer, 1).run(),
        )
        .await;
        assert!(result.is_err(), "receiver must keep waiting for messages");
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(240, Duration::from_secs(120)), 2.0);
        assert_eq!(throughput(0, Duration::from_secs(120)), 0.0);
        assert_eq!(throughput(5, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn test_builder_requires_consumer() {
        let result = PartitionReceiverBuilder::new()
            .job(start_job())
            .topic("clicks")
            .engine(Arc::new(ScriptedEngine))
            .build();
        assert!(matches!(
            result,
            Err(Error::MissingRequiredAttribute(attr)) if attr == "consumer"
        ));
    }

    #[tokio::test]
    async fn test_builder_requires_topic() {
        let result = PartitionReceiverBuilder::new()
            .job(start_job())
            .consumer(Arc::new(FakeConsumer::new(vec![])))
            .engine(Arc::new(ScriptedEngine))
            .build();
        assert!(matches!(
            result,
            Err(Error::MissingRequiredAttribute(attr)) if attr == "topic"
        ));
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_interval() {
        let result = PartitionReceiverBuilder::new()
            .job(start_job())
            .topic("clicks")
            .consumer(Arc::new(FakeConsumer::new(vec![])))
            .engine(Arc::new(ScriptedEngine))
            .interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::ZeroInterval)));
    }
}
