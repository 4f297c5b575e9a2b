//! Worker command: boots the partition receiver for the job in the environment.

use crate::config::{AppConfig, WorkerOptions};
use dpe_stream_core::codec;
use dpe_stream_core::event::EventsProducer;
use dpe_stream_core::execution::{self, engine::RhaiEngine};
use dpe_stream_core::job::{self, SourceKind, StartJob, WORKER_JOB_ENV};
use dpe_stream_core::queue::{Consumer, Producer};
use dpe_stream_core::source::{self, KafkaConnection};
use dpe_stream_core::task::receiver::{self, PartitionReceiverBuilder};
use dpe_stream_core::task::runner::Runner;
use dpe_stream_http::server::{self, HttpServerBuilder};
use dpe_stream_kafka::client::{self as kafka, Builder as KafkaClientBuilder};
use dpe_stream_kafka::consumer::{group_id, KafkaConsumer};
use dpe_stream_kafka::producer::KafkaProducer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Environment variable DPE_STREAM_WORKER_JOB is not set")]
    MissingJob,
    #[error("Worker job could not be decoded: {source}")]
    Codec {
        #[source]
        source: codec::Error,
    },
    #[error("Worker job is invalid: {source}")]
    Job {
        #[source]
        source: job::Error,
    },
    #[error(transparent)]
    Source(#[from] source::Error),
    #[error(transparent)]
    Kafka(#[from] kafka::Error),
    #[error(transparent)]
    Execution(#[from] execution::Error),
    #[error(transparent)]
    Receiver(#[from] receiver::Error),
    #[error(transparent)]
    Server(#[from] server::Error),
}

/// Handle of the background receiver task.
pub type ReceiverHandle = JoinHandle<Result<(), receiver::Error>>;

/// Starts the receiver and keeps the health endpoint up, even after the
/// pipeline ended.
#[tracing::instrument(skip_all, name = "worker")]
pub async fn run(config: AppConfig) -> Result<(), Error> {
    let encoded = std::env::var(WORKER_JOB_ENV).map_err(|_| Error::MissingJob)?;
    let job = job_from_encoded(&encoded)?;
    let handle = start(job, &config.worker).await?;

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => info!("Partition receiver finished"),
            Ok(Err(e)) => error!("Partition receiver failed: {}", e),
            Err(e) => error!("Partition receiver task failed: {}", e),
        }
    });

    HttpServerBuilder::new()
        .port(config.http_server.port)
        .build()
        .run()
        .await?;
    Ok(())
}

/// Decodes, validates and prepares the job handed over by the master.
pub fn job_from_encoded(encoded: &str) -> Result<StartJob, Error> {
    let job: StartJob = codec::decode_job(encoded).map_err(|source| Error::Codec { source })?;
    job.validate().map_err(|source| Error::Job { source })?;
    job.decode().map_err(|source| Error::Job { source })
}

/// Connects the source adapter and spawns the receiver, returning immediately.
pub async fn start(job: StartJob, options: &WorkerOptions) -> Result<ReceiverHandle, Error> {
    match job.source.kind() {
        Some(SourceKind::Kafka) => {
            let connection = KafkaConnection::try_from(&job.source.connection)?;
            let client = KafkaClientBuilder::new()
                .brokers(connection.brokers.clone())
                .build()?
                .connect()
                .await?;
            let output_client = match &options.output_brokers {
                Some(brokers) => KafkaClientBuilder::new().brokers(brokers.clone()).build()?,
                None => client.clone(),
            };

            let group = group_id(&connection.topic, &job.account_id);
            let consumer = KafkaConsumer::subscribe(&client, &connection.topic, &group)?;
            let producer = KafkaProducer::new(&output_client, &options.output_topic)?;
            spawn_receiver(
                job,
                &connection.topic,
                Arc::new(consumer),
                Arc::new(producer),
                options,
            )
        }
        None => Err(Error::Source(source::Error::UnsupportedSource(job.source.name))),
    }
}

/// Builds the engine and receiver over the given queue handles and spawns it.
pub fn spawn_receiver(
    job: StartJob,
    topic: &str,
    consumer: Arc<dyn Consumer>,
    producer: Arc<dyn Producer>,
    options: &WorkerOptions,
) -> Result<ReceiverHandle, Error> {
    let engine = RhaiEngine::new(&job, EventsProducer::new(producer))?;
    let receiver = PartitionReceiverBuilder::new()
        .job(job)
        .topic(topic)
        .consumer(consumer)
        .engine(Arc::new(engine))
        .threads(options.threads)
        .capacity(options.queue_capacity)
        .interval(Duration::from_secs(options.throughput_interval_secs))
        .build()?;
    Ok(tokio::spawn(receiver.run()))
}
