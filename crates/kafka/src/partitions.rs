//! Partition counts for the source resolver.

use crate::client::DEFAULT_METADATA_TIMEOUT;
use async_trait::async_trait;
use dpe_stream_core::queue::{Error, Partitions};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use std::time::Duration;
use tracing::debug;

/// Reads partition counts from topic metadata.
#[derive(Clone, Debug)]
pub struct KafkaPartitions {
    /// Metadata request timeout.
    timeout: Duration,
}

impl Default for KafkaPartitions {
    fn default() -> Self {
        KafkaPartitions {
            timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }
}

impl KafkaPartitions {
    pub fn new(timeout: Duration) -> Self {
        KafkaPartitions { timeout }
    }
}

#[async_trait]
impl Partitions for KafkaPartitions {
    async fn partition_count(&self, brokers: &[String], topic: &str) -> Result<usize, Error> {
        let servers = brokers.join(",");
        let topic = topic.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let metadata_error = |message: String| Error::Metadata {
                topic: topic.clone(),
                message,
            };
            debug!("Fetching metadata of topic {} from {}", topic, servers);

            let consumer: BaseConsumer = ClientConfig::new()
                .set("bootstrap.servers", &servers)
                .create()
                .map_err(|e| Error::Connection(e.to_string()))?;
            let metadata = consumer
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| metadata_error(e.to_string()))?;
            let entry = metadata
                .topics()
                .iter()
                .find(|entry| entry.name() == topic)
                .ok_or_else(|| metadata_error("topic not found".to_string()))?;
            if let Some(err) = entry.error() {
                return Err(metadata_error(format!("{err:?}")));
            }
            Ok(entry.partitions().len())
        })
        .await
        .map_err(|e| Error::Connection(e.to_string()))?
    }
}
