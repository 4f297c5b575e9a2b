//! Group consumer with explicit acknowledgement.
//!
//! Offsets are only stored when a message is acknowledged; librdkafka's
//! periodic commit then persists the highest stored offset per partition.

use crate::client::{Client, Error};
use async_trait::async_trait;
use dpe_stream_core::queue::{self, Consumer, QueueMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::Message;
use tracing::info;

/// Consumer group shared by the workers of one job.
pub fn group_id(topic: &str, account_id: &str) -> String {
    format!("{topic}_{account_id}")
}

fn consumer_config(client: &Client, group_id: &str) -> ClientConfig {
    let mut config = client.config();
    config
        .set("group.id", group_id)
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest");
    config
}

/// Kafka implementation of [`Consumer`].
pub struct KafkaConsumer {
    /// rdkafka consumer joined to the job group.
    consumer: StreamConsumer,
    /// Subscribed topic.
    topic: String,
}

impl KafkaConsumer {
    /// Joins `group_id` and subscribes to `topic`.
    pub fn subscribe(client: &Client, topic: &str, group_id: &str) -> Result<Self, Error> {
        let consumer: StreamConsumer = consumer_config(client, group_id)
            .create()
            .map_err(|source| Error::Kafka { source })?;
        consumer
            .subscribe(&[topic])
            .map_err(|source| Error::Kafka { source })?;
        info!("Subscribed to topic {} in group {}", topic, group_id);
        Ok(KafkaConsumer {
            consumer,
            topic: topic.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn recv(&self) -> Result<QueueMessage, queue::Error> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| queue::Error::Receive(e.to_string()))?;
        Ok(QueueMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), queue::Error> {
        // The stored offset is the next one to read.
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)
            .map_err(|e| queue::Error::Ack {
                partition: message.partition,
                offset: message.offset,
                message: e.to_string(),
            })
    }
}
