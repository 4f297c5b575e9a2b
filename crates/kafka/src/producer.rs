//! Output event producer.

use crate::client::{Client, Error};
use async_trait::async_trait;
use dpe_stream_core::queue::{self, Producer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default delivery timeout.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka implementation of [`Producer`] bound to one topic.
#[derive(Clone)]
pub struct KafkaProducer {
    /// rdkafka producer.
    producer: FutureProducer,
    /// Output topic.
    topic: String,
    /// Delivery timeout.
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(client: &Client, topic: &str) -> Result<Self, Error> {
        let producer: FutureProducer = client
            .config()
            .set("message.timeout.ms", DEFAULT_SEND_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|source| Error::Kafka { source })?;
        Ok(KafkaProducer {
            producer,
            topic: topic.to_string(),
            timeout: DEFAULT_SEND_TIMEOUT,
        })
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), queue::Error> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| queue::Error::Publish {
                topic: self.topic.clone(),
                message: e.to_string(),
            })
    }
}
