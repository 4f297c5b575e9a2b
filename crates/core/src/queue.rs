//! Message-queue collaborator contracts.
//!
//! Workers consume a partitioned topic with explicit acknowledgement and
//! publish output events. The master only needs partition counts.

use async_trait::async_trait;

/// Errors surfaced by queue adapters.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to connect to message queue: {0}")]
    Connection(String),
    #[error("Failed to fetch metadata for topic {topic}: {message}")]
    Metadata { topic: String, message: String },
    #[error("Failed to receive message: {0}")]
    Receive(String),
    #[error("Failed to acknowledge offset {offset} on partition {partition}: {message}")]
    Ack {
        partition: i32,
        offset: i64,
        message: String,
    },
    #[error("Failed to publish message to {topic}: {message}")]
    Publish { topic: String, message: String },
}

/// A message taken from a partition.
#[derive(PartialEq, Clone, Debug)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Reports how many partitions a topic has.
#[async_trait]
pub trait Partitions: Send + Sync {
    async fn partition_count(&self, brokers: &[String], topic: &str) -> Result<usize, Error>;
}

/// Consumer bound to one topic with explicit acknowledgement.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Waits for the next message.
    async fn recv(&self) -> Result<QueueMessage, Error>;

    /// Marks `message` as processed.
    async fn ack(&self, message: &QueueMessage) -> Result<(), Error>;
}

/// Fire-and-forget publisher bound to one topic.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), Error>;
}
