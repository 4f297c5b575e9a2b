//! Source resolution: parses connection descriptions and sizes the worker fleet.

use crate::job::{Source, SourceKind};
use crate::queue::Partitions;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Errors raised while resolving a source.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Source not supported: {0}")]
    UnsupportedSource(String),
    #[error("invalid kafka {0} description")]
    InvalidField(&'static str),
    #[error("Topic {0} has no partitions")]
    NoPartitions(String),
    #[error("Topic {topic} has {count} partitions, more workers than can be launched")]
    TooManyPartitions { topic: String, count: usize },
    #[error(transparent)]
    Queue(#[from] crate::queue::Error),
}

/// Parsed connection to a partitioned Kafka topic.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct KafkaConnection {
    pub topic: String,
    pub brokers: Vec<String>,
    pub coordinators: Vec<String>,
}

impl TryFrom<&Map<String, Value>> for KafkaConnection {
    type Error = Error;

    fn try_from(connection: &Map<String, Value>) -> Result<Self, Self::Error> {
        let topic = match field(connection, &["topic"]) {
            Some(Value::String(topic)) if !topic.trim().is_empty() => topic.trim().to_string(),
            _ => return Err(Error::InvalidField("topic")),
        };
        let brokers = list(connection, &["brokers"]).ok_or(Error::InvalidField("brokers"))?;
        let coordinators = list(connection, &["coordinators", "zk"])
            .ok_or(Error::InvalidField("coordinators"))?;

        Ok(KafkaConnection {
            topic,
            brokers,
            coordinators,
        })
    }
}

/// Looks a key up case-insensitively, trying every alias in order.
fn field<'a>(connection: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        connection
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(alias))
            .map(|(_, value)| value)
    })
}

/// Reads a non-empty list given either as a comma separated string or an array of strings.
fn list(connection: &Map<String, Value>, aliases: &[&str]) -> Option<Vec<String>> {
    let items: Vec<String> = match field(connection, aliases)? {
        Value::String(joined) => joined.split(',').map(|s| s.trim().to_string()).collect(),
        Value::Array(values) => values
            .iter()
            .map(|value| value.as_str().map(|s| s.trim().to_string()))
            .collect::<Option<_>>()?,
        _ => return None,
    };
    if items.is_empty() || items.iter().any(String::is_empty) {
        return None;
    }
    Some(items)
}

/// Computes how many workers a source needs.
#[derive(Clone)]
pub struct SourceResolver {
    /// Partition metadata lookup.
    partitions: Arc<dyn Partitions>,
}

impl SourceResolver {
    pub fn new(partitions: Arc<dyn Partitions>) -> Self {
        SourceResolver { partitions }
    }

    /// One worker per partition.
    pub async fn worker_count(&self, source: &Source) -> Result<u32, Error> {
        match source.kind() {
            Some(SourceKind::Kafka) => {
                let connection = KafkaConnection::try_from(&source.connection)?;
                let count = self
                    .partitions
                    .partition_count(&connection.brokers, &connection.topic)
                    .await?;
                debug!("Topic {} has {} partitions", connection.topic, count);
                if count == 0 {
                    return Err(Error::NoPartitions(connection.topic));
                }
                u32::try_from(count).map_err(|_| Error::TooManyPartitions {
                    topic: connection.topic,
                    count,
                })
            }
            None => Err(Error::UnsupportedSource(source.name.clone())),
        }
    }
}
