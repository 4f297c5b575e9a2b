use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use std::time::Duration;
use tracing::info;

/// Default timeout for metadata requests.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Kafka client operation failed with error: {source}")]
    Kafka {
        #[source]
        source: KafkaError,
    },
    #[error("Kafka brokers are not provided")]
    BrokersNotProvided,
    #[error("Blocking Kafka task failed with error: {source}")]
    Join {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Connection settings shared by consumers and producers.
#[derive(Clone, Debug)]
pub struct Client {
    /// Bootstrap brokers.
    brokers: Vec<String>,
    /// Base rdkafka configuration.
    config: ClientConfig,
}

impl Client {
    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    /// Base configuration every rdkafka handle starts from.
    pub fn config(&self) -> ClientConfig {
        self.config.clone()
    }

    /// Verifies the brokers answer a metadata request.
    pub async fn connect(self) -> Result<Self, Error> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config.create().map_err(|source| Error::Kafka { source })?;
            consumer
                .fetch_metadata(None, DEFAULT_METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|source| Error::Kafka { source })
        })
        .await
        .map_err(|source| Error::Join { source })??;
        info!("Connected to Kafka brokers {}", self.brokers.join(","));
        Ok(self)
    }
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct Builder {
    brokers: Vec<String>,
    properties: Vec<(String, String)>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn brokers(mut self, brokers: Vec<String>) -> Self {
        self.brokers = brokers;
        self
    }

    /// Extra librdkafka property applied to every handle.
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        if self.brokers.is_empty() {
            return Err(Error::BrokersNotProvided);
        }
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers.join(","));
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        Ok(Client {
            brokers: self.brokers,
            config,
        })
    }
}
