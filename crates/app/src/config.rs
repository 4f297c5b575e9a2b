//! Application configuration.
//!
//! Values come from built-in defaults, an optional file at `CONFIG_PATH`
//! (format picked from the extension) and `DPE_STREAM_*` environment
//! variables, later sources winning. Nested keys use `__`, for example
//! `DPE_STREAM_WORKER__THREADS=50`.

use dpe_stream_core::event::DEFAULT_OUTPUT_TOPIC;
use dpe_stream_core::task::{pool, receiver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Environment variable holding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Master url used when none is configured.
pub const DEFAULT_MASTER_URL: &str = "http://localhost:8080";

const ENV_PREFIX: &str = "DPE_STREAM";

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to parse configuration: {source}")]
    Config {
        #[source]
        source: config::ConfigError,
    },
}

/// Top-level configuration shared by every command.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_server: HttpServerOptions,
    pub cluster: ClusterOptions,
    pub data_service: DataServiceOptions,
    pub store: StoreOptions,
    pub worker: WorkerOptions,
    /// Base url of the master, used by `submit` and `stop`.
    pub master_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_server: HttpServerOptions::default(),
            cluster: ClusterOptions::default(),
            data_service: DataServiceOptions::default(),
            store: StoreOptions::default(),
            worker: WorkerOptions::default(),
            master_url: DEFAULT_MASTER_URL.to_string(),
        }
    }
}

#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerOptions {
    pub port: u16,
}

impl Default for HttpServerOptions {
    fn default() -> Self {
        Self {
            port: dpe_stream_http::server::DEFAULT_HTTP_PORT,
        }
    }
}

/// Kubernetes placement of worker instances.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterOptions {
    pub namespace: String,
    pub image: String,
    /// First segment of instance names.
    pub group: String,
    /// Deployment environment, second segment of instance names.
    pub env: String,
    pub worker_args: Vec<String>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "dpe-stream:latest".to_string(),
            group: "dpe".to_string(),
            env: "dev".to_string(),
            worker_args: vec!["worker".to_string()],
        }
    }
}

#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DataServiceOptions {
    pub url: Option<String>,
}

/// Job store backend.
#[derive(PartialEq, Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Platform data service.
    #[default]
    Http,
    /// Process local map, records are lost on restart.
    Memory,
}

#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreOptions {
    #[serde(rename = "type")]
    pub store_type: StoreType,
}

#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Concurrent message executors.
    pub threads: usize,
    /// Messages that may wait for an executor.
    pub queue_capacity: usize,
    /// Seconds between throughput reports. Must be greater than zero.
    pub throughput_interval_secs: u64,
    /// Topic output events are published to.
    pub output_topic: String,
    /// Brokers of the output topic. Defaults to the source brokers.
    pub output_brokers: Option<Vec<String>>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            threads: pool::DEFAULT_THREADS,
            queue_capacity: pool::DEFAULT_CAPACITY,
            throughput_interval_secs: receiver::DEFAULT_THROUGHPUT_INTERVAL.as_secs(),
            output_topic: DEFAULT_OUTPUT_TOPIC.to_string(),
            output_brokers: None,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `CONFIG_PATH` and the process environment.
    pub fn load() -> Result<Self, Error> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new), None)
    }

    /// Loads the configuration from an optional file and an explicit environment.
    /// `None` reads the process environment.
    pub fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|source| Error::Config { source })
    }
}
