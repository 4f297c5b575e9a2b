//! `submit` and `stop` commands.
//!
//! A job definition file describes the source and a list of operators. It is
//! assembled through the chain builder, so evaluators are syntax checked
//! before anything reaches the master.
//!
//! ```yaml
//! invocation_id: nightly-clicks
//! memory: 256
//! source:
//!   name: kafka
//!   connection:
//!     topic: clicks
//!     brokers: kafka-0:9092,kafka-1:9092
//!     coordinators: zk-0:2181
//! functions:
//!   - op: filter
//!     code: "|msg, min| msg.count > min"
//!     params: [10]
//!   - op: limit
//!     count: 1000
//!   - op: foreach
//!     code: "|msg| print(msg.user)"
//! ```

use crate::config::AppConfig;
use dpe_stream_core::chain::{self, Chain};
use dpe_stream_core::job::{self, Operator, Source, StreamJob};
use dpe_stream_http::client::{self, StreamClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to load job definition: {source}")]
    Definition {
        #[source]
        source: config::ConfigError,
    },
    #[error("Function {operator} requires {field}")]
    MissingField {
        operator: Operator,
        field: &'static str,
    },
    #[error(transparent)]
    Chain(#[from] chain::Error),
    #[error(transparent)]
    Job(#[from] job::Error),
    #[error(transparent)]
    Client(#[from] client::Error),
}

/// Job definition as written by users.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct JobDefinition {
    pub invocation_id: String,
    #[serde(default)]
    pub memory: u32,
    #[serde(default)]
    pub description: String,
    pub source: Source,
    pub functions: Vec<FunctionDefinition>,
}

/// One operator of a job definition.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct FunctionDefinition {
    pub op: Operator,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Only used by `limit`.
    #[serde(default)]
    pub count: Option<i64>,
    /// Only used by `fold`.
    #[serde(default)]
    pub accumulator: Option<Value>,
}

impl FunctionDefinition {
    fn code(&self) -> Result<&str, Error> {
        self.code.as_deref().ok_or(Error::MissingField {
            operator: self.op,
            field: "code",
        })
    }

    fn append(&self, chain: Chain) -> Result<Chain, Error> {
        let chain = match self.op {
            Operator::Limit => {
                let count = self.count.ok_or(Error::MissingField {
                    operator: self.op,
                    field: "count",
                })?;
                chain.limit(count)?
            }
            Operator::Foreach => chain.foreach(self.code()?, &self.params)?,
            Operator::Filter => chain.filter(self.code()?, &self.params)?,
            Operator::Map => chain.map(self.code()?, &self.params)?,
            Operator::Fold => {
                let accumulator = self.accumulator.clone().ok_or(Error::MissingField {
                    operator: self.op,
                    field: "accumulator",
                })?;
                chain.fold(self.code()?, accumulator, &self.params)?
            }
        };
        Ok(chain)
    }
}

impl JobDefinition {
    /// Reads a definition file; the format follows the extension.
    pub fn load(path: &Path) -> Result<Self, Error> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|source| Error::Definition { source })
    }

    /// Assembles and validates the job.
    pub fn into_stream_job(self) -> Result<StreamJob, Error> {
        let chain = self
            .functions
            .iter()
            .try_fold(Chain::new(), |chain, function| function.append(chain))?;
        let job = StreamJob {
            invocation_id: self.invocation_id,
            memory: self.memory,
            source: self.source,
            functions: chain.into_functions(),
            description: self.description,
        };
        job.validate()?;
        Ok(job)
    }
}

/// Submits the job defined in `path` and returns its id.
pub async fn submit(config: &AppConfig, account_id: &str, path: &Path) -> Result<String, Error> {
    let job = JobDefinition::load(path)?.into_stream_job()?;
    let client = StreamClientBuilder::new().url(config.master_url.clone()).build()?;
    Ok(client.start_job(account_id, &job).await?)
}

pub async fn stop(config: &AppConfig, account_id: &str, job_id: &str) -> Result<(), Error> {
    let client = StreamClientBuilder::new().url(config.master_url.clone()).build()?;
    Ok(client.stop_job(account_id, job_id).await?)
}
