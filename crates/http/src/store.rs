//! Job store backed by the platform data service.

use async_trait::async_trait;
use dpe_stream_core::store::{Error, JobData, JobStore, JobUpdate};
use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Default request timeout for data-service calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const STREAM_PATH: &str = "data/v1/stream";

/// Persists job records through the data-service REST API.
#[derive(Clone, Debug)]
pub struct DataServiceStore {
    /// HTTP client.
    client: reqwest::Client,
    /// Base url of the data service.
    url: String,
}

impl DataServiceStore {
    fn account_url(&self, account_id: &str) -> String {
        format!("{}/{STREAM_PATH}/{account_id}", self.url)
    }

    fn job_url(&self, account_id: &str, job_id: &str) -> String {
        format!("{}/{STREAM_PATH}/{account_id}/{job_id}", self.url)
    }

    async fn send(&self, request: RequestBuilder, job_id: &str) -> Result<(), Error> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(job_id.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl JobStore for DataServiceStore {
    async fn add_job(&self, job: &JobData) -> Result<(), Error> {
        debug!("Storing job {} of account {}", job.id, job.account_id);
        let request = self.client.post(self.account_url(&job.account_id)).json(job);
        self.send(request, &job.id).await
    }

    async fn update_job(&self, account_id: &str, job_id: &str, update: &JobUpdate) -> Result<(), Error> {
        let request = self.client.put(self.job_url(account_id, job_id)).json(update);
        self.send(request, job_id).await
    }

    async fn delete_job(&self, account_id: &str, job_id: &str) -> Result<(), Error> {
        let request = self.client.delete(self.job_url(account_id, job_id));
        self.send(request, job_id).await
    }
}

/// Builder for [`DataServiceStore`].
#[derive(Default)]
pub struct DataServiceStoreBuilder {
    url: Option<String>,
    timeout: Option<Duration>,
}

impl DataServiceStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base url of the data service, without a trailing slash.
    pub fn url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<DataServiceStore, Error> {
        let url = self
            .url
            .ok_or_else(|| Error::Request("Missing required attribute: url".to_string()))?;
        let client = reqwest::ClientBuilder::new()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;
        Ok(DataServiceStore {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}
