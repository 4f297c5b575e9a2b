//! Client of the master API, used by the `submit` and `stop` commands.

use crate::API_PREFIX;
use dpe_stream_core::job::StreamJob;
use reqwest::Response;
use tracing::info;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Request to stream master failed: {source}")]
    Reqwest {
        #[source]
        source: reqwest::Error,
    },
    #[error("Stream master responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// HTTP client for a running master.
#[derive(Clone, Debug)]
pub struct StreamClient {
    /// HTTP client.
    client: reqwest::Client,
    /// Base url of the master.
    url: String,
}

impl StreamClient {
    /// Submits `job` for `account_id` and returns the assigned job id.
    pub async fn start_job(&self, account_id: &str, job: &StreamJob) -> Result<String, Error> {
        let response = self
            .client
            .post(format!("{}{API_PREFIX}/jobs/{account_id}", self.url))
            .json(job)
            .send()
            .await
            .map_err(|source| Error::Reqwest { source })?;
        let job_id = checked(response)
            .await?
            .text()
            .await
            .map_err(|source| Error::Reqwest { source })?;
        info!("Submitted job {} for account {}", job_id, account_id);
        Ok(job_id)
    }

    pub async fn stop_job(&self, account_id: &str, job_id: &str) -> Result<(), Error> {
        let response = self
            .client
            .delete(format!("{}{API_PREFIX}/jobs/{account_id}/{job_id}", self.url))
            .send()
            .await
            .map_err(|source| Error::Reqwest { source })?;
        checked(response).await?;
        info!("Stopped job {} for account {}", job_id, account_id);
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}

/// Builder for [`StreamClient`].
#[derive(Default)]
pub struct StreamClientBuilder {
    url: Option<String>,
}

impl StreamClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    pub fn build(self) -> Result<StreamClient, Error> {
        let url = self
            .url
            .ok_or_else(|| Error::MissingRequiredAttribute("url".to_string()))?;
        let client = reqwest::ClientBuilder::new()
            .build()
            .map_err(|source| Error::Reqwest { source })?;
        Ok(StreamClient {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}
