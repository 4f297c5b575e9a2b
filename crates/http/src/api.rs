//! Master API handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use dpe_stream_core::job::StreamJob;
use dpe_stream_core::master::{self, StreamService};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Errors returned by the master API.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Malformed request body: {source}")]
    Body {
        #[source]
        source: serde_json::Error,
    },
    #[error("Missing path parameter {0}")]
    MissingParameter(&'static str),
    #[error(transparent)]
    Service(#[from] master::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Body { .. } | Error::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Error::Service(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Error::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        error!("stream api error: {}", self);
        let kind = if status == StatusCode::BAD_REQUEST {
            "BadRequest"
        } else {
            "InternalServerError"
        };
        let body = Json(json!({ "error": kind, "description": self.to_string() }));
        (status, body).into_response()
    }
}

/// Routes of the master API, relative to [`crate::API_PREFIX`].
pub fn routes(service: Arc<StreamService>) -> Router {
    Router::new()
        .route("/jobs", post(missing_account_id))
        .route("/jobs/:account_id", post(start_job).delete(missing_job_id))
        .route("/jobs/:account_id/:job_id", delete(stop_job))
        .with_state(service)
}

async fn start_job(
    State(service): State<Arc<StreamService>>,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, String), Error> {
    let job: StreamJob = serde_json::from_slice(&body).map_err(|source| Error::Body { source })?;
    let job_id = service.start_job(&account_id, job).await?;
    Ok((StatusCode::CREATED, job_id))
}

async fn stop_job(
    State(service): State<Arc<StreamService>>,
    Path((account_id, job_id)): Path<(String, String)>,
) -> Result<StatusCode, Error> {
    service.stop_job(&account_id, &job_id).await?;
    Ok(StatusCode::OK)
}

async fn missing_account_id() -> Error {
    Error::MissingParameter("accountId")
}

async fn missing_job_id() -> Error {
    Error::MissingParameter("jobId")
}
