use crate::API_PREFIX;
use axum::{routing::get, Router};
use dpe_stream_core::master::StreamService;
use std::sync::Arc;
use tracing::info;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// HTTP server exposing the health endpoint and, on masters, the job API.
#[derive(Clone)]
pub struct HttpServer {
    /// Port to listen on.
    port: u16,
    /// Master service backing the job API.
    service: Option<Arc<StreamService>>,
}

impl HttpServer {
    /// Router with every route this server exposes.
    pub fn router(&self) -> Router {
        let mut router = Router::new().route("/health", get(health));
        if let Some(service) = &self.service {
            router = router.nest(API_PREFIX, crate::api::routes(Arc::clone(service)));
        }
        router
    }

    /// Binds the port and serves until the process ends.
    pub async fn run(self) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!("Starting HTTP server on port {}", self.port);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Builder for [`HttpServer`].
pub struct HttpServerBuilder {
    port: u16,
    service: Option<Arc<StreamService>>,
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            service: None,
        }
    }
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Mounts the master API under [`API_PREFIX`].
    pub fn service(mut self, service: Arc<StreamService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self) -> HttpServer {
        HttpServer {
            port: self.port,
            service: self.service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{self, StreamClientBuilder};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use dpe_stream_core::chain::Chain;
    use dpe_stream_core::host::{self, Cluster};
    use dpe_stream_core::job::{Source, StartJob, StreamJob, SOURCE_KAFKA};
    use dpe_stream_core::master::StreamServiceBuilder;
    use dpe_stream_core::queue::{self, Partitions};
    use dpe_stream_core::source::SourceResolver;
    use dpe_stream_core::store::{JobStatus, MemoryJobStore};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeCluster {
        started: Mutex<Vec<StartJob>>,
        start_error: Option<(host::ErrorKind, &'static str)>,
        stop_error: Option<(host::ErrorKind, &'static str)>,
    }

    #[async_trait]
    impl Cluster for FakeCluster {
        async fn start_job(&self, job: &StartJob) -> Result<(), host::Error> {
            if let Some((kind, message)) = self.start_error {
                return Err(host::Error::new(kind, message));
            }
            self.started.lock().unwrap().push(job.clone());
            Ok(())
        }

        async fn stop_job(&self, _account_id: &str, _job_id: &str) -> Result<(), host::Error> {
            if let Some((kind, message)) = self.stop_error {
                return Err(host::Error::new(kind, message));
            }
            Ok(())
        }
    }

    struct FakePartitions(usize);

    #[async_trait]
    impl Partitions for FakePartitions {
        async fn partition_count(&self, _brokers: &[String], _topic: &str) -> Result<usize, queue::Error> {
            Ok(self.0)
        }
    }

    fn server(cluster: Arc<FakeCluster>, store: Arc<MemoryJobStore>) -> HttpServer {
        let service = StreamServiceBuilder::new()
            .cluster(cluster)
            .store(store)
            .resolver(SourceResolver::new(Arc::new(FakePartitions(3))))
            .build()
            .unwrap();
        HttpServerBuilder::new().service(Arc::new(service)).build()
    }

    fn stream_job() -> StreamJob {
        StreamJob {
            invocation_id: "inv-7".to_string(),
            memory: 128,
            source: Source {
                name: SOURCE_KAFKA.to_string(),
                connection: json!({"topic": "clicks", "brokers": "k:9092", "coordinators": "z:2181"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
            functions: Chain::new()
                .map("|msg| msg", &[])
                .unwrap()
                .into_functions(),
            description: String::new(),
        }
    }

    async fn send(router: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let router = HttpServerBuilder::new().build().router();
        let (status, body) = send(router, "GET", "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_health_only_server_has_no_job_api() {
        let router = HttpServerBuilder::new().build().router();
        let (status, _) = send(router, "POST", "/stream/v1/jobs/acct", Body::from("{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_job_returns_created_with_job_id() {
        let cluster = Arc::new(FakeCluster::default());
        let store = Arc::new(MemoryJobStore::new());
        let router = server(cluster.clone(), store.clone()).router();

        let body = serde_json::to_vec(&stream_job()).unwrap();
        let (status, body) = send(router, "POST", "/stream/v1/jobs/acct", Body::from(body)).await;

        assert_eq!(status, StatusCode::CREATED);
        let job_id = String::from_utf8(body).unwrap();
        assert_eq!(store.get("acct", &job_id).unwrap().status, JobStatus::Started);
        assert_eq!(cluster.started.lock().unwrap()[0].instances, 3);
    }

    #[tokio::test]
    async fn test_start_job_rejects_malformed_body() {
        let router = server(Arc::default(), Arc::default()).router();
        let (status, body) = send(router, "POST", "/stream/v1/jobs/acct", Body::from("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "BadRequest");
    }

    #[tokio::test]
    async fn test_start_job_rejects_invalid_job() {
        let store = Arc::new(MemoryJobStore::new());
        let router = server(Arc::default(), store.clone()).router();
        let mut job = stream_job();
        job.invocation_id.clear();

        let body = serde_json::to_vec(&job).unwrap();
        let (status, body) = send(router, "POST", "/stream/v1/jobs/acct", Body::from(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["description"], "Invocation id is empty");
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_start_job_rejects_wire_chain_missing_operator_arguments() {
        let cluster = Arc::new(FakeCluster::default());
        let store = Arc::new(MemoryJobStore::new());
        let router = server(cluster.clone(), store.clone()).router();

        for function in [json!({"name": "fold"}), json!({"name": "limit"}), json!({"name": "map"})] {
            let mut body = serde_json::to_value(stream_job()).unwrap();
            body["functions"] = json!([function]);
            let body = serde_json::to_vec(&body).unwrap();
            let (status, _) = send(router.clone(), "POST", "/stream/v1/jobs/acct", Body::from(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{function} should be rejected");
        }
        assert!(cluster.started.lock().unwrap().is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_start_job_orchestrator_failure_is_internal_error() {
        let cluster = Arc::new(FakeCluster {
            start_error: Some((host::ErrorKind::Fatal, "quota exceeded")),
            ..Default::default()
        });
        let store = Arc::new(MemoryJobStore::new());
        let router = server(cluster, store.clone()).router();

        let body = serde_json::to_vec(&stream_job()).unwrap();
        let (status, body) = send(router, "POST", "/stream/v1/jobs/acct", Body::from(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "InternalServerError");
        assert_eq!(body["description"], "quota exceeded");
        assert_eq!(store.snapshot()[0].status, JobStatus::FailedToStart);
    }

    #[tokio::test]
    async fn test_stop_job_with_missing_group_is_ok() {
        let cluster = Arc::new(FakeCluster {
            stop_error: Some((host::ErrorKind::NotFound, "deployments not found")),
            ..Default::default()
        });
        let router = server(cluster, Arc::default()).router();
        let (status, _) = send(router, "DELETE", "/stream/v1/jobs/acct/job-1", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_path_parameters() {
        let router = server(Arc::default(), Arc::default()).router();
        let (status, _) = send(router.clone(), "POST", "/stream/v1/jobs", Body::from("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(router, "DELETE", "/stream/v1/jobs/acct", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["description"], "Missing path parameter jobId");
    }

    #[tokio::test]
    async fn test_stop_job_failure_is_internal_error() {
        let cluster = Arc::new(FakeCluster {
            stop_error: Some((host::ErrorKind::Transient, "scheduler unavailable")),
            ..Default::default()
        });
        let router = server(cluster, Arc::default()).router();
        let (status, body) = send(router, "DELETE", "/stream/v1/jobs/acct/job-1", Body::empty()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["description"], "scheduler unavailable");
    }

    #[tokio::test]
    async fn test_stream_client_against_running_master() {
        let store = Arc::new(MemoryJobStore::new());
        let router = server(Arc::default(), store.clone()).router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });

        let client = StreamClientBuilder::new()
            .url(format!("http://{addr}"))
            .build()
            .unwrap();
        let job_id = client.start_job("acct", &stream_job()).await.unwrap();
        assert!(store.get("acct", &job_id).is_some());

        client.stop_job("acct", &job_id).await.unwrap();
        assert!(store.get("acct", &job_id).is_none());

        let mut invalid = stream_job();
        invalid.functions.clear();
        let err = client.start_job("acct", &invalid).await.unwrap_err();
        assert!(matches!(err, client::Error::Status { status: 400, .. }));
    }
}
