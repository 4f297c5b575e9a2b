//! Master command: job API over HTTP backed by Kubernetes and the job store.

use crate::config::{AppConfig, StoreType};
use dpe_stream_core::host::{self, k8s::K8sClusterBuilder, Cluster, InstanceNaming};
use dpe_stream_core::master::{StreamService, StreamServiceBuilder};
use dpe_stream_core::source::SourceResolver;
use dpe_stream_core::store::{self, JobStore, MemoryJobStore};
use dpe_stream_http::server::{self, HttpServerBuilder};
use dpe_stream_http::store::DataServiceStoreBuilder;
use dpe_stream_kafka::partitions::KafkaPartitions;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Host(#[from] host::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Server(#[from] server::Error),
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// Connects to the cluster and serves the job API until the process ends.
#[tracing::instrument(skip_all, name = "master")]
pub async fn run(config: AppConfig) -> Result<(), Error> {
    let cluster = K8sClusterBuilder::new()
        .namespace(config.cluster.namespace.clone())
        .image(config.cluster.image.clone())
        .worker_args(config.cluster.worker_args.clone())
        .naming(InstanceNaming::new(&config.cluster.group, &config.cluster.env))
        .build()
        .connect()
        .await?;

    let service = service(&config, Arc::new(cluster))?;
    info!("Stream master ready");

    HttpServerBuilder::new()
        .port(config.http_server.port)
        .service(Arc::new(service))
        .build()
        .run()
        .await?;
    Ok(())
}

/// Wires the master service around `cluster`.
pub fn service(config: &AppConfig, cluster: Arc<dyn Cluster>) -> Result<StreamService, Error> {
    StreamServiceBuilder::new()
        .cluster(cluster)
        .store(job_store(config)?)
        .resolver(SourceResolver::new(Arc::new(KafkaPartitions::default())))
        .build()
        .map_err(|e| Error::MissingRequiredAttribute(e.0))
}

fn job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>, Error> {
    match config.store.store_type {
        StoreType::Http => {
            let url = config
                .data_service
                .url
                .clone()
                .ok_or_else(|| Error::MissingRequiredAttribute("data_service.url".to_string()))?;
            Ok(Arc::new(DataServiceStoreBuilder::new().url(url).build()?))
        }
        StoreType::Memory => {
            warn!("Using in-memory job store, records are lost on restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Arc<dyn Cluster> {
        Arc::new(K8sClusterBuilder::new().build())
    }

    #[test]
    fn test_http_store_requires_data_service_url() {
        let result = service(&AppConfig::default(), cluster());
        assert!(matches!(
            result,
            Err(Error::MissingRequiredAttribute(attr)) if attr == "data_service.url"
        ));
    }

    #[test]
    fn test_service_with_configured_stores() {
        let mut config = AppConfig::default();
        config.data_service.url = Some("http://data:9000".to_string());
        assert!(service(&config, cluster()).is_ok());

        config.data_service.url = None;
        config.store.store_type = StoreType::Memory;
        assert!(service(&config, cluster()).is_ok());
    }
}
