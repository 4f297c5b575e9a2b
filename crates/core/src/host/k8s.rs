//! Kubernetes implementation of the cluster orchestrator.
//!
//! Every worker instance is a single-replica Deployment. The hierarchical
//! instance name is kept as an annotation while labels carry the account, job
//! and index so a job can be removed with one label selector.

use crate::codec;
use crate::host::{Cluster, Error, InstanceNaming};
use crate::job::{StartJob, WORKER_JOB_ENV};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Default namespace for worker deployments.
const DEFAULT_NAMESPACE: &str = "default";

/// Default worker container image.
const DEFAULT_IMAGE: &str = "dpe-stream:latest";

const LABEL_APP: &str = "app.kubernetes.io/name";
const LABEL_ACCOUNT: &str = "dpe-stream/account";
const LABEL_JOB: &str = "dpe-stream/job";
const LABEL_INDEX: &str = "dpe-stream/worker-index";
const ANNOTATION_INSTANCE: &str = "dpe-stream/instance";
const APP_NAME: &str = "dpe-stream-worker";

/// Kubernetes backed [`Cluster`].
#[derive(Clone)]
pub struct K8sCluster {
    /// Kubernetes client, set by `connect`.
    client: Option<Arc<Client>>,
    /// Namespace worker deployments are created in.
    namespace: String,
    /// Container image of the worker.
    image: String,
    /// Arguments passed to the worker container.
    worker_args: Vec<String>,
    /// Naming scheme for instances and groups.
    naming: InstanceNaming,
}

impl K8sCluster {
    /// Connects with the in-cluster or kubeconfig credentials.
    pub async fn connect(mut self) -> Result<Self, Error> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::transient(format!("Failed to connect to Kubernetes: {e}")))?;
        self.client = Some(Arc::new(client));
        info!("Successfully connected to Kubernetes cluster");
        Ok(self)
    }

    fn api(&self) -> Result<Api<Deployment>, Error> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::transient("Client not connected"))?;
        Ok(Api::namespaced((**client).clone(), &self.namespace))
    }

    /// Renders the Deployment for one worker instance.
    fn deployment(&self, job: &StartJob, index: u32, encoded_job: &str) -> Result<Deployment, Error> {
        let instance = self.naming.instance_name(&job.account_id, &job.job_id, index);
        let labels = serde_json::json!({
            LABEL_APP: APP_NAME,
            LABEL_ACCOUNT: label_value(&job.account_id),
            LABEL_JOB: label_value(&job.job_id),
            LABEL_INDEX: index.to_string(),
        });

        let mut container = serde_json::json!({
            "name": "worker",
            "image": self.image,
            "args": self.worker_args,
            "env": [{ "name": WORKER_JOB_ENV, "value": encoded_job }],
        });
        if job.memory > 0 {
            container["resources"] = serde_json::json!({
                "limits": { "memory": format!("{}Mi", job.memory) },
                "requests": { "memory": format!("{}Mi", job.memory) },
            });
        }

        let deployment = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": resource_name(&instance),
                "namespace": self.namespace,
                "labels": labels,
                "annotations": { ANNOTATION_INSTANCE: instance },
            },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": { "containers": [container] },
                },
            },
        });

        serde_json::from_value(deployment)
            .map_err(|e| Error::fatal(format!("Failed to build deployment {instance}: {e}")))
    }
}

#[async_trait]
impl Cluster for K8sCluster {
    async fn start_job(&self, job: &StartJob) -> Result<(), Error> {
        let api = self.api()?;
        let encoded_job = codec::encode_job(job).map_err(|e| Error::fatal(e.to_string()))?;

        for index in 0..job.instances {
            let deployment = self.deployment(job, index, &encoded_job)?;
            api.create(&PostParams::default(), &deployment)
                .await
                .map_err(classify)?;
            debug!("Launched worker {} of job {}", index, job.job_id);
        }

        info!(
            "Launched {} workers for job {} in namespace {}",
            job.instances, job.job_id, self.namespace
        );
        Ok(())
    }

    async fn stop_job(&self, account_id: &str, job_id: &str) -> Result<(), Error> {
        let api = self.api()?;
        let params = ListParams::default().labels(&job_selector(account_id, job_id));

        let existing = api.list(&params).await.map_err(classify)?;
        if existing.items.is_empty() {
            return Err(Error::not_found(format!(
                "Job group {} not found",
                self.naming.group_name(account_id, job_id)
            )));
        }

        api.delete_collection(&DeleteParams::background(), &params)
            .await
            .map_err(classify)?;

        info!(
            "Deleted {} workers of job {} in namespace {}",
            existing.items.len(),
            job_id,
            self.namespace
        );
        Ok(())
    }
}

fn classify(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::not_found(response.message),
        kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
            Error::transient(response.message)
        }
        kube::Error::Api(response) => Error::fatal(response.message),
        other => Error::transient(other.to_string()),
    }
}

fn job_selector(account_id: &str, job_id: &str) -> String {
    format!(
        "{LABEL_ACCOUNT}={},{LABEL_JOB}={}",
        label_value(account_id),
        label_value(job_id)
    )
}

/// Restricts a value to the label alphabet and length.
fn label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Turns a hierarchical instance name into a DNS-1123 resource name.
fn resource_name(instance: &str) -> String {
    let mut name = String::with_capacity(instance.len());
    for c in instance.trim_matches('/').chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    name.truncate(253);
    name.trim_matches('-').to_string()
}

/// Builder for [`K8sCluster`].
pub struct K8sClusterBuilder {
    namespace: String,
    image: String,
    worker_args: Vec<String>,
    naming: InstanceNaming,
}

impl Default for K8sClusterBuilder {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            worker_args: vec!["worker".to_string()],
            naming: InstanceNaming::new("dpe", "dev"),
        }
    }
}

impl K8sClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: String) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn image(mut self, image: String) -> Self {
        self.image = image;
        self
    }

    /// Arguments passed to the worker binary.
    pub fn worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    pub fn naming(mut self, naming: InstanceNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Builds the cluster handle without connecting.
    pub fn build(self) -> K8sCluster {
        K8sCluster {
            client: None,
            namespace: self.namespace,
            image: self.image,
            worker_args: self.worker_args,
            naming: self.naming,
        }
    }
}
