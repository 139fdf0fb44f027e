//! Cluster access for readiness checks
//!
//! Provides a trait-based abstraction over the reads the readiness predicates
//! need, allowing tests to mock Kubernetes interactions while production code
//! uses real API calls.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tokio::sync::OnceCell;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keel_common::Error;

/// API group serving CustomResourceDefinitions
pub const APIEXTENSIONS_GROUP: &str = "apiextensions.k8s.io";

/// CustomResourceDefinition API version served by the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrdApiVersion {
    /// apiextensions.k8s.io/v1 (Kubernetes 1.16+)
    V1,
    /// apiextensions.k8s.io/v1beta1 (legacy clusters)
    V1Beta1,
}

/// Trait abstracting the cluster reads used by readiness checks
///
/// Implementations must be safe to share between concurrent runs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error>;

    /// List ReplicaSets in a namespace matching a label selector string
    async fn list_replica_sets(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ReplicaSet>, Error>;

    /// Get a StatefulSet
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, Error>;

    /// Get a DaemonSet
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, Error>;

    /// Get a Pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error>;

    /// Get a Job
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, Error>;

    /// Which CustomResourceDefinition API version the cluster serves
    async fn crd_api_version(&self) -> Result<CrdApiVersion, Error>;

    /// Get a CustomResourceDefinition through apiextensions.k8s.io/v1
    async fn get_crd(&self, name: &str) -> Result<CustomResourceDefinition, Error>;

    /// Get a CustomResourceDefinition through apiextensions.k8s.io/v1beta1
    async fn get_crd_v1beta1(&self, name: &str) -> Result<DynamicObject, Error>;

    /// Get the underlying kube Client for actions that write to the cluster
    fn kube_client(&self) -> Client;
}

/// Real cluster client backed by kube-rs
pub struct KubeClusterClient {
    client: Client,
    crd_version: OnceCell<CrdApiVersion>,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            crd_version: OnceCell::new(),
        }
    }

    async fn discover_crd_version(&self) -> Result<CrdApiVersion, Error> {
        let discovery = Discovery::new(self.client.clone())
            .filter(&[APIEXTENSIONS_GROUP])
            .run()
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "crd_api_version",
                    format!("API discovery failed: {}", e),
                )
            })?;

        let served: Vec<String> = discovery
            .groups()
            .filter(|group| group.name() == APIEXTENSIONS_GROUP)
            .flat_map(|group| group.versions().map(str::to_string).collect::<Vec<_>>())
            .collect();

        debug!(versions = ?served, "discovered apiextensions versions");

        if served.iter().any(|v| v == "v1") {
            Ok(CrdApiVersion::V1)
        } else if served.iter().any(|v| v == "v1beta1") {
            Ok(CrdApiVersion::V1Beta1)
        } else {
            Err(Error::internal_with_context(
                "crd_api_version",
                format!("{} is not served by the cluster", APIEXTENSIONS_GROUP),
            ))
        }
    }
}

fn crd_v1beta1_resource() -> ApiResource {
    ApiResource {
        group: APIEXTENSIONS_GROUP.to_string(),
        version: "v1beta1".to_string(),
        api_version: format!("{}/v1beta1", APIEXTENSIONS_GROUP),
        kind: "CustomResourceDefinition".to_string(),
        plural: "customresourcedefinitions".to_string(),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_replica_sets(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ReplicaSet>, Error> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn crd_api_version(&self) -> Result<CrdApiVersion, Error> {
        self.crd_version
            .get_or_try_init(|| self.discover_crd_version())
            .await
            .copied()
    }

    async fn get_crd(&self, name: &str) -> Result<CustomResourceDefinition, Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn get_crd_v1beta1(&self, name: &str) -> Result<DynamicObject, Error> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &crd_v1beta1_resource());
        Ok(api.get(name).await?)
    }

    fn kube_client(&self) -> Client {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_v1beta1_resource() {
        let ar = crd_v1beta1_resource();
        assert_eq!(ar.api_version, "apiextensions.k8s.io/v1beta1");
        assert_eq!(ar.plural, "customresourcedefinitions");
        assert_eq!(ar.kind, "CustomResourceDefinition");
    }
}
