//! Connecting a run to its target cluster

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use keel_common::kube_utils::create_client;
use keel_common::Error;
use keel_progress::{ClusterClient, KubeClusterClient};

use crate::model::ReconciliationRequest;

/// Produces the cluster client a run works with
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to the cluster named by the request
    async fn connect(&self, request: &ReconciliationRequest)
        -> Result<Arc<dyn ClusterClient>, Error>;
}

/// Connects with the request's kubeconfig, or the inferred one when absent
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(
        &self,
        request: &ReconciliationRequest,
    ) -> Result<Arc<dyn ClusterClient>, Error> {
        let client = create_client(request.kubeconfig.as_deref()).await?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}
