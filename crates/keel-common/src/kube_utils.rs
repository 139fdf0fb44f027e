//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction for reconciliation targets and helpers for reading
//! the standard `type`/`status` condition lists found on most workload kinds.

use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// Kubernetes condition status values
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";
/// The "False" status value for conditions
pub const STATUS_FALSE: &str = "False";

/// Create a kube client from optional kubeconfig YAML with default timeouts
///
/// When no kubeconfig is supplied the configuration is inferred (in-cluster
/// service account, then the local kubeconfig).
pub async fn create_client(kubeconfig: Option<&str>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig YAML with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(yaml) => {
            let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
                Error::configuration_for_field("kubeconfig", format!("invalid kubeconfig: {}", e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::configuration_for_field(
                        "kubeconfig",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::configuration(format!("failed to infer cluster config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::batch::v1::JobCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields
    for k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionCondition
{
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Check if a condition of the given type has the given status
///
/// Returns `false` when the condition is not reported at all.
pub fn has_condition_status<T>(conditions: Option<&[T]>, condition_type: &str, status: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == status)
        })
        .unwrap_or(false)
}

/// Check if every reported condition has status "True"
///
/// Vacuously true when no conditions are reported.
pub fn all_conditions_true<T>(conditions: Option<&[T]>) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| conds.iter().all(|c| c.status_field() == STATUS_TRUE))
        .unwrap_or(true)
}
