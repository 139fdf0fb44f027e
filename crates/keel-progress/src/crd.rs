//! CustomResourceDefinition readiness
//!
//! Both API versions reduce to the same condition check: a CRD is ready once
//! it is `Established`. A `NamesAccepted=False` condition (naming conflict) is
//! also treated as ready; it will never resolve by waiting, so the caller
//! should not be stalled on it.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::DynamicObject;
use serde::Deserialize;

use keel_common::kube_utils::{has_condition_status, HasConditionFields, STATUS_FALSE, STATUS_TRUE};
use keel_common::Error;

use crate::client::ClusterClient;
use crate::resource::TrackedResource;

/// CRD condition: the API server serves the resource
pub const CONDITION_ESTABLISHED: &str = "Established";
/// CRD condition: names are free of conflicts
pub const CONDITION_NAMES_ACCEPTED: &str = "NamesAccepted";

/// A condition from an apiextensions.k8s.io/v1beta1 CRD status
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CrdV1Beta1Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// Condition status ("True", "False", "Unknown")
    pub status: String,
}

impl HasConditionFields for CrdV1Beta1Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Decide readiness from a CRD's conditions, independent of API version
pub fn crd_established<T: HasConditionFields>(conditions: &[T]) -> bool {
    has_condition_status(Some(conditions), CONDITION_ESTABLISHED, STATUS_TRUE)
        || has_condition_status(Some(conditions), CONDITION_NAMES_ACCEPTED, STATUS_FALSE)
}

/// Readiness of a v1 CRD object
pub fn crd_ready(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .map(crd_established)
        .unwrap_or(false)
}

/// Readiness of a v1beta1 CRD object fetched dynamically
pub fn crd_v1beta1_ready(crd: &DynamicObject) -> Result<bool, Error> {
    let Some(conditions) = crd.data.pointer("/status/conditions") else {
        return Ok(false);
    };
    let conditions: Vec<CrdV1Beta1Condition> = Vec::deserialize(conditions).map_err(|e| {
        Error::readiness_fetch(
            crd.metadata.name.clone().unwrap_or_default(),
            format!("malformed v1beta1 CRD conditions: {}", e),
        )
    })?;
    Ok(crd_established(&conditions))
}

/// Check a CRD through apiextensions.k8s.io/v1
pub async fn is_crd_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let crd = client.get_crd(&resource.name).await?;
    Ok(crd_ready(&crd))
}

/// Check a CRD through apiextensions.k8s.io/v1beta1
pub async fn is_crd_v1beta1_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let crd = client.get_crd_v1beta1(&resource.name).await?;
    crd_v1beta1_ready(&crd)
}
