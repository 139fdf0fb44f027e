//! Current ReplicaSet selection for Deployments
//!
//! Mirrors the rollout-status logic of the deployment controller: among the
//! ReplicaSets a Deployment controls, the current one is the oldest whose pod
//! template equals the Deployment's template once the injected
//! `pod-template-hash` label is ignored.

use std::cmp::Ordering;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use keel_common::Error;

use crate::client::ClusterClient;

/// Label the deployment controller injects into ReplicaSet templates
pub const DEFAULT_DEPLOYMENT_UNIQUE_LABEL_KEY: &str = "pod-template-hash";

/// Find the ReplicaSet that represents the Deployment's current template
///
/// Returns `Ok(None)` when the Deployment controls no matching ReplicaSet.
pub async fn current_replica_set(
    client: &dyn ClusterClient,
    deployment: &Deployment,
) -> Result<Option<ReplicaSet>, Error> {
    let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
    let selector = deployment
        .spec
        .as_ref()
        .map(|spec| label_selector_string(&spec.selector))
        .unwrap_or_default();

    let replica_sets = client.list_replica_sets(namespace, &selector).await?;
    let owned: Vec<ReplicaSet> = replica_sets
        .into_iter()
        .filter(|rs| is_controlled_by(rs, deployment))
        .collect();

    if owned.is_empty() {
        return Ok(None);
    }

    Ok(find_new_replica_set(deployment, owned))
}

/// Pick the oldest owned ReplicaSet whose template matches the Deployment's
pub fn find_new_replica_set(
    deployment: &Deployment,
    mut replica_sets: Vec<ReplicaSet>,
) -> Option<ReplicaSet> {
    let template = deployment.spec.as_ref().map(|spec| &spec.template)?;
    replica_sets.sort_by(by_creation_timestamp);
    replica_sets.into_iter().find(|rs| {
        rs.spec
            .as_ref()
            .and_then(|spec| spec.template.as_ref())
            .is_some_and(|rs_template| equal_ignore_hash(rs_template, template))
    })
}

/// Compare two pod templates ignoring the pod-template-hash label
///
/// Empty template metadata, label maps and annotation maps compare equal to
/// absent ones. Everything else is compared structurally: an empty list in
/// the pod spec differs from an absent one, and quantities are compared by
/// their string form (`1000m` differs from `1`).
pub fn equal_ignore_hash(a: &PodTemplateSpec, b: &PodTemplateSpec) -> bool {
    normalize_template(a) == normalize_template(b)
}

fn normalize_template(template: &PodTemplateSpec) -> PodTemplateSpec {
    let mut template = template.clone();
    if let Some(metadata) = template.metadata.as_mut() {
        if let Some(labels) = metadata.labels.as_mut() {
            labels.remove(DEFAULT_DEPLOYMENT_UNIQUE_LABEL_KEY);
        }
        if metadata.labels.as_ref().is_some_and(|l| l.is_empty()) {
            metadata.labels = None;
        }
        if metadata.annotations.as_ref().is_some_and(|a| a.is_empty()) {
            metadata.annotations = None;
        }
    }
    if template.metadata.as_ref().is_some_and(|m| *m == ObjectMeta::default()) {
        template.metadata = None;
    }
    template
}

/// Whether the object carries a controller owner reference to the Deployment
pub fn is_controlled_by(replica_set: &ReplicaSet, deployment: &Deployment) -> bool {
    let Some(uid) = deployment.metadata.uid.as_deref() else {
        return false;
    };
    replica_set
        .metadata
        .owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|owner| owner.controller == Some(true) && owner.uid == uid)
        })
        .unwrap_or(false)
}

/// Creation timestamp ascending, then name ascending
fn by_creation_timestamp(a: &ReplicaSet, b: &ReplicaSet) -> Ordering {
    let a_time = a.metadata.creation_timestamp.as_ref().map(|t| t.0);
    let b_time = b.metadata.creation_timestamp.as_ref().map(|t| t.0);
    a_time
        .cmp(&b_time)
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}

/// Render a label selector in the Kubernetes list-selector syntax
pub fn label_selector_string(selector: &LabelSelector) -> String {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            _ => continue,
        };
        terms.push(term);
    }

    terms.join(",")
}
