//! Tracked resource identity and manifest scanning
//!
//! A reconciliation tracks the workloads it rolled out. They are named either
//! explicitly by the caller or discovered by scanning the pre-rendered
//! manifest that was handed to the install action.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_common::Error;

/// Resource kinds with a readiness predicate
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// v1 Pod
    Pod,
    /// batch/v1 Job
    Job,
    /// apiextensions.k8s.io CustomResourceDefinition (v1 or v1beta1)
    CustomResourceDefinition,
}

impl WorkloadKind {
    /// The Kubernetes `kind` string
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Job => "Job",
            WorkloadKind::CustomResourceDefinition => "CustomResourceDefinition",
        }
    }

    /// The API group serving this kind (empty for the core group)
    pub fn api_group(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment | WorkloadKind::StatefulSet | WorkloadKind::DaemonSet => {
                "apps"
            }
            WorkloadKind::Pod => "",
            WorkloadKind::Job => "batch",
            WorkloadKind::CustomResourceDefinition => "apiextensions.k8s.io",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, WorkloadKind::CustomResourceDefinition)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "Deployment" => Ok(WorkloadKind::Deployment),
            "StatefulSet" => Ok(WorkloadKind::StatefulSet),
            "DaemonSet" => Ok(WorkloadKind::DaemonSet),
            "Pod" => Ok(WorkloadKind::Pod),
            "Job" => Ok(WorkloadKind::Job),
            "CustomResourceDefinition" => Ok(WorkloadKind::CustomResourceDefinition),
            other => Err(Error::configuration_for_field(
                "kind",
                format!("kind '{}' has no readiness check", other),
            )),
        }
    }
}

/// One Kubernetes object to watch until it reports ready
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedResource {
    /// Resource kind
    pub kind: WorkloadKind,
    /// Namespace (empty for cluster-scoped kinds)
    #[serde(default)]
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl TrackedResource {
    /// Create a tracked resource, dropping the namespace for cluster-scoped kinds
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.into()
        } else {
            String::new()
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_namespaced() {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.kind, self.name)
        }
    }
}

/// Scan a multi-document YAML (or JSON) manifest for trackable workloads
///
/// Documents of other kinds are skipped, as are documents whose `apiVersion`
/// group does not serve the kind (a custom `kind: Deployment` is not an
/// apps Deployment). Namespaced objects without a
/// namespace are placed in `default_namespace`. The result is sorted and
/// free of duplicates.
pub fn tracked_resources_from_manifest(
    manifest: &str,
    default_namespace: &str,
) -> Result<Vec<TrackedResource>, Error> {
    let mut resources = BTreeSet::new();

    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            Error::configuration_for_field("manifest", format!("invalid manifest document: {}", e))
        })?;

        if value.is_null() {
            continue;
        }

        let Some(kind) = value.get("kind").and_then(|k| k.as_str()) else {
            continue;
        };
        let Ok(kind) = kind.parse::<WorkloadKind>() else {
            debug!(kind = %kind, "skipping untracked manifest kind");
            continue;
        };
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if api_group(api_version) != kind.api_group() {
            debug!(%kind, %api_version, "skipping kind served by another API group");
            continue;
        }

        let name = value
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::configuration_for_field(
                    "manifest",
                    format!("{} document missing metadata.name", kind),
                )
            })?;
        let namespace = value
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .unwrap_or(default_namespace);

        resources.insert(TrackedResource::new(kind, namespace, name));
    }

    Ok(resources.into_iter().collect())
}

/// Group part of an `apiVersion` (`apps/v1` -> `apps`, `v1` -> ``)
fn api_group(api_version: &str) -> &str {
    api_version
        .split_once('/')
        .map(|(group, _)| group)
        .unwrap_or_default()
}
