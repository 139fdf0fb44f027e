//! Reconciliation request model
//!
//! A request names the component to install, where to install it and how to
//! report back. Component payload fields (`profile`, `configuration`,
//! `manifest`) are opaque to the engine and handed to the actions; only the
//! workload identities in the manifest are read, to know what to wait for.

use std::fmt;

use serde::{Deserialize, Serialize};

use keel_common::Error;
use keel_progress::{tracked_resources_from_manifest, TrackedResource};

/// Namespace used when a request does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// A validated request-shape version taken from the trigger path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractVersion(String);

impl ContractVersion {
    /// Parse the version captured from a `/v{version}/run` path, e.g. `1`
    pub fn parse(version: &str) -> Result<Self, Error> {
        let version = version.trim();
        if version.is_empty() {
            return Err(Error::configuration_for_field(
                "contractVersion",
                "contract version cannot be empty",
            ));
        }
        Ok(Self(version.to_string()))
    }

    /// The version without its `v` prefix
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One key/value configuration entry for a component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration key (e.g., "global.domainName")
    pub key: String,
    /// Arbitrary JSON value
    pub value: serde_json::Value,
}

/// Everything needed to reconcile one component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRequest {
    /// Component name
    pub component: String,
    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Component version to install
    #[serde(default)]
    pub version: String,
    /// Installation profile
    #[serde(default)]
    pub profile: String,
    /// Component configuration entries
    #[serde(default)]
    pub configuration: Vec<Configuration>,
    /// Kubeconfig YAML of the target cluster; inferred when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    /// Webhook receiving status updates (remote runs)
    #[serde(
        default,
        rename = "callbackURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_url: Option<String>,
    /// Caller-side identifier, carried into logs
    #[serde(default, rename = "correlationID")]
    pub correlation_id: String,
    /// Pre-rendered multi-document manifest of the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Resources to wait for in addition to those found in the manifest
    #[serde(default)]
    pub tracked_resources: Vec<TrackedResource>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ReconciliationRequest {
    /// Create a request for a component in a namespace
    pub fn new(component: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Decode a request body in the shape of the given contract version
    pub fn decode(version: &ContractVersion, body: &[u8]) -> Result<Self, Error> {
        // Every contract version shares one shape so far
        serde_json::from_slice(body).map_err(|e| {
            Error::configuration(format!(
                "failed to decode {} reconciliation request: {}",
                version, e
            ))
        })
    }

    /// The namespace to use, falling back to [`DEFAULT_NAMESPACE`]
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// Resources a run waits for: manifest workloads plus explicit ones
    pub fn tracked_resources(&self) -> Result<Vec<TrackedResource>, Error> {
        let mut resources = match self.manifest.as_deref() {
            Some(manifest) => tracked_resources_from_manifest(manifest, self.namespace())?,
            None => Vec::new(),
        };
        for resource in &self.tracked_resources {
            let mut resource = resource.clone();
            if resource.kind.is_namespaced() && resource.namespace.is_empty() {
                resource.namespace = self.namespace().to_string();
            }
            resources.push(resource);
        }
        resources.sort();
        resources.dedup();
        Ok(resources)
    }
}
