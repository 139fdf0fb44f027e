//! Built-in install action: server-side apply of the request manifest
//!
//! Objects are applied in two phases so that freshly installed CRDs are
//! known to discovery before the custom resources that use them:
//! Namespaces and CRDs first, then everything else ordered by kind.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, info};

use keel_common::Error;

use crate::action::{Action, ActionContext, Stage};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "keel";

/// Apply priority of a kind (lower applies first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" | "Job" | "Pod" => 7,
        _ => 10,
    }
}

fn is_foundational(kind: &str) -> bool {
    kind == "Namespace" || kind == "CustomResourceDefinition"
}

/// Split a `apiVersion` into group and version
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// One manifest document ready to apply
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestObject {
    /// Group/version/kind of the object
    pub gvk: GroupVersionKind,
    /// metadata.name
    pub name: String,
    /// metadata.namespace, when set
    pub namespace: Option<String>,
    /// The full object
    pub data: serde_json::Value,
}

/// Parse a multi-document manifest into apply order (foundational, rest)
pub fn plan_manifest(
    manifest: &str,
) -> Result<(Vec<ManifestObject>, Vec<ManifestObject>), Error> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let data = serde_json::Value::deserialize(document)
            .map_err(|e| Error::action(Stage::Install.as_str(), format!("invalid manifest: {}", e)))?;
        if data.is_null() {
            continue;
        }

        let field = |pointer: &str| data.pointer(pointer).and_then(|v| v.as_str());
        let (Some(api_version), Some(kind), Some(name)) =
            (field("/apiVersion"), field("/kind"), field("/metadata/name"))
        else {
            return Err(Error::action(
                Stage::Install.as_str(),
                "manifest document needs apiVersion, kind and metadata.name",
            ));
        };

        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind {
            group,
            version,
            kind: kind.to_string(),
        };
        let name = name.to_string();
        let namespace = field("/metadata/namespace").map(str::to_string);
        objects.push(ManifestObject {
            gvk,
            name,
            namespace,
            data,
        });
    }

    let (mut foundational, mut rest): (Vec<_>, Vec<_>) = objects
        .into_iter()
        .partition(|o| is_foundational(&o.gvk.kind));
    foundational.sort_by_key(|o| kind_priority(&o.gvk.kind));
    rest.sort_by_key(|o| kind_priority(&o.gvk.kind));
    Ok((foundational, rest))
}

/// Install action applying `request.manifest` to the target cluster
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyManifest;

#[async_trait]
impl Action for ApplyManifest {
    async fn run(&self, ctx: &ActionContext) -> Result<(), Error> {
        let Some(manifest) = ctx.request.manifest.as_deref() else {
            debug!("request has no manifest, nothing to apply");
            return Ok(());
        };
        let (foundational, rest) = plan_manifest(manifest)?;
        let client = ctx.client.kube_client();
        let namespace = ctx.request.namespace();

        for phase in [foundational, rest] {
            if phase.is_empty() {
                continue;
            }
            // Discovery is refreshed per phase to pick up new CRDs
            let discovery = Discovery::new(client.clone()).run().await.map_err(|e| {
                Error::action(Stage::Install.as_str(), format!("API discovery failed: {}", e))
            })?;
            for object in &phase {
                apply_object(&client, &discovery, object, namespace).await?;
            }
        }

        info!(component = %ctx.request.component, "manifest applied");
        Ok(())
    }
}

async fn apply_object(
    client: &Client,
    discovery: &Discovery,
    object: &ManifestObject,
    default_namespace: &str,
) -> Result<(), Error> {
    let (resource, capabilities) = discovery.resolve_gvk(&object.gvk).ok_or_else(|| {
        Error::action(
            Stage::Install.as_str(),
            format!(
                "unknown resource type {}/{}",
                object.gvk.api_version(),
                object.gvk.kind
            ),
        )
    })?;

    let api: Api<DynamicObject> = match capabilities.scope {
        Scope::Namespaced => {
            let namespace = object.namespace.as_deref().unwrap_or(default_namespace);
            Api::namespaced_with(client.clone(), namespace, &resource)
        }
        Scope::Cluster => Api::all_with(client.clone(), &resource),
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&object.name, &params, &Patch::Apply(&object.data))
        .await
        .map_err(|e| {
            Error::action(
                Stage::Install.as_str(),
                format!("failed to apply {}/{}: {}", object.gvk.kind, object.name, e),
            )
        })?;

    debug!(kind = %object.gvk.kind, name = %object.name, "applied object");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
---
apiVersion: v1
kind: Namespace
metadata:
  name: shop
---
apiVersion: example.io/v1
kind: Widget
metadata:
  name: w
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: shop
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.io
"#;

    fn kinds(objects: &[ManifestObject]) -> Vec<&str> {
        objects.iter().map(|o| o.gvk.kind.as_str()).collect()
    }

    #[test]
    fn story_foundational_objects_apply_first() {
        let (foundational, rest) = plan_manifest(MANIFEST).unwrap();
        assert_eq!(kinds(&foundational), vec!["Namespace", "CustomResourceDefinition"]);
        assert_eq!(kinds(&rest), vec!["ConfigMap", "Deployment", "Widget"]);
        assert_eq!(rest[0].namespace.as_deref(), Some("shop"));
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn test_incomplete_document_is_an_install_error() {
        let err = plan_manifest("kind: Deployment\nmetadata:\n  name: api\n").unwrap_err();
        assert!(matches!(err, Error::Action { ref stage, .. } if stage == "install"));
    }

    #[test]
    fn test_kind_priority_orders_workloads_after_config() {
        assert!(kind_priority("ConfigMap") < kind_priority("Deployment"));
        assert!(kind_priority("Deployment") < kind_priority("ValidatingWebhookConfiguration"));
    }
}
