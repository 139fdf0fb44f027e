//! Per-kind readiness predicates
//!
//! Each predicate fetches the current object and answers:
//! - `Ok(true)` the object has converged
//! - `Ok(false)` not ready yet (keep waiting)
//! - `Err(_)` readiness could not be determined (fetch failed)
//!
//! The pure `*_ready` functions hold the rollout rules and are what the
//! async predicates evaluate after fetching.

use k8s_openapi::api::apps::v1::{DaemonSet, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

use keel_common::kube_utils::all_conditions_true;
use keel_common::Error;

use crate::client::{ClusterClient, CrdApiVersion};
use crate::crd::{is_crd_ready, is_crd_v1beta1_ready};
use crate::replicaset::current_replica_set;
use crate::resource::{TrackedResource, WorkloadKind};

/// Ready replicas the current ReplicaSet of a Deployment must report
const EXPECTED_READY_REPLICAS: i32 = 1;
/// Ready pods a DaemonSet must report
const EXPECTED_READY_DAEMON_SET: i32 = 1;
/// Pod phase of a running pod
const POD_RUNNING: &str = "Running";

/// Check any tracked resource, dispatching on its kind
///
/// CRDs are read through whichever apiextensions version the cluster serves.
/// Any failure is reported as [`Error::ReadinessFetch`] naming the resource.
pub async fn is_resource_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    dispatch(client, resource).await.map_err(|e| match e {
        Error::ReadinessFetch { .. } => e,
        other => Error::readiness_fetch(resource.to_string(), other.to_string()),
    })
}

async fn dispatch(client: &dyn ClusterClient, resource: &TrackedResource) -> Result<bool, Error> {
    match resource.kind {
        WorkloadKind::Deployment => is_deployment_ready(client, resource).await,
        WorkloadKind::StatefulSet => is_stateful_set_ready(client, resource).await,
        WorkloadKind::DaemonSet => is_daemon_set_ready(client, resource).await,
        WorkloadKind::Pod => is_pod_ready(client, resource).await,
        WorkloadKind::Job => is_job_ready(client, resource).await,
        WorkloadKind::CustomResourceDefinition => match client.crd_api_version().await? {
            CrdApiVersion::V1 => is_crd_ready(client, resource).await,
            CrdApiVersion::V1Beta1 => is_crd_v1beta1_ready(client, resource).await,
        },
    }
}

/// A Deployment is ready when its current ReplicaSet has a ready replica
pub async fn is_deployment_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let deployment = client
        .get_deployment(&resource.namespace, &resource.name)
        .await?;

    match current_replica_set(client, &deployment).await? {
        Some(replica_set) => Ok(replica_set_ready(&replica_set)),
        None => Ok(false),
    }
}

/// Readiness of the current ReplicaSet of a Deployment
pub fn replica_set_ready(replica_set: &ReplicaSet) -> bool {
    replica_set
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0)
        >= EXPECTED_READY_REPLICAS
}

/// A StatefulSet is ready when the partition-aware rollout has completed
pub async fn is_stateful_set_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let stateful_set = client
        .get_stateful_set(&resource.namespace, &resource.name)
        .await?;
    Ok(stateful_set_ready(&stateful_set))
}

/// `updated == replicas - partition` and `ready == replicas`
///
/// Replicas default to 1 and the partition to 0 when unset.
pub fn stateful_set_ready(stateful_set: &StatefulSet) -> bool {
    let spec = stateful_set.spec.as_ref();
    let replicas = spec.and_then(|s| s.replicas).unwrap_or(1);
    let partition = spec
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|strategy| strategy.rolling_update.as_ref())
        .and_then(|rolling| rolling.partition)
        .unwrap_or(0);

    let status = stateful_set.status.as_ref();
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);

    let expected_updated = replicas.saturating_sub(partition);
    if updated != expected_updated {
        return false;
    }
    ready == replicas
}

/// A DaemonSet is ready when every node runs the updated pod and one is ready
pub async fn is_daemon_set_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let daemon_set = client
        .get_daemon_set(&resource.namespace, &resource.name)
        .await?;
    Ok(daemon_set_ready(&daemon_set))
}

/// `updatedNumberScheduled == desiredNumberScheduled` and `numberReady >= 1`
pub fn daemon_set_ready(daemon_set: &DaemonSet) -> bool {
    let Some(status) = daemon_set.status.as_ref() else {
        return false;
    };
    if status.updated_number_scheduled.unwrap_or(0) != status.desired_number_scheduled {
        return false;
    }
    status.number_ready >= EXPECTED_READY_DAEMON_SET
}

/// A Pod is ready when running, all conditions hold and it is not terminating
pub async fn is_pod_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let pod = client.get_pod(&resource.namespace, &resource.name).await?;
    Ok(pod_ready(&pod))
}

/// Phase Running, every condition "True", no deletion timestamp
pub fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some(POD_RUNNING) {
        return false;
    }
    if !all_conditions_true(status.conditions.as_deref()) {
        return false;
    }
    // A deletion timestamp marks the pod as terminating
    pod.metadata.deletion_timestamp.is_none()
}

/// A Job is ready when every reported condition is true
pub async fn is_job_ready(
    client: &dyn ClusterClient,
    resource: &TrackedResource,
) -> Result<bool, Error> {
    let job = client.get_job(&resource.namespace, &resource.name).await?;
    Ok(job_ready(&job))
}

/// Every condition "True"; vacuously ready without conditions
pub fn job_ready(job: &Job) -> bool {
    all_conditions_true(
        job.status
            .as_ref()
            .and_then(|status| status.conditions.as_deref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::replicaset::DEFAULT_DEPLOYMENT_UNIQUE_LABEL_KEY;
    use k8s_openapi::api::apps::v1::{
        DaemonSetStatus, Deployment, DeploymentSpec, ReplicaSetSpec, ReplicaSetStatus,
        RollingUpdateStatefulSetStrategy, StatefulSetSpec, StatefulSetStatus,
        StatefulSetUpdateStrategy,
    };
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelector, ObjectMeta, OwnerReference, Time,
    };
    use std::collections::BTreeMap;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn app_labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "web".to_string())])
    }

    fn pod_template() -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(app_labels()),
                ..Default::default()
            }),
            spec: None,
        }
    }

    fn deployment() -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("web-uid".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(app_labels()),
                    ..Default::default()
                },
                template: pod_template(),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn owned_replica_set(ready_replicas: i32) -> ReplicaSet {
        let mut template = pod_template();
        if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
            labels.insert(
                DEFAULT_DEPLOYMENT_UNIQUE_LABEL_KEY.to_string(),
                "5d8f".to_string(),
            );
        }
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some("web-5d8f".to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(vec![OwnerReference {
                    uid: "web-uid".to_string(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                template: Some(template),
                ..Default::default()
            }),
            status: Some(ReplicaSetStatus {
                ready_replicas: Some(ready_replicas),
                ..Default::default()
            }),
        }
    }

    fn stateful_set(
        replicas: Option<i32>,
        partition: Option<i32>,
        updated: i32,
        ready: i32,
    ) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas,
                update_strategy: Some(StatefulSetUpdateStrategy {
                    rolling_update: Some(RollingUpdateStatefulSetStrategy {
                        partition,
                        ..Default::default()
                    }),
                    type_: Some("RollingUpdate".to_string()),
                }),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                updated_replicas: Some(updated),
                ready_replicas: Some(ready),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn daemon_set(desired: i32, updated: i32, ready: i32) -> DaemonSet {
        DaemonSet {
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                updated_number_scheduled: Some(updated),
                number_ready: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(phase: &str, conditions: &[&str], terminating: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                deletion_timestamp: terminating.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(
                    conditions
                        .iter()
                        .map(|s| PodCondition {
                            type_: "Ready".to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn job(conditions: Option<&[&str]>) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: conditions.map(|c| {
                    c.iter()
                        .map(|s| JobCondition {
                            type_: "Complete".to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn tracked(kind: WorkloadKind, name: &str) -> TrackedResource {
        TrackedResource::new(kind, "default", name)
    }

    fn mock_deployment(replica_sets: Vec<ReplicaSet>) -> MockClusterClient {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment().returning(|_, _| Ok(deployment()));
        mock.expect_list_replica_sets()
            .returning(move |_, _| Ok(replica_sets.clone()));
        mock
    }

    // =========================================================================
    // Deployment
    // =========================================================================

    #[tokio::test]
    async fn story_deployment_ready_with_ready_current_replica_set() {
        let mock = mock_deployment(vec![owned_replica_set(1)]);
        let web = tracked(WorkloadKind::Deployment, "web");
        assert!(is_deployment_ready(&mock, &web).await.unwrap());
    }

    #[tokio::test]
    async fn story_deployment_not_ready_without_ready_replicas() {
        let mock = mock_deployment(vec![owned_replica_set(0)]);
        let web = tracked(WorkloadKind::Deployment, "web");
        assert!(!is_deployment_ready(&mock, &web).await.unwrap());
    }

    #[tokio::test]
    async fn story_deployment_without_replica_sets_is_not_ready_and_not_an_error() {
        let mock = mock_deployment(vec![]);
        let web = tracked(WorkloadKind::Deployment, "web");
        assert!(!is_deployment_ready(&mock, &web).await.unwrap());
    }

    #[tokio::test]
    async fn test_deployment_fetch_error_is_distinct_from_not_ready() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_deployment()
            .returning(|_, _| Err(Error::internal("connection refused")));
        let web = tracked(WorkloadKind::Deployment, "web");
        assert!(is_deployment_ready(&mock, &web).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_reports_fetch_failures_with_the_resource() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_pod()
            .returning(|_, _| Err(Error::internal("connection refused")));
        let web = tracked(WorkloadKind::Pod, "web-0");

        match is_resource_ready(&mock, &web).await {
            Err(Error::ReadinessFetch { resource, message }) => {
                assert_eq!(resource, "Pod/default/web-0");
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected ReadinessFetch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_readiness_is_idempotent_on_unchanged_state() {
        let mock = mock_deployment(vec![owned_replica_set(1)]);
        let web = tracked(WorkloadKind::Deployment, "web");
        let first = is_resource_ready(&mock, &web).await.unwrap();
        let second = is_resource_ready(&mock, &web).await.unwrap();
        assert_eq!(first, second);
    }

    // =========================================================================
    // StatefulSet
    // =========================================================================

    #[test]
    fn story_stateful_set_partitioned_rollout_is_ready() {
        assert!(stateful_set_ready(&stateful_set(Some(3), Some(1), 2, 3)));
    }

    #[test]
    fn story_stateful_set_pending_update_is_not_ready() {
        assert!(!stateful_set_ready(&stateful_set(Some(3), Some(1), 1, 3)));
        assert!(!stateful_set_ready(&stateful_set(Some(3), Some(1), 1, 1)));
    }

    #[test]
    fn test_stateful_set_defaults() {
        // replicas default 1, partition default 0
        assert!(stateful_set_ready(&stateful_set(None, None, 1, 1)));
        assert!(!stateful_set_ready(&stateful_set(None, None, 1, 0)));
        assert!(!stateful_set_ready(&StatefulSet::default()));
    }

    #[test]
    fn test_stateful_set_needs_all_replicas_ready() {
        assert!(!stateful_set_ready(&stateful_set(Some(3), Some(0), 3, 2)));
        assert!(stateful_set_ready(&stateful_set(Some(3), Some(0), 3, 3)));
    }

    // =========================================================================
    // DaemonSet / Pod / Job
    // =========================================================================

    #[test]
    fn test_daemon_set_readiness() {
        assert!(daemon_set_ready(&daemon_set(3, 3, 1)));
        assert!(!daemon_set_ready(&daemon_set(3, 2, 3)));
        assert!(!daemon_set_ready(&daemon_set(3, 3, 0)));
        assert!(!daemon_set_ready(&DaemonSet::default()));
    }

    #[test]
    fn test_pod_readiness() {
        assert!(pod_ready(&pod("Running", &["True", "True"], false)));
        assert!(!pod_ready(&pod("Pending", &["True"], false)));
        assert!(!pod_ready(&pod("Running", &["True", "False"], false)));
        assert!(!pod_ready(&Pod::default()));
    }

    #[test]
    fn story_terminating_pod_is_not_ready() {
        assert!(!pod_ready(&pod("Running", &["True"], true)));
    }

    #[test]
    fn test_job_readiness() {
        assert!(job_ready(&job(Some(&["True"]))));
        assert!(!job_ready(&job(Some(&["True", "False"]))));
        assert!(job_ready(&job(None)));
        assert!(job_ready(&Job::default()));
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_stateful_set()
            .returning(|_, _| Ok(stateful_set(Some(2), None, 2, 2)));
        mock.expect_get_daemon_set()
            .returning(|_, _| Ok(daemon_set(1, 0, 1)));
        mock.expect_get_pod()
            .returning(|_, _| Ok(pod("Running", &["True"], false)));
        mock.expect_get_job().returning(|_, _| Ok(job(None)));

        let cases = [
            (WorkloadKind::StatefulSet, true),
            (WorkloadKind::DaemonSet, false),
            (WorkloadKind::Pod, true),
            (WorkloadKind::Job, true),
        ];
        for (kind, expected) in cases {
            let ready = is_resource_ready(&mock, &tracked(kind, "x")).await.unwrap();
            assert_eq!(ready, expected, "unexpected readiness for {}", kind);
        }
    }

    #[tokio::test]
    async fn story_crd_dispatch_follows_served_api_version() {
        let mut mock = MockClusterClient::new();
        mock.expect_crd_api_version()
            .returning(|| Ok(CrdApiVersion::V1Beta1));
        mock.expect_get_crd().never();
        mock.expect_get_crd_v1beta1().returning(|name| {
            let ar = kube::discovery::ApiResource::erase::<
                k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
            >(&());
            Ok(kube::api::DynamicObject::new(name, &ar).data(serde_json::json!({
                "status": {"conditions": [{"type": "Established", "status": "True"}]}
            })))
        });

        let crd = TrackedResource::new(WorkloadKind::CustomResourceDefinition, "", "a.b.io");
        assert!(is_resource_ready(&mock, &crd).await.unwrap());
    }
}
