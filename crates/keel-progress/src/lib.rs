//! Workload readiness tracking
//!
//! Decides per Kubernetes kind whether a rolled-out object has converged and
//! waits for a set of them to do so:
//!
//! - [`resource`]: tracked resource identity and manifest scanning
//! - [`client`]: the cluster reads readiness checks need
//! - [`ready`]: per-kind predicates (Deployment, StatefulSet, DaemonSet, Pod, Job)
//! - [`replicaset`]: current ReplicaSet selection for Deployments
//! - [`crd`]: CustomResourceDefinition predicates for v1 and v1beta1
//! - [`tracker`]: the polling loop

#![deny(missing_docs)]

pub mod client;
pub mod crd;
pub mod ready;
pub mod replicaset;
pub mod resource;
pub mod tracker;

pub use client::{ClusterClient, CrdApiVersion, KubeClusterClient};
pub use ready::is_resource_ready;
pub use resource::{tracked_resources_from_manifest, TrackedResource, WorkloadKind};
pub use tracker::ProgressTracker;
