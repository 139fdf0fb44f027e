//! Component reconciliation engine
//!
//! Installs a component through a pipeline of actions, waits until its
//! workloads are ready and reports progress to the caller, retrying failed
//! attempts. Runs are started in-process with
//! [`ComponentReconciler::start_local`] or over HTTP with
//! [`ComponentReconciler::start_remote`].

#![deny(missing_docs)]

pub mod action;
pub mod apply;
pub mod callback;
pub mod config;
pub mod connector;
pub mod model;
pub mod reconciler;
pub mod runner;
pub mod server;
pub mod status;

pub use action::{Action, ActionContext, ActionPipeline, Stage};
pub use apply::ApplyManifest;
pub use callback::{CallbackHandler, LocalCallback, RemoteCallback, StatusFn};
pub use config::{ReconcilerConfig, ReconcilerConfigBuilder};
pub use connector::{ClusterConnector, KubeConnector};
pub use model::{ContractVersion, ReconciliationRequest};
pub use reconciler::ComponentReconciler;
pub use status::Status;
