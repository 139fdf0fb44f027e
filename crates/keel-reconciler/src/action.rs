//! Pluggable install actions
//!
//! Component-specific work is supplied as [`Action`]s plugged into the three
//! stages of an [`ActionPipeline`]. An attempt runs the stages in order and
//! stops at the first failure.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use keel_common::Error;
use keel_progress::ClusterClient;

use crate::model::ReconciliationRequest;

/// Pipeline stage an action is plugged into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Before the component is installed
    PreInstall,
    /// Installs the component
    Install,
    /// After the component is installed
    PostInstall,
}

impl Stage {
    /// All stages in execution order
    pub const ORDER: [Stage; 3] = [Stage::PreInstall, Stage::Install, Stage::PostInstall];

    /// Stage name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreInstall => "pre-install",
            Stage::Install => "install",
            Stage::PostInstall => "post-install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an action gets to work with
#[derive(Clone)]
pub struct ActionContext {
    /// Component version being installed
    pub version: String,
    /// The request being reconciled
    pub request: Arc<ReconciliationRequest>,
    /// Access to the target cluster
    pub client: Arc<dyn ClusterClient>,
}

/// A unit of component-specific work
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action against the target cluster
    async fn run(&self, ctx: &ActionContext) -> Result<(), Error>;
}

/// Ordered pre-install, install and post-install actions
#[derive(Clone, Default)]
pub struct ActionPipeline {
    pre_install: Option<Arc<dyn Action>>,
    install: Option<Arc<dyn Action>>,
    post_install: Option<Arc<dyn Action>>,
}

impl ActionPipeline {
    /// A pipeline without actions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pre-install action
    pub fn with_pre_install(mut self, action: Arc<dyn Action>) -> Self {
        self.pre_install = Some(action);
        self
    }

    /// Set the install action
    pub fn with_install(mut self, action: Arc<dyn Action>) -> Self {
        self.install = Some(action);
        self
    }

    /// Set the post-install action
    pub fn with_post_install(mut self, action: Arc<dyn Action>) -> Self {
        self.post_install = Some(action);
        self
    }

    fn stage(&self, stage: Stage) -> Option<&Arc<dyn Action>> {
        match stage {
            Stage::PreInstall => self.pre_install.as_ref(),
            Stage::Install => self.install.as_ref(),
            Stage::PostInstall => self.post_install.as_ref(),
        }
    }

    /// Run the configured stages in order
    ///
    /// Missing stages are skipped. The first failure aborts the pipeline and
    /// is returned as [`Error::Action`] naming its stage.
    pub async fn execute(&self, ctx: &ActionContext) -> Result<(), Error> {
        for stage in Stage::ORDER {
            let Some(action) = self.stage(stage) else {
                debug!(%stage, "no action configured, skipping");
                continue;
            };

            info!(%stage, version = %ctx.version, "running action");
            action.run(ctx).await.map_err(|e| match e {
                Error::Action { .. } => e,
                other => Error::action(stage.as_str(), other.to_string()),
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPipeline")
            .field("pre_install", &self.pre_install.is_some())
            .field("install", &self.install.is_some())
            .field("post_install", &self.post_install.is_some())
            .finish()
    }
}
