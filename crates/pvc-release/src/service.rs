//! Prompt registry
//!
//! Wires the version store, lineage engine, approval workflow and deployment
//! pipeline over one shared store, clock and configuration.

use pvc_lineage::LineageEngine;
use pvc_store::{Clock, PromptStore, VersionStore};
use std::sync::Arc;

use crate::approval::ApprovalWorkflow;
use crate::collab::{MetricsSource, ReviewerDirectory};
use crate::config::ReleaseConfig;
use crate::deployment::DeploymentPipeline;
use crate::error::ReleaseResult;

/// Entry point to the release pipeline of every agent
pub struct PromptRegistry<S> {
    config: Arc<ReleaseConfig>,
    versions: VersionStore<S>,
    lineage: LineageEngine<S>,
    approvals: ApprovalWorkflow<S>,
    deployments: DeploymentPipeline<S>,
}

impl<S> std::fmt::Debug for PromptRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> Clone for PromptRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            versions: self.versions.clone(),
            lineage: self.lineage.clone(),
            approvals: self.approvals.clone(),
            deployments: self.deployments.clone(),
        }
    }
}

impl<S: PromptStore> PromptRegistry<S> {
    /// Create a registry.
    ///
    /// Fails with a configuration error if `config` does not validate.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn ReviewerDirectory>,
        metrics: Arc<dyn MetricsSource>,
        config: ReleaseConfig,
    ) -> ReleaseResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let versions = VersionStore::new(store, clock);

        tracing::debug!(
            quorum = config.approval.default_required_approvals,
            auto_rollback = config.deployment.auto_rollback,
            "Prompt registry initialised"
        );
        Ok(Self {
            lineage: LineageEngine::new(versions.clone()),
            approvals: ApprovalWorkflow::new(
                versions.clone(),
                Arc::clone(&directory),
                Arc::clone(&config),
            ),
            deployments: DeploymentPipeline::new(
                versions.clone(),
                directory,
                metrics,
                Arc::clone(&config),
            ),
            versions,
            config,
        })
    }

    /// Versions and branches
    #[inline]
    #[must_use]
    pub fn versions(&self) -> &VersionStore<S> {
        &self.versions
    }

    /// Ancestry and merging
    #[inline]
    #[must_use]
    pub fn lineage(&self) -> &LineageEngine<S> {
        &self.lineage
    }

    /// Review workflow
    #[inline]
    #[must_use]
    pub fn approvals(&self) -> &ApprovalWorkflow<S> {
        &self.approvals
    }

    /// Deployments and regression evaluation
    #[inline]
    #[must_use]
    pub fn deployments(&self) -> &DeploymentPipeline<S> {
        &self.deployments
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }
}
