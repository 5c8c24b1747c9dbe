//! Deployment pipeline
//!
//! Activates approved versions, evaluates them against the baseline captured
//! at activation, and rolls them back. Every mutation of an agent's
//! deployments runs under that agent's lock and lands in a single batch, so
//! there is never more than one active deployment per agent and the
//! active-version pointer always follows it.

use chrono::{DateTime, Duration, Utc};
use pvc_store::{
    status_write, AgentId, Deployment, DeploymentId, DeploymentStatus, LockKey, PromptStore,
    RegressionReport, ReportId, Severity, StoreError, UserId, VersionId, VersionStatus,
    VersionStore, Write, WriteBatch,
};
use std::sync::Arc;

use crate::collab::{require_role, MetricsSource, ReviewerDirectory};
use crate::config::ReleaseConfig;
use crate::error::{ReleaseError, ReleaseResult};
use crate::regression::RegressionEvaluator;

/// Deploys, evaluates and rolls back prompt versions
pub struct DeploymentPipeline<S> {
    versions: VersionStore<S>,
    directory: Arc<dyn ReviewerDirectory>,
    metrics: Arc<dyn MetricsSource>,
    evaluator: RegressionEvaluator,
    config: Arc<ReleaseConfig>,
}

impl<S> Clone for DeploymentPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            versions: self.versions.clone(),
            directory: Arc::clone(&self.directory),
            metrics: Arc::clone(&self.metrics),
            evaluator: self.evaluator.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S> std::fmt::Debug for DeploymentPipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPipeline")
            .field("config", &self.config.deployment)
            .field("evaluator", &self.evaluator)
            .finish_non_exhaustive()
    }
}

/// Writes that revert `target` to its predecessor
struct RollbackPlan {
    batch: WriteBatch,
    restored: Deployment,
}

impl<S: PromptStore> DeploymentPipeline<S> {
    /// Create the pipeline
    pub fn new(
        versions: VersionStore<S>,
        directory: Arc<dyn ReviewerDirectory>,
        metrics: Arc<dyn MetricsSource>,
        config: Arc<ReleaseConfig>,
    ) -> Self {
        Self {
            versions,
            directory,
            metrics,
            evaluator: RegressionEvaluator::new(config.regression.clone()),
            config,
        }
    }

    fn store(&self) -> &S {
        self.versions.store()
    }

    fn now(&self) -> DateTime<Utc> {
        self.versions.clock().now()
    }

    /// Activate an approved version.
    ///
    /// Captures the baseline over the configured trailing window, supersedes
    /// the agent's current deployment and retires its version, then marks the
    /// new version as production.
    pub async fn deploy(
        &self,
        version_id: VersionId,
        deployed_by: &UserId,
    ) -> ReleaseResult<Deployment> {
        require_role(
            self.directory.as_ref(),
            deployed_by,
            &self.config.deployment.deployer_roles,
            "deploy prompt versions",
        )
        .await?;

        let agent = self.versions.get_version(version_id).await?.agent_id;
        let _guard = self.store().lock(LockKey::Agent(agent.clone())).await?;

        // re-read under the lock; the status may have moved
        let version = self.versions.get_version(version_id).await?;
        if version.status != VersionStatus::Approved {
            return Err(ReleaseError::Validation(format!(
                "version {version_id} is {}, only approved versions can be deployed",
                version.status
            )));
        }

        let now = self.now();
        let window = Duration::hours(i64::from(self.config.deployment.baseline_window_hours));
        let baseline = self.metrics.snapshot(&agent, now - window, now).await?;

        let previous = self.store().active_deployment(&agent).await?;
        let deployment = Deployment {
            id: DeploymentId::new(),
            agent_id: agent.clone(),
            version_id,
            deployed_by: deployed_by.clone(),
            deployed_at: now,
            status: DeploymentStatus::Active,
            previous_deployment_id: previous.as_ref().map(|d| d.id),
            metrics_before: baseline,
            metrics_after: None,
            regression_detected: false,
        };

        let mut batch = WriteBatch::new();
        if let Some(mut prior) = previous {
            let prior_version = self.versions.get_version(prior.version_id).await?;
            prior.status = DeploymentStatus::Superseded {
                superseded_at: now,
                superseded_by: deployment.id,
            };
            batch.push(Write::PutDeployment(prior));
            batch.extend(status_write(&prior_version, VersionStatus::Retired)?);
        }
        batch.push(Write::PutDeployment(deployment.clone()));
        batch.extend(status_write(&version, VersionStatus::Production)?);
        batch.push(Write::SetActiveVersion {
            agent_id: agent.clone(),
            version_id: Some(version_id),
        });
        self.store().commit(batch).await?;

        tracing::info!(
            agent = %agent,
            version = %version_id,
            deployment = %deployment.id,
            "Deployed v{} by {} (baseline from {} samples)",
            version.version_number,
            deployed_by,
            deployment.metrics_before.sample_count
        );
        Ok(deployment)
    }

    /// Compare a deployment's current metrics with its baseline.
    ///
    /// The report is always persisted. A critical regression on the active
    /// deployment triggers an automatic rollback when enabled; if that
    /// rollback fails, the report is stored without the rollback flag and the
    /// failure is returned.
    pub async fn evaluate_regression(
        &self,
        deployment_id: DeploymentId,
    ) -> ReleaseResult<RegressionReport> {
        let deployment = self.store().get_deployment(deployment_id).await?;
        let now = self.now();
        let after = self
            .metrics
            .snapshot(&deployment.agent_id, deployment.deployed_at, now)
            .await?;

        let _guard = self
            .store()
            .lock(LockKey::Agent(deployment.agent_id.clone()))
            .await?;
        let mut deployment = self.store().get_deployment(deployment_id).await?;

        let assessment = self.evaluator.evaluate(&deployment.metrics_before, &after);
        deployment.metrics_after = Some(after);
        deployment.regression_detected = assessment.detected;

        let mut report = RegressionReport {
            id: ReportId::new(),
            deployment_id,
            agent_id: deployment.agent_id.clone(),
            detected: assessment.detected,
            severity: assessment.severity,
            deltas: assessment.deltas,
            sample_size_sufficient: assessment.sample_size_sufficient,
            recommendations: assessment.recommendations,
            evaluated_at: now,
            auto_rollback_triggered: false,
        };

        let wants_rollback = report.severity == Severity::Critical
            && self.config.deployment.auto_rollback
            && deployment.is_active();

        if wants_rollback {
            let actor = self.config.deployment.system_actor.clone();
            let reason = format!("automatic rollback: critical regression in report {}", report.id);
            match self.plan_rollback(&deployment, &actor, Some(reason)).await {
                Ok(plan) => {
                    report.auto_rollback_triggered = true;
                    let mut batch = plan.batch;
                    batch.push(Write::PutRegressionReport(report.clone()));
                    self.store().commit(batch).await?;
                    tracing::warn!(
                        agent = %report.agent_id,
                        deployment = %deployment_id,
                        restored = %plan.restored.id,
                        "Critical regression, rolled back automatically"
                    );
                    return Ok(report);
                }
                Err(err) => {
                    self.store()
                        .commit(
                            WriteBatch::new()
                                .with(Write::PutDeployment(deployment))
                                .with(Write::PutRegressionReport(report)),
                        )
                        .await?;
                    tracing::error!(
                        deployment = %deployment_id,
                        error = %err,
                        "Critical regression, automatic rollback failed"
                    );
                    return Err(err);
                }
            }
        }

        self.store()
            .commit(
                WriteBatch::new()
                    .with(Write::PutDeployment(deployment))
                    .with(Write::PutRegressionReport(report.clone())),
            )
            .await?;

        if report.detected {
            tracing::warn!(
                agent = %report.agent_id,
                deployment = %deployment_id,
                severity = %report.severity,
                "Regression detected"
            );
        } else {
            tracing::info!(deployment = %deployment_id, "No regression detected");
        }
        Ok(report)
    }

    /// Revert a deployment to the one it superseded.
    ///
    /// Returns the restored deployment.
    pub async fn rollback(
        &self,
        deployment_id: DeploymentId,
        rolled_back_by: &UserId,
        reason: Option<String>,
    ) -> ReleaseResult<Deployment> {
        require_role(
            self.directory.as_ref(),
            rolled_back_by,
            &self.config.deployment.deployer_roles,
            "roll back deployments",
        )
        .await?;

        let agent = self.store().get_deployment(deployment_id).await?.agent_id;
        let _guard = self.store().lock(LockKey::Agent(agent)).await?;
        let target = self.store().get_deployment(deployment_id).await?;

        let plan = self.plan_rollback(&target, rolled_back_by, reason).await?;
        self.store().commit(plan.batch).await?;

        tracing::info!(
            agent = %target.agent_id,
            deployment = %deployment_id,
            restored = %plan.restored.id,
            "Rolled back by {}",
            rolled_back_by
        );
        Ok(plan.restored)
    }

    /// Build the rollback writes; caller holds the agent lock
    async fn plan_rollback(
        &self,
        target: &Deployment,
        by: &UserId,
        reason: Option<String>,
    ) -> ReleaseResult<RollbackPlan> {
        match &target.status {
            DeploymentStatus::Active => {}
            other => {
                return Err(ReleaseError::Conflict(format!(
                    "deployment {} is {other}, only the active deployment can be rolled back",
                    target.id
                )))
            }
        }

        let previous_id = target
            .previous_deployment_id
            .ok_or(ReleaseError::NoPriorDeployment(target.id))?;
        let mut previous = match self.store().get_deployment(previous_id).await {
            Ok(previous) => previous,
            Err(StoreError::NotFound { .. }) => {
                return Err(ReleaseError::DataIntegrity(format!(
                    "deployment {} references missing predecessor {previous_id}",
                    target.id
                )))
            }
            Err(err) => return Err(err.into()),
        };
        if !matches!(previous.status, DeploymentStatus::Superseded { .. }) {
            return Err(ReleaseError::DataIntegrity(format!(
                "predecessor {previous_id} of active deployment {} is {}",
                target.id, previous.status
            )));
        }

        let now = self.now();
        let target_version = self.versions.get_version(target.version_id).await?;
        let previous_version = self.versions.get_version(previous.version_id).await?;

        let mut rolled_back = target.clone();
        rolled_back.status = DeploymentStatus::RolledBack {
            rolled_back_by: by.clone(),
            rolled_back_at: now,
            reason: reason.filter(|r| !r.trim().is_empty()),
        };
        previous.status = DeploymentStatus::Active;

        let mut batch = WriteBatch::new();
        batch.push(Write::PutDeployment(rolled_back));
        batch.push(Write::PutDeployment(previous.clone()));
        batch.extend(status_write(&target_version, VersionStatus::Candidate)?);
        batch.extend(status_write(&previous_version, VersionStatus::Production)?);
        batch.push(Write::SetActiveVersion {
            agent_id: target.agent_id.clone(),
            version_id: Some(previous.version_id),
        });

        Ok(RollbackPlan {
            batch,
            restored: previous,
        })
    }

    /// Read a deployment
    pub async fn get_deployment(&self, id: DeploymentId) -> ReleaseResult<Deployment> {
        Ok(self.store().get_deployment(id).await?)
    }

    /// Deployment history of an agent, newest first
    pub async fn list_deployments(&self, agent: &AgentId) -> ReleaseResult<Vec<Deployment>> {
        Ok(self.store().list_deployments(agent).await?)
    }

    /// The agent's active deployment
    pub async fn active_deployment(&self, agent: &AgentId) -> ReleaseResult<Option<Deployment>> {
        Ok(self.store().active_deployment(agent).await?)
    }

    /// Latest regression report of a deployment
    pub async fn get_regression_report(
        &self,
        deployment_id: DeploymentId,
    ) -> ReleaseResult<Option<RegressionReport>> {
        self.store().get_deployment(deployment_id).await?;
        Ok(self.store().latest_regression_report(deployment_id).await?)
    }
}
