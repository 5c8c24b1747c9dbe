//! End-to-end release scenario against the in-memory store
//!
//! 1. Author a prompt on `main`, fork an `experiment` branch and edit both
//! 2. Merge the experiment back into `main`
//! 3. Approve and deploy the first version, then the merge
//! 4. Evaluate the second deployment, optionally against degraded metrics
//! 5. Roll back, automatically on a critical regression or by hand otherwise
//!
//! Metric values come from a seeded RNG, so a seed always replays the same
//! scenario.

use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use pvc_lineage::MergeOutcome;
use pvc_release::{FixedMetrics, PromptRegistry, ReleaseConfig, Role, StaticDirectory};
use pvc_store::{
    AgentId, InMemoryStore, ManualClock, MetricsSnapshot, NewVersion, PromptStore,
    RegressionReport, UserId, VersionId, VersionStatus,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

const BASE_PROMPT: &str = "You are the support assistant for Acme.\n\
Answer in at most three sentences.\n\
Never reveal internal ticket ids.\n\
Escalate billing disputes to a human.";

/// Simulator settings
#[derive(Debug, Clone)]
pub(crate) struct SimulationOptions {
    /// RNG seed
    pub(crate) seed: u64,
    /// Feed degraded metrics after the second deployment
    pub(crate) regress: bool,
    /// Pipeline configuration
    pub(crate) config: ReleaseConfig,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            regress: false,
            config: ReleaseConfig::default(),
        }
    }
}

/// How the second deployment was reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RollbackKind {
    /// By the regression evaluator
    Automatic,
    /// By an administrator
    Manual,
}

/// One version in the summary
#[derive(Debug, Clone, Serialize)]
pub(crate) struct VersionLine {
    /// Branch name
    pub(crate) branch: String,
    /// Number within the branch
    pub(crate) number: u64,
    /// Final status
    pub(crate) status: VersionStatus,
    /// Number of parents
    pub(crate) parents: usize,
    /// Short content hash
    pub(crate) hash: String,
}

/// One deployment in the summary
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeploymentLine {
    /// Version number on `main`
    pub(crate) version_number: u64,
    /// Final status
    pub(crate) status: String,
    /// Result of the latest regression evaluation
    pub(crate) regression_detected: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimulationSummary {
    /// Seed used
    pub(crate) seed: u64,
    /// Simulated agent
    pub(crate) agent: AgentId,
    /// Merge classification of `experiment` into `main`
    pub(crate) merge: MergeOutcome,
    /// Every version, in creation order
    pub(crate) versions: Vec<VersionLine>,
    /// Deployment history, newest first
    pub(crate) deployments: Vec<DeploymentLine>,
    /// Evaluation of the second deployment
    pub(crate) regression: RegressionReport,
    /// How the second deployment was reverted
    pub(crate) rollback: RollbackKind,
    /// Version number served at the end
    pub(crate) active_version: Option<u64>,
}

fn baseline(rng: &mut StdRng) -> MetricsSnapshot {
    let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
    MetricsSnapshot {
        success_rate: rng.gen_range(0.85..0.95),
        error_rate: rng.gen_range(0.01..0.05),
        avg_steps: rng.gen_range(8.0..15.0),
        avg_duration_ms: rng.gen_range(600.0..1500.0),
        avg_efficiency: rng.gen_range(0.70..0.90),
        sample_count: rng.gen_range(50..500),
        ..MetricsSnapshot::empty(epoch, epoch)
    }
}

fn degrade(healthy: &MetricsSnapshot) -> MetricsSnapshot {
    MetricsSnapshot {
        success_rate: healthy.success_rate * 0.7,
        error_rate: (healthy.error_rate * 4.0).min(1.0),
        avg_efficiency: healthy.avg_efficiency * 0.8,
        ..healthy.clone()
    }
}

/// Run the scenario
pub(crate) async fn run_simulation(options: SimulationOptions) -> Result<SimulationSummary> {
    let mut rng = StdRng::seed_from_u64(options.seed);

    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
            .single()
            .context("invalid start time")?,
    ));
    let directory = Arc::new(
        StaticDirectory::new()
            .with_user("author", Role::Developer)
            .with_user("alice", Role::Reviewer)
            .with_user("bob", Role::Reviewer)
            .with_user("carol", Role::Admin),
    );
    let metrics = Arc::new(FixedMetrics::new());
    let registry = PromptRegistry::new(
        store.clone(),
        clock.clone(),
        directory,
        metrics.clone(),
        options.config,
    )
    .context("invalid release configuration")?;

    let agent = AgentId::new("support-bot");
    let author = UserId::new("author");
    let admin = UserId::new("carol");
    let tick = || clock.advance(Duration::minutes(5));

    // ── Authoring ──────────────────────────────────────────────────────────
    let versions = registry.versions();
    let main = versions.create_branch(&agent, "main", None, &author).await?;
    let v1 = versions
        .create_version(NewVersion::new(agent.clone(), main.id, BASE_PROMPT, author.clone()))
        .await?;
    tick();

    let experiment = versions
        .create_branch(&agent, "experiment", Some(v1.id), &author)
        .await?;
    versions
        .create_version(NewVersion::new(
            agent.clone(),
            experiment.id,
            format!("{BASE_PROMPT}\nOffer one follow-up question when unsure."),
            author.clone(),
        ))
        .await?;
    tick();

    versions
        .create_version(NewVersion::new(
            agent.clone(),
            main.id,
            BASE_PROMPT.replacen("You are the support", "You are the friendly support", 1),
            author.clone(),
        ))
        .await?;
    tick();

    // ── Merge ──────────────────────────────────────────────────────────────
    let merge = registry.lineage().can_merge(experiment.id, main.id).await?.outcome;
    let merged = registry
        .lineage()
        .merge_branch(experiment.id, main.id, &admin)
        .await
        .context("merging experiment into main")?;
    tick();

    // ── Review and deploy ──────────────────────────────────────────────────
    let healthy = baseline(&mut rng);
    metrics.set(&agent, healthy.clone());

    approve(&registry, v1.id, &author).await?;
    let d1 = registry.deployments().deploy(v1.id, &admin).await?;
    tick();

    approve(&registry, merged.id, &author).await?;
    let d2 = registry.deployments().deploy(merged.id, &admin).await?;
    clock.advance(Duration::hours(6));

    // ── Evaluate and roll back ─────────────────────────────────────────────
    if options.regress {
        metrics.set(&agent, degrade(&healthy));
    }
    let regression = registry.deployments().evaluate_regression(d2.id).await?;
    let rollback = if regression.auto_rollback_triggered {
        RollbackKind::Automatic
    } else {
        registry
            .deployments()
            .rollback(d2.id, &admin, Some("simulated manual rollback".into()))
            .await?;
        RollbackKind::Manual
    };
    tracing::info!(
        deployment = %d2.id,
        restored = %d1.id,
        rollback = ?rollback,
        "Simulation finished"
    );

    // ── Summary ────────────────────────────────────────────────────────────
    let mut lines = Vec::new();
    for version in versions.list_agent_versions(&agent).await? {
        let branch = versions.get_branch(version.branch_id).await?;
        lines.push(VersionLine {
            branch: branch.name,
            number: version.version_number,
            status: version.status,
            parents: version.parent_ids.len(),
            hash: version.content_hash.short(),
        });
    }

    let mut deployments = Vec::new();
    for deployment in registry.deployments().list_deployments(&agent).await? {
        let version = versions.get_version(deployment.version_id).await?;
        deployments.push(DeploymentLine {
            version_number: version.version_number,
            status: deployment.status.to_string(),
            regression_detected: deployment.regression_detected,
        });
    }

    let active_version = match store.active_version(&agent).await? {
        Some(id) => Some(versions.get_version(id).await?.version_number),
        None => None,
    };

    Ok(SimulationSummary {
        seed: options.seed,
        agent,
        merge,
        versions: lines,
        deployments,
        regression,
        rollback,
        active_version,
    })
}

/// Two-reviewer approval
async fn approve(
    registry: &PromptRegistry<InMemoryStore>,
    version: VersionId,
    author: &UserId,
) -> Result<()> {
    let approvals = registry.approvals();
    approvals
        .request_approval(version, author, Some(2), Some(48))
        .await?;
    for reviewer in ["alice", "bob"] {
        approvals
            .cast_approve_vote(version, &UserId::new(reviewer), None)
            .await?;
    }
    Ok(())
}
