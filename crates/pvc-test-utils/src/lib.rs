//! Testing utilities for the PVC workspace
//!
//! A [`Harness`] wires a [`PromptRegistry`] over an in-memory store, a manual
//! clock, a fixed reviewer directory and scripted metrics.

#![allow(missing_docs)]

use chrono::{Duration, TimeZone, Utc};
use pvc_release::{FixedMetrics, PromptRegistry, ReleaseConfig, Role, StaticDirectory};
use pvc_store::{
    AgentId, Branch, InMemoryStore, ManualClock, MetricsSnapshot, NewVersion, PromptVersion,
    UserId, VersionId,
};
use std::sync::Arc;

pub const AUTHOR: &str = "erin";
pub const REVIEWER_A: &str = "alice";
pub const REVIEWER_B: &str = "bob";
pub const ADMIN: &str = "carol";
pub const DEVELOPER: &str = "dave";

pub fn user(name: &str) -> UserId {
    UserId::new(name)
}

pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_user(REVIEWER_A, Role::Reviewer)
        .with_user(REVIEWER_B, Role::Reviewer)
        .with_user(ADMIN, Role::Admin)
        .with_user(DEVELOPER, Role::Developer)
        .with_user(AUTHOR, Role::Developer)
}

/// Snapshot with the given rates over `samples` trajectories
pub fn metrics(
    success_rate: f64,
    error_rate: f64,
    efficiency: f64,
    samples: u64,
) -> MetricsSnapshot {
    let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    MetricsSnapshot {
        success_rate,
        error_rate,
        avg_steps: 12.0,
        avg_duration_ms: 850.0,
        avg_efficiency: efficiency,
        sample_count: samples,
        ..MetricsSnapshot::empty(epoch, epoch)
    }
}

pub fn healthy_metrics() -> MetricsSnapshot {
    metrics(0.92, 0.02, 0.80, 200)
}

/// Error rate many times the healthy baseline
pub fn degraded_metrics() -> MetricsSnapshot {
    metrics(0.60, 0.30, 0.55, 200)
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub directory: Arc<StaticDirectory>,
    pub metrics: Arc<FixedMetrics>,
    pub registry: PromptRegistry<InMemoryStore>,
    pub agent: AgentId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReleaseConfig::default())
    }

    pub fn with_config(config: ReleaseConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let directory = Arc::new(directory());
        let metrics = Arc::new(FixedMetrics::new());
        let registry = PromptRegistry::new(
            store.clone(),
            clock.clone(),
            directory.clone(),
            metrics.clone(),
            config,
        )
        .unwrap();

        Self {
            store,
            clock,
            directory,
            metrics,
            registry,
            agent: AgentId::new("support-bot"),
        }
    }

    pub fn advance(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }

    pub async fn branch(&self, name: &str, base: Option<VersionId>) -> Branch {
        self.registry
            .versions()
            .create_branch(&self.agent, name, base, &user(AUTHOR))
            .await
            .unwrap()
    }

    pub async fn main_branch(&self) -> Branch {
        match self.registry.versions().find_branch(&self.agent, "main").await.unwrap() {
            Some(branch) => branch,
            None => self.branch("main", None).await,
        }
    }

    /// New candidate on `branch`, one minute after the previous write
    pub async fn commit(&self, branch: &Branch, content: &str) -> PromptVersion {
        self.advance(1);
        self.registry
            .versions()
            .create_version(NewVersion::new(self.agent.clone(), branch.id, content, AUTHOR))
            .await
            .unwrap()
    }

    /// New candidate on `main`
    pub async fn seed_candidate(&self, content: &str) -> PromptVersion {
        let main = self.main_branch().await;
        self.commit(&main, content).await
    }

    /// Request a single-approval review and approve it as `alice`
    pub async fn approve(&self, version: VersionId) {
        let approvals = self.registry.approvals();
        approvals
            .request_approval(version, &user(AUTHOR), Some(1), None)
            .await
            .unwrap();
        let view = approvals
            .cast_approve_vote(version, &user(REVIEWER_A), None)
            .await
            .unwrap();
        assert!(view.can_deploy);
    }

    /// Candidate, approved and ready to deploy
    pub async fn approved_version(&self, content: &str) -> PromptVersion {
        let version = self.seed_candidate(content).await;
        self.approve(version.id).await;
        self.registry.versions().get_version(version.id).await.unwrap()
    }

    pub async fn status_of(&self, version: VersionId) -> pvc_store::VersionStatus {
        self.registry.versions().get_version(version).await.unwrap().status
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
