//! Records persisted by the prompt store
//!
//! Defines the data model shared by every component:
//! - Prompt versions and branches (the version graph)
//! - Approval requests and votes
//! - Deployments, metric snapshots and regression reports
//!
//! Status fields are tagged enums carrying the data of the transition that
//! produced them, so a rejected request always knows who rejected it and a
//! rolled-back deployment always knows who rolled it back.

use crate::hash::ContentHash;
use crate::ids::{
    AgentId, ApprovalId, BranchId, DeploymentId, ReportId, UserId, VersionId, VoteId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Versions ────────────────────────────────────────────────────────────────

/// Lifecycle status of a prompt version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Editable, not yet approved
    Candidate,
    /// Passed quorum review, deployable
    Approved,
    /// Served by the agent's active deployment
    Production,
    /// Previously in production, superseded by a newer deployment
    Retired,
}

impl VersionStatus {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Approved => "approved",
            Self::Production => "production",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a version was derived from its parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Hand edit
    Edit,
    /// Automated mutation of a single parent
    Mutation,
    /// Recombination of several parents
    Crossover,
    /// Branch merge
    Merge,
}

/// Optional record of the change that produced a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    /// Kind of change
    pub kind: MutationKind,
    /// Free-form description
    pub description: String,
}

impl MutationDescriptor {
    /// Create a descriptor
    #[inline]
    #[must_use]
    pub fn new(kind: MutationKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// Head-to-head evaluation summary attached to a version
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessSummary {
    /// Fraction of comparisons won
    pub win_rate: f64,
    /// Fraction of successful trajectories
    pub success_rate: f64,
    /// Number of comparisons behind the rates
    pub comparisons: u32,
}

/// One immutable revision of an agent's prompt
///
/// Only `status` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    /// Identity
    pub id: VersionId,
    /// Owning agent
    pub agent_id: AgentId,
    /// Branch the version was created on
    pub branch_id: BranchId,
    /// Sequential, gapless number within (agent, branch), starting at 1
    pub version_number: u64,
    /// Prompt payload
    pub content: String,
    /// Blake3 digest of `content`
    pub content_hash: ContentHash,
    /// Lifecycle status
    pub status: VersionStatus,
    /// Ordered parents: one for a linear edit, two or more for a merge
    pub parent_ids: Vec<VersionId>,
    /// Author
    pub created_by: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// How the version was derived
    pub mutation: Option<MutationDescriptor>,
    /// Evaluation summary, if any
    pub fitness: Option<FitnessSummary>,
}

impl PromptVersion {
    /// True for versions with two or more parents
    #[inline]
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() >= 2
    }

    /// True for versions without parents
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }
}

/// Named line of development for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Identity
    pub id: BranchId,
    /// Owning agent
    pub agent_id: AgentId,
    /// Name, unique per agent
    pub name: String,
    /// Version the branch was forked from
    pub base_version: Option<VersionId>,
    /// Creator
    pub created_by: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set once the branch has been folded into another
    pub merged_at: Option<DateTime<Utc>>,
    /// Branch this one was merged into
    pub merged_into: Option<BranchId>,
}

impl Branch {
    /// Whether the branch has been merged
    #[inline]
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

// ── Approvals ───────────────────────────────────────────────────────────────

/// Status of an approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Collecting votes
    Pending,
    /// Quorum reached
    Approved {
        /// When the deciding vote landed
        approved_at: DateTime<Utc>,
    },
    /// Vetoed by a reviewer
    Rejected {
        /// Reviewer who rejected
        rejected_by: UserId,
        /// When
        rejected_at: DateTime<Utc>,
    },
    /// Window elapsed before quorum
    Expired {
        /// The request's expiry time
        expired_at: DateTime<Utc>,
    },
}

impl ApprovalStatus {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
            Self::Expired { .. } => "expired",
        }
    }

    /// Whether the request still accepts votes
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether the request reached quorum
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review of one prompt version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Identity
    pub id: ApprovalId,
    /// Version under review
    pub version_id: VersionId,
    /// Agent owning the version
    pub agent_id: AgentId,
    /// Requester
    pub requested_by: UserId,
    /// Quorum size (at least 1)
    pub required_approvals: u32,
    /// Approve votes so far, never above `required_approvals`
    pub current_approvals: u32,
    /// Votes are refused at or after this instant
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Stored status
    pub status: ApprovalStatus,
}

impl ApprovalRequest {
    /// Whether a stored-pending request has passed its expiry
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending() && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Status as observed at `now`.
    ///
    /// Expiry is applied lazily, so a request stored as pending may already be
    /// logically expired.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> ApprovalStatus {
        match self.expires_at {
            Some(expired_at) if self.is_past_expiry(now) => ApprovalStatus::Expired { expired_at },
            _ => self.status.clone(),
        }
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    /// Counts toward quorum
    Approve,
    /// Vetoes the request
    Reject,
}

/// A single reviewer's vote on a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalVote {
    /// Identity
    pub id: VoteId,
    /// Request voted on
    pub request_id: ApprovalId,
    /// Voter
    pub reviewer: UserId,
    /// Decision
    pub decision: VoteDecision,
    /// Justification, mandatory for rejections
    pub reason: Option<String>,
    /// When the vote was cast
    pub cast_at: DateTime<Utc>,
}

// ── Deployments ─────────────────────────────────────────────────────────────

/// Aggregate agent performance over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Fraction of successful trajectories
    pub success_rate: f64,
    /// Fraction of trajectories ending in error
    pub error_rate: f64,
    /// Mean steps per trajectory
    pub avg_steps: f64,
    /// Mean trajectory duration in milliseconds
    pub avg_duration_ms: f64,
    /// Mean efficiency score
    pub avg_efficiency: f64,
    /// Trajectories in the window
    pub sample_count: u64,
    /// Window start (inclusive)
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive)
    pub window_end: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Snapshot of a window with no trajectories
    #[must_use]
    pub fn empty(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            success_rate: 0.0,
            error_rate: 0.0,
            avg_steps: 0.0,
            avg_duration_ms: 0.0,
            avg_efficiency: 0.0,
            sample_count: 0,
            window_start,
            window_end,
        }
    }
}

/// Status of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Serving traffic
    Active,
    /// Replaced by a newer deployment of the same agent
    Superseded {
        /// When it was replaced
        superseded_at: DateTime<Utc>,
        /// Deployment that replaced it
        superseded_by: DeploymentId,
    },
    /// Explicitly reverted (terminal)
    RolledBack {
        /// Who reverted it
        rolled_back_by: UserId,
        /// When
        rolled_back_at: DateTime<Utc>,
        /// Why
        reason: Option<String>,
    },
}

impl DeploymentStatus {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded { .. } => "superseded",
            Self::RolledBack { .. } => "rolled_back",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation of a prompt version for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Identity
    pub id: DeploymentId,
    /// Agent
    pub agent_id: AgentId,
    /// Version activated
    pub version_id: VersionId,
    /// Deployer
    pub deployed_by: UserId,
    /// Activation time
    pub deployed_at: DateTime<Utc>,
    /// Status
    pub status: DeploymentStatus,
    /// Deployment that was active when this one was created
    pub previous_deployment_id: Option<DeploymentId>,
    /// Baseline captured before activation
    pub metrics_before: MetricsSnapshot,
    /// Post-deployment snapshot, set by regression evaluation
    pub metrics_after: Option<MetricsSnapshot>,
    /// Result of the latest regression evaluation
    pub regression_detected: bool,
}

impl Deployment {
    /// Whether this deployment is serving traffic
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status, DeploymentStatus::Active)
    }

    /// Whether this deployment was reverted
    #[inline]
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self.status, DeploymentStatus::RolledBack { .. })
    }
}

// ── Regression reports ──────────────────────────────────────────────────────

/// Regression severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor drift
    Low,
    /// Worth investigating
    Medium,
    /// Consider reverting
    High,
    /// Revert immediately
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// Metric compared across snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Success rate (higher is better)
    SuccessRate,
    /// Error rate (lower is better)
    ErrorRate,
    /// Efficiency (higher is better)
    Efficiency,
}

/// Before/after comparison of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    /// Metric
    pub metric: Metric,
    /// Baseline value
    pub before: f64,
    /// Post-deployment value
    pub after: f64,
    /// `(after - before) / before`; `None` when the baseline is zero
    pub relative_change: Option<f64>,
}

/// Follow-up suggested by a regression evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Keep watching
    Monitor,
    /// Look at trajectories
    Investigate,
    /// Manual rollback advisable
    ConsiderRollback,
    /// Roll back now
    Rollback,
}

/// Structured recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Suggested action
    pub action: RecommendedAction,
    /// Metric that prompted it
    pub metric: Option<Metric>,
    /// Human-readable explanation
    pub message: String,
}

/// Outcome of evaluating a deployment against its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    /// Identity
    pub id: ReportId,
    /// Deployment evaluated
    pub deployment_id: DeploymentId,
    /// Agent
    pub agent_id: AgentId,
    /// Whether any metric crossed its threshold
    pub detected: bool,
    /// Severity (`Low` when nothing was detected)
    pub severity: Severity,
    /// Per-metric comparison
    pub deltas: Vec<MetricDelta>,
    /// Whether both snapshots met the sample floor
    pub sample_size_sufficient: bool,
    /// Suggested follow-ups
    pub recommendations: Vec<Recommendation>,
    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
    /// Whether the evaluation rolled the deployment back
    pub auto_rollback_triggered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(expires_at: Option<DateTime<Utc>>) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: ApprovalId::new(),
            version_id: VersionId::new(),
            agent_id: AgentId::new("agent"),
            requested_by: UserId::new("author"),
            required_approvals: 2,
            current_approvals: 0,
            expires_at,
            created_at: now,
            status: ApprovalStatus::Pending,
        }
    }

    #[test]
    fn pending_request_expires_lazily() {
        let now = Utc::now();
        let req = request(Some(now + Duration::hours(1)));

        assert!(req.effective_status(now).is_pending());
        assert!(!req.is_past_expiry(now));

        let later = now + Duration::hours(2);
        assert!(req.is_past_expiry(later));
        assert_eq!(req.effective_status(later).as_str(), "expired");
        // Stored status untouched
        assert!(req.status.is_pending());
    }

    #[test]
    fn request_without_expiry_never_expires() {
        let req = request(None);
        assert!(req.effective_status(Utc::now() + Duration::days(365)).is_pending());
    }

    #[test]
    fn terminal_request_is_not_reexpired() {
        let now = Utc::now();
        let mut req = request(Some(now));
        req.status = ApprovalStatus::Approved { approved_at: now };
        assert!(req.effective_status(now + Duration::hours(1)).is_approved());
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            [Severity::Low, Severity::High, Severity::Medium].iter().max(),
            Some(&Severity::High)
        );
    }

    #[test]
    fn statuses_serialize_with_tags() {
        let status = DeploymentStatus::RolledBack {
            rolled_back_by: UserId::new("ops"),
            rolled_back_at: Utc::now(),
            reason: Some("errors".into()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "rolled_back");
        assert_eq!(json["rolled_back_by"], "ops");

        let json = serde_json::to_value(VersionStatus::Production).unwrap();
        assert_eq!(json, "production");
    }
}
