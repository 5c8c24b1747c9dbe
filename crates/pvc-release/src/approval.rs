//! Approval workflow
//!
//! A request moves `pending -> {approved, rejected, expired}`; all three
//! outcomes are terminal. [`transition`] is the pure state function; the
//! workflow wraps it with role checks, lazy expiry and the per-version lock
//! that makes the quorum increment atomic.

use chrono::{DateTime, Duration, Utc};
use pvc_store::{
    status_write, AgentId, ApprovalId, ApprovalRequest, ApprovalStatus, ApprovalVote,
    LockKey, PromptStore, StoreError, UserId, VersionId, VersionStatus, VersionStore,
    VoteDecision, VoteId, Write, WriteBatch,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::collab::{require_role, ReviewerDirectory};
use crate::config::ReleaseConfig;
use crate::error::{ReleaseError, ReleaseResult};

/// Input to [`transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalEvent {
    /// One approve vote
    Approve {
        /// Voter
        reviewer: UserId,
    },
    /// A veto
    Reject {
        /// Voter
        reviewer: UserId,
    },
    /// Window elapsed
    Expire,
}

/// Apply `event` to a pending request
pub fn transition(
    request: &ApprovalRequest,
    event: &ApprovalEvent,
    now: DateTime<Utc>,
) -> ReleaseResult<ApprovalRequest> {
    if !request.status.is_pending() {
        return Err(ReleaseError::Conflict(format!(
            "approval request {} is already {}",
            request.id, request.status
        )));
    }

    let mut next = request.clone();
    match event {
        ApprovalEvent::Approve { .. } => {
            if request.current_approvals >= request.required_approvals {
                return Err(ReleaseError::DataIntegrity(format!(
                    "pending request {} already has {} of {} approvals",
                    request.id, request.current_approvals, request.required_approvals
                )));
            }
            next.current_approvals += 1;
            if next.current_approvals == next.required_approvals {
                next.status = ApprovalStatus::Approved { approved_at: now };
            }
        }
        ApprovalEvent::Reject { reviewer } => {
            next.status = ApprovalStatus::Rejected {
                rejected_by: reviewer.clone(),
                rejected_at: now,
            };
        }
        ApprovalEvent::Expire => {
            next.status = ApprovalStatus::Expired {
                expired_at: request.expires_at.unwrap_or(now),
            };
        }
    }
    Ok(next)
}

/// Request with its votes, as seen at read time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalView {
    /// The request, status with expiry applied
    pub request: ApprovalRequest,
    /// Votes in cast order
    pub votes: Vec<ApprovalVote>,
    /// Whether the version may be deployed
    pub can_deploy: bool,
}

impl ApprovalView {
    fn new(request: ApprovalRequest, votes: Vec<ApprovalVote>) -> Self {
        let can_deploy = request.status.is_approved();
        Self {
            request,
            votes,
            can_deploy,
        }
    }
}

/// Quorum review of prompt versions
pub struct ApprovalWorkflow<S> {
    versions: VersionStore<S>,
    directory: Arc<dyn ReviewerDirectory>,
    config: Arc<ReleaseConfig>,
}

impl<S> Clone for ApprovalWorkflow<S> {
    fn clone(&self) -> Self {
        Self {
            versions: self.versions.clone(),
            directory: Arc::clone(&self.directory),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S> std::fmt::Debug for ApprovalWorkflow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalWorkflow")
            .field("config", &self.config.approval)
            .finish_non_exhaustive()
    }
}

impl<S: PromptStore> ApprovalWorkflow<S> {
    /// Create the workflow
    pub fn new(
        versions: VersionStore<S>,
        directory: Arc<dyn ReviewerDirectory>,
        config: Arc<ReleaseConfig>,
    ) -> Self {
        Self {
            versions,
            directory,
            config,
        }
    }

    fn store(&self) -> &S {
        self.versions.store()
    }

    fn now(&self) -> DateTime<Utc> {
        self.versions.clock().now()
    }

    /// Open a review of a candidate version.
    ///
    /// `required_approvals` defaults to the configured quorum. A pending
    /// request past its expiry does not block a new one; it is persisted as
    /// expired in the same commit.
    pub async fn request_approval(
        &self,
        version_id: VersionId,
        requested_by: &UserId,
        required_approvals: Option<u32>,
        expires_in_hours: Option<u32>,
    ) -> ReleaseResult<ApprovalRequest> {
        if requested_by.is_blank() {
            return Err(ReleaseError::Validation("requester is required".into()));
        }
        let limits = &self.config.approval;
        let required = required_approvals.unwrap_or(limits.default_required_approvals);
        if required == 0 || required > limits.max_required_approvals {
            return Err(ReleaseError::Validation(format!(
                "required approvals must be between 1 and {}",
                limits.max_required_approvals
            )));
        }
        if let Some(hours) = expires_in_hours {
            if hours == 0 || hours > limits.max_expiry_hours {
                return Err(ReleaseError::Validation(format!(
                    "expiry must be between 1 and {} hours",
                    limits.max_expiry_hours
                )));
            }
        }

        let _guard = self.store().lock(LockKey::Approval(version_id)).await?;
        let version = self.versions.get_version(version_id).await?;
        let now = self.now();

        let mut batch = WriteBatch::new();
        if let Some(existing) = self.store().latest_approval(version_id).await? {
            if existing.is_past_expiry(now) {
                batch.push(Write::PutApproval(transition(&existing, &ApprovalEvent::Expire, now)?));
            } else if existing.status.is_pending() {
                return Err(ReleaseError::Conflict(format!(
                    "version {version_id} already has pending request {}",
                    existing.id
                )));
            }
        }

        if version.status != VersionStatus::Candidate {
            return Err(ReleaseError::Validation(format!(
                "version {version_id} is {}, only candidates can be reviewed",
                version.status
            )));
        }

        let request = ApprovalRequest {
            id: ApprovalId::new(),
            version_id,
            agent_id: version.agent_id.clone(),
            requested_by: requested_by.clone(),
            required_approvals: required,
            current_approvals: 0,
            expires_at: expires_in_hours.map(|h| now + Duration::hours(i64::from(h))),
            created_at: now,
            status: ApprovalStatus::Pending,
        };
        batch.push(Write::PutApproval(request.clone()));
        self.store().commit(batch).await?;

        tracing::info!(
            agent = %request.agent_id,
            version = %version_id,
            request = %request.id,
            "Approval requested by {} (quorum {})",
            requested_by,
            required
        );
        Ok(request)
    }

    /// Load the request under the version lock and apply lazy expiry.
    ///
    /// Returns the still-pending request; an expired one is persisted and
    /// reported as `Expired`.
    async fn open_request(&self, version_id: VersionId) -> ReleaseResult<ApprovalRequest> {
        let request = self
            .store()
            .latest_approval(version_id)
            .await?
            .ok_or_else(|| StoreError::not_found("approval request", version_id))?;

        let now = self.now();
        if request.is_past_expiry(now) {
            let expired = transition(&request, &ApprovalEvent::Expire, now)?;
            self.store()
                .commit(WriteBatch::new().with(Write::PutApproval(expired)))
                .await?;
            tracing::warn!(
                version = %version_id,
                request = %request.id,
                "Vote refused: request expired"
            );
            return Err(ReleaseError::Expired {
                request: request.id,
                expired_at: request.expires_at.unwrap_or(now),
            });
        }
        if !request.status.is_pending() {
            return Err(ReleaseError::Conflict(format!(
                "approval request {} is already {}",
                request.id, request.status
            )));
        }
        Ok(request)
    }

    fn check_first_vote(
        votes: &[ApprovalVote],
        request: &ApprovalRequest,
        reviewer: &UserId,
    ) -> ReleaseResult<()> {
        if votes.iter().any(|v| &v.reviewer == reviewer) {
            return Err(ReleaseError::Conflict(format!(
                "{reviewer} already voted on request {}",
                request.id
            )));
        }
        Ok(())
    }

    /// Cast an approve vote; the vote that reaches quorum also approves the
    /// version.
    pub async fn cast_approve_vote(
        &self,
        version_id: VersionId,
        approver: &UserId,
        reason: Option<String>,
    ) -> ReleaseResult<ApprovalView> {
        require_role(
            self.directory.as_ref(),
            approver,
            &self.config.approval.approver_roles,
            "approve prompt versions",
        )
        .await?;

        let _guard = self.store().lock(LockKey::Approval(version_id)).await?;
        let request = self.open_request(version_id).await?;
        let mut votes = self.store().list_votes(request.id).await?;
        Self::check_first_vote(&votes, &request, approver)?;

        let now = self.now();
        let updated = transition(
            &request,
            &ApprovalEvent::Approve {
                reviewer: approver.clone(),
            },
            now,
        )?;
        let vote = ApprovalVote {
            id: VoteId::new(),
            request_id: request.id,
            reviewer: approver.clone(),
            decision: VoteDecision::Approve,
            reason: reason.filter(|r| !r.trim().is_empty()),
            cast_at: now,
        };

        let mut batch = WriteBatch::new()
            .with(Write::PutVote(vote.clone()))
            .with(Write::PutApproval(updated.clone()));
        if updated.status.is_approved() {
            let version = self.versions.get_version(version_id).await?;
            batch.extend(status_write(&version, VersionStatus::Approved)?);
        }
        self.store().commit(batch).await?;

        if updated.status.is_approved() {
            tracing::info!(
                agent = %updated.agent_id,
                version = %version_id,
                request = %updated.id,
                "Quorum reached ({}/{}), version approved",
                updated.current_approvals,
                updated.required_approvals
            );
        } else {
            tracing::info!(
                version = %version_id,
                request = %updated.id,
                "Approve vote by {} ({}/{})",
                approver,
                updated.current_approvals,
                updated.required_approvals
            );
        }

        votes.push(vote);
        Ok(ApprovalView::new(updated, votes))
    }

    /// Veto a request; the version returns to candidate.
    pub async fn cast_reject_vote(
        &self,
        version_id: VersionId,
        approver: &UserId,
        reason: &str,
    ) -> ReleaseResult<ApprovalView> {
        if reason.trim().is_empty() {
            return Err(ReleaseError::Validation("a rejection needs a reason".into()));
        }
        require_role(
            self.directory.as_ref(),
            approver,
            &self.config.approval.approver_roles,
            "reject prompt versions",
        )
        .await?;

        let _guard = self.store().lock(LockKey::Approval(version_id)).await?;
        let request = self.open_request(version_id).await?;
        let mut votes = self.store().list_votes(request.id).await?;
        Self::check_first_vote(&votes, &request, approver)?;

        let now = self.now();
        let updated = transition(
            &request,
            &ApprovalEvent::Reject {
                reviewer: approver.clone(),
            },
            now,
        )?;
        let vote = ApprovalVote {
            id: VoteId::new(),
            request_id: request.id,
            reviewer: approver.clone(),
            decision: VoteDecision::Reject,
            reason: Some(reason.to_string()),
            cast_at: now,
        };

        let version = self.versions.get_version(version_id).await?;
        let mut batch = WriteBatch::new()
            .with(Write::PutVote(vote.clone()))
            .with(Write::PutApproval(updated.clone()));
        batch.extend(status_write(&version, VersionStatus::Candidate)?);
        self.store().commit(batch).await?;

        tracing::warn!(
            agent = %updated.agent_id,
            version = %version_id,
            request = %updated.id,
            "Rejected by {}: {}",
            approver,
            reason
        );

        votes.push(vote);
        Ok(ApprovalView::new(updated, votes))
    }

    /// Latest request of a version with its votes
    pub async fn get_approval_status(&self, version_id: VersionId) -> ReleaseResult<ApprovalView> {
        let mut request = self
            .store()
            .latest_approval(version_id)
            .await?
            .ok_or_else(|| StoreError::not_found("approval request", version_id))?;
        request.status = request.effective_status(self.now());
        let votes = self.store().list_votes(request.id).await?;
        Ok(ApprovalView::new(request, votes))
    }

    /// Requests still collecting votes, oldest first
    pub async fn list_pending_approvals(
        &self,
        agent: Option<&AgentId>,
    ) -> ReleaseResult<Vec<ApprovalRequest>> {
        let now = self.now();
        Ok(self
            .store()
            .list_approvals(agent)
            .await?
            .into_iter()
            .filter(|r| r.effective_status(now).is_pending())
            .collect())
    }
}
