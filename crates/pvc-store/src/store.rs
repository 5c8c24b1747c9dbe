//! Storage trait and atomic write batches

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::ids::{AgentId, ApprovalId, BranchId, DeploymentId, VersionId};
use crate::model::{
    ApprovalRequest, ApprovalVote, Branch, Deployment, PromptVersion, RegressionReport,
    VersionStatus,
};

/// Scope of a serialization lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Deployments and the active-version pointer of one agent
    Agent(AgentId),
    /// Version numbering and merge bookkeeping of one branch
    Branch(BranchId),
    /// Approval requests and votes of one version
    Approval(VersionId),
}

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert a new version
    PutVersion(PromptVersion),
    /// Change a version's status
    SetVersionStatus {
        /// Version
        version_id: VersionId,
        /// New status
        status: VersionStatus,
    },
    /// Insert or replace a branch
    PutBranch(Branch),
    /// Remove a branch record, keeping its versions.
    ///
    /// Refused while the branch is unmerged and one of its versions is under
    /// review (judged at `checked_at`) or is the agent's active version.
    DeleteBranch {
        /// Branch
        branch_id: BranchId,
        /// Instant at which approval expiry is judged
        checked_at: DateTime<Utc>,
    },
    /// Insert or replace an approval request
    PutApproval(ApprovalRequest),
    /// Insert a vote
    PutVote(ApprovalVote),
    /// Insert or replace a deployment
    PutDeployment(Deployment),
    /// Repoint (or clear) an agent's active version
    SetActiveVersion {
        /// Agent
        agent_id: AgentId,
        /// Version now served
        version_id: Option<VersionId>,
    },
    /// Store the latest regression report of a deployment
    PutRegressionReport(RegressionReport),
}

/// Ordered set of writes committed atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    /// Empty batch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write
    #[inline]
    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    /// Append a write (builder form)
    #[inline]
    #[must_use]
    pub fn with(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    /// Append every write from `writes`
    #[inline]
    pub fn extend(&mut self, writes: impl IntoIterator<Item = Write>) -> &mut Self {
        self.writes.extend(writes);
        self
    }

    /// Number of writes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the batch is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Borrow the writes in order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Write> {
        self.writes.iter()
    }

    /// Consume the batch
    #[inline]
    #[must_use]
    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Persistence layer for prompt versions, approvals and deployments.
///
/// ## Atomicity
///
/// Every mutation goes through [`commit`](PromptStore::commit): the batch is
/// applied in order and either fully succeeds or leaves the store untouched.
/// Implementations re-check the structural invariants during commit (gapless
/// version numbers, one vote per reviewer, at most one pending request per
/// version, at most one active deployment per agent, no deletion of a branch
/// that is under review or served) and abort the batch on violation.
///
/// ## Serialization
///
/// Read-then-write sequences (quorum increment, deployment chaining, version
/// numbering) hold the guard returned by [`lock`](PromptStore::lock) for the
/// relevant [`LockKey`] from the first read to the commit. For a relational
/// backend this maps to a row lock or advisory lock scoped to the key.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so components can share
/// them across tasks.
#[async_trait]
pub trait PromptStore: Send + Sync + 'static {
    /// Guard held while a key is locked; dropping it releases the lock.
    type Guard: Send;

    // ── Serialization & writes ───────────────────────────────────────────────

    /// Acquire the lock for `key`, waiting for any current holder.
    async fn lock(&self, key: LockKey) -> Result<Self::Guard, StoreError>;

    /// Apply `batch` atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    // ── Versions & branches ──────────────────────────────────────────────────

    /// Read a version.
    ///
    /// Returns `Err(StoreError::NotFound)` if absent.
    async fn get_version(&self, id: VersionId) -> Result<PromptVersion, StoreError>;

    /// All versions of an agent in creation order.
    async fn list_agent_versions(&self, agent: &AgentId) -> Result<Vec<PromptVersion>, StoreError>;

    /// Versions on a branch, newest first, optionally filtered by status.
    async fn list_branch_versions(
        &self,
        branch: BranchId,
        status: Option<VersionStatus>,
    ) -> Result<Vec<PromptVersion>, StoreError>;

    /// Highest version number on a branch, `None` when the branch is empty.
    async fn latest_version_number(&self, branch: BranchId) -> Result<Option<u64>, StoreError>;

    /// Read a branch.
    ///
    /// Returns `Err(StoreError::NotFound)` if absent.
    async fn get_branch(&self, id: BranchId) -> Result<Branch, StoreError>;

    /// Look up a branch by name.
    async fn find_branch(&self, agent: &AgentId, name: &str) -> Result<Option<Branch>, StoreError>;

    /// Branches of an agent in creation order.
    async fn list_branches(&self, agent: &AgentId) -> Result<Vec<Branch>, StoreError>;

    /// Pointer to the version currently served for an agent.
    async fn active_version(&self, agent: &AgentId) -> Result<Option<VersionId>, StoreError>;

    // ── Approvals ────────────────────────────────────────────────────────────

    /// Most recent approval request for a version.
    async fn latest_approval(&self, version: VersionId)
        -> Result<Option<ApprovalRequest>, StoreError>;

    /// Latest request of every version, optionally restricted to one agent.
    async fn list_approvals(
        &self,
        agent: Option<&AgentId>,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    /// Votes on a request in the order they were cast.
    async fn list_votes(&self, request: ApprovalId) -> Result<Vec<ApprovalVote>, StoreError>;

    // ── Deployments ──────────────────────────────────────────────────────────

    /// Read a deployment.
    ///
    /// Returns `Err(StoreError::NotFound)` if absent.
    async fn get_deployment(&self, id: DeploymentId) -> Result<Deployment, StoreError>;

    /// The agent's active deployment, if any.
    async fn active_deployment(&self, agent: &AgentId) -> Result<Option<Deployment>, StoreError>;

    /// Deployment history of an agent, newest first.
    async fn list_deployments(&self, agent: &AgentId) -> Result<Vec<Deployment>, StoreError>;

    /// Latest regression report of a deployment.
    async fn latest_regression_report(
        &self,
        deployment: DeploymentId,
    ) -> Result<Option<RegressionReport>, StoreError>;
}
