//! In-memory [`PromptStore`]
//!
//! Tables are persistent (`im`) maps behind a single `RwLock`. A commit clones
//! the tables (structural sharing keeps this cheap), applies the batch to the
//! clone with full constraint checks, and swaps it in only if every write
//! succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::ids::{AgentId, ApprovalId, BranchId, DeploymentId, VersionId};
use crate::model::{
    ApprovalRequest, ApprovalVote, Branch, Deployment, DeploymentStatus, PromptVersion,
    RegressionReport, VersionStatus,
};
use crate::state::validate_transition;
use crate::store::{LockKey, PromptStore, Write, WriteBatch};

#[derive(Debug, Clone, Default)]
struct Tables {
    versions: im::HashMap<VersionId, PromptVersion>,
    /// branch -> versions in number order
    branch_versions: im::HashMap<BranchId, im::Vector<VersionId>>,
    /// agent -> versions in creation order
    agent_versions: im::HashMap<AgentId, im::Vector<VersionId>>,
    branches: im::HashMap<BranchId, Branch>,
    branch_names: im::HashMap<(AgentId, String), BranchId>,
    agent_branches: im::HashMap<AgentId, im::Vector<BranchId>>,
    approvals: im::HashMap<ApprovalId, ApprovalRequest>,
    /// version -> requests in creation order
    version_approvals: im::HashMap<VersionId, im::Vector<ApprovalId>>,
    votes: im::HashMap<ApprovalId, im::Vector<ApprovalVote>>,
    deployments: im::HashMap<DeploymentId, Deployment>,
    /// agent -> deployments in chronological order
    agent_deployments: im::HashMap<AgentId, im::Vector<DeploymentId>>,
    active_versions: im::HashMap<AgentId, VersionId>,
    reports: im::HashMap<DeploymentId, RegressionReport>,
}

fn append<K, V>(index: &mut im::HashMap<K, im::Vector<V>>, key: K, value: V)
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    let mut values = index.get(&key).cloned().unwrap_or_default();
    values.push_back(value);
    index.insert(key, values);
}

impl Tables {
    fn version(&self, id: VersionId) -> Result<&PromptVersion, StoreError> {
        self.versions
            .get(&id)
            .ok_or_else(|| StoreError::not_found("prompt version", id))
    }

    fn latest_number(&self, branch: BranchId) -> Option<u64> {
        self.branch_versions
            .get(&branch)
            .and_then(|ids| ids.last())
            .and_then(|id| self.versions.get(id))
            .map(|v| v.version_number)
    }

    fn apply(&mut self, write: Write, touched: &mut HashSet<AgentId>) -> Result<(), StoreError> {
        match write {
            Write::PutVersion(version) => self.put_version(version),
            Write::SetVersionStatus { version_id, status } => {
                self.set_version_status(version_id, status)
            }
            Write::PutBranch(branch) => self.put_branch(branch),
            Write::DeleteBranch {
                branch_id,
                checked_at,
            } => self.delete_branch(branch_id, checked_at),
            Write::PutApproval(request) => self.put_approval(request),
            Write::PutVote(vote) => self.put_vote(vote),
            Write::PutDeployment(deployment) => {
                touched.insert(deployment.agent_id.clone());
                self.put_deployment(deployment)
            }
            Write::SetActiveVersion {
                agent_id,
                version_id,
            } => {
                touched.insert(agent_id.clone());
                self.set_active_version(agent_id, version_id)
            }
            Write::PutRegressionReport(report) => {
                if !self.deployments.contains_key(&report.deployment_id) {
                    return Err(StoreError::not_found("deployment", report.deployment_id));
                }
                self.reports.insert(report.deployment_id, report);
                Ok(())
            }
        }
    }

    fn put_version(&mut self, version: PromptVersion) -> Result<(), StoreError> {
        if self.versions.contains_key(&version.id) {
            return Err(StoreError::Conflict(format!(
                "prompt version {} already exists",
                version.id
            )));
        }

        let branch = self
            .branches
            .get(&version.branch_id)
            .ok_or_else(|| StoreError::not_found("branch", version.branch_id))?;
        if branch.agent_id != version.agent_id {
            return Err(StoreError::Validation(format!(
                "branch {} belongs to agent {}, not {}",
                branch.name, branch.agent_id, version.agent_id
            )));
        }

        for parent_id in &version.parent_ids {
            let parent = self.versions.get(parent_id).ok_or_else(|| {
                StoreError::Validation(format!("parent version {parent_id} does not exist"))
            })?;
            if parent.agent_id != version.agent_id {
                return Err(StoreError::Validation(format!(
                    "parent version {parent_id} belongs to agent {}",
                    parent.agent_id
                )));
            }
        }

        let expected = self.latest_number(version.branch_id).unwrap_or(0) + 1;
        if version.version_number != expected {
            return Err(StoreError::Conflict(format!(
                "version number {} on branch {} is out of sequence (expected {expected})",
                version.version_number, branch.name
            )));
        }

        append(&mut self.branch_versions, version.branch_id, version.id);
        append(&mut self.agent_versions, version.agent_id.clone(), version.id);
        self.versions.insert(version.id, version);
        Ok(())
    }

    fn set_version_status(
        &mut self,
        id: VersionId,
        status: VersionStatus,
    ) -> Result<(), StoreError> {
        let mut version = self.version(id)?.clone();
        validate_transition(version.status, status)?;
        version.status = status;
        self.versions.insert(id, version);
        Ok(())
    }

    fn put_branch(&mut self, branch: Branch) -> Result<(), StoreError> {
        match self.branches.get(&branch.id) {
            Some(existing) => {
                if existing.agent_id != branch.agent_id || existing.name != branch.name {
                    return Err(StoreError::Validation(format!(
                        "branch {} cannot change owner or name",
                        branch.id
                    )));
                }
            }
            None => {
                let key = (branch.agent_id.clone(), branch.name.clone());
                if self.branch_names.contains_key(&key) {
                    return Err(StoreError::Conflict(format!(
                        "agent {} already has a branch named {}",
                        branch.agent_id, branch.name
                    )));
                }
            }
        }

        if let Some(base) = branch.base_version {
            let base = self.versions.get(&base).ok_or_else(|| {
                StoreError::Validation(format!("base version {base} does not exist"))
            })?;
            if base.agent_id != branch.agent_id {
                return Err(StoreError::Validation(format!(
                    "base version {} belongs to agent {}",
                    base.id, base.agent_id
                )));
            }
        }

        if !self.branches.contains_key(&branch.id) {
            self.branch_names
                .insert((branch.agent_id.clone(), branch.name.clone()), branch.id);
            append(&mut self.agent_branches, branch.agent_id.clone(), branch.id);
        }
        self.branches.insert(branch.id, branch);
        Ok(())
    }

    /// Fail when a version of `branch` is under review or served
    fn check_branch_idle(&self, branch: &Branch, now: DateTime<Utc>) -> Result<(), StoreError> {
        let served = self.active_versions.get(&branch.agent_id);
        for version_id in self.branch_versions.get(&branch.id).into_iter().flatten() {
            let pending = self
                .version_approvals
                .get(version_id)
                .and_then(|ids| ids.last())
                .and_then(|id| self.approvals.get(id))
                .is_some_and(|request| request.effective_status(now).is_pending());
            if pending {
                return Err(StoreError::Conflict(format!(
                    "branch {} has version {version_id} under pending review",
                    branch.name
                )));
            }
            if served == Some(version_id) {
                return Err(StoreError::Conflict(format!(
                    "branch {} has version {version_id} in active deployment",
                    branch.name
                )));
            }
        }
        Ok(())
    }

    fn delete_branch(&mut self, id: BranchId, checked_at: DateTime<Utc>) -> Result<(), StoreError> {
        let branch = self
            .branches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("branch", id))?;
        if !branch.is_merged() {
            self.check_branch_idle(&branch, checked_at)?;
        }
        self.branches.remove(&id);
        self.branch_names
            .remove(&(branch.agent_id.clone(), branch.name.clone()));
        if let Some(ids) = self.agent_branches.get(&branch.agent_id) {
            let remaining: im::Vector<BranchId> =
                ids.iter().copied().filter(|b| *b != id).collect();
            self.agent_branches.insert(branch.agent_id, remaining);
        }
        Ok(())
    }

    fn put_approval(&mut self, request: ApprovalRequest) -> Result<(), StoreError> {
        let version = self.version(request.version_id)?;
        if version.agent_id != request.agent_id {
            return Err(StoreError::Validation(format!(
                "approval request agent {} does not own version {}",
                request.agent_id, version.id
            )));
        }
        if request.required_approvals == 0 {
            return Err(StoreError::Validation(
                "required approvals must be at least 1".to_string(),
            ));
        }
        if request.current_approvals > request.required_approvals {
            return Err(StoreError::DataIntegrity(format!(
                "approval request {} has {} approvals, quorum is {}",
                request.id, request.current_approvals, request.required_approvals
            )));
        }

        if let Some(existing) = self.approvals.get(&request.id) {
            if existing.current_approvals > request.current_approvals {
                return Err(StoreError::DataIntegrity(format!(
                    "approval counter of request {} moved backwards",
                    request.id
                )));
            }
        }

        if request.status.is_pending() {
            let other_pending = self
                .version_approvals
                .get(&request.version_id)
                .into_iter()
                .flatten()
                .filter(|id| **id != request.id)
                .filter_map(|id| self.approvals.get(id))
                .any(|r| r.status.is_pending());
            if other_pending {
                return Err(StoreError::Conflict(format!(
                    "version {} already has a pending approval request",
                    request.version_id
                )));
            }
        }

        if !self.approvals.contains_key(&request.id) {
            append(&mut self.version_approvals, request.version_id, request.id);
        }
        self.approvals.insert(request.id, request);
        Ok(())
    }

    fn put_vote(&mut self, vote: ApprovalVote) -> Result<(), StoreError> {
        if !self.approvals.contains_key(&vote.request_id) {
            return Err(StoreError::not_found("approval request", vote.request_id));
        }
        let duplicate = self
            .votes
            .get(&vote.request_id)
            .is_some_and(|votes| votes.iter().any(|v| v.reviewer == vote.reviewer));
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "{} already voted on request {}",
                vote.reviewer, vote.request_id
            )));
        }
        append(&mut self.votes, vote.request_id, vote);
        Ok(())
    }

    fn put_deployment(&mut self, deployment: Deployment) -> Result<(), StoreError> {
        let version = self.version(deployment.version_id)?;
        if version.agent_id != deployment.agent_id {
            return Err(StoreError::Validation(format!(
                "version {} does not belong to agent {}",
                version.id, deployment.agent_id
            )));
        }

        match self.deployments.get(&deployment.id) {
            Some(existing) => {
                if existing.version_id != deployment.version_id
                    || existing.previous_deployment_id != deployment.previous_deployment_id
                {
                    return Err(StoreError::Validation(format!(
                        "deployment {} cannot change version or predecessor",
                        deployment.id
                    )));
                }
                if existing.is_rolled_back() && existing.status != deployment.status {
                    return Err(StoreError::Conflict(format!(
                        "deployment {} is rolled back",
                        deployment.id
                    )));
                }
            }
            None => {
                if let Some(previous) = deployment.previous_deployment_id {
                    let prev = self.deployments.get(&previous).ok_or_else(|| {
                        StoreError::Validation(format!(
                            "previous deployment {previous} does not exist"
                        ))
                    })?;
                    if prev.agent_id != deployment.agent_id {
                        return Err(StoreError::Validation(format!(
                            "previous deployment {previous} belongs to agent {}",
                            prev.agent_id
                        )));
                    }
                }
                append(
                    &mut self.agent_deployments,
                    deployment.agent_id.clone(),
                    deployment.id,
                );
            }
        }

        self.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    fn set_active_version(
        &mut self,
        agent: AgentId,
        version: Option<VersionId>,
    ) -> Result<(), StoreError> {
        match version {
            Some(id) => {
                let v = self.version(id)?;
                if v.agent_id != agent {
                    return Err(StoreError::Validation(format!(
                        "version {id} does not belong to agent {agent}"
                    )));
                }
                self.active_versions.insert(agent, id);
            }
            None => {
                self.active_versions.remove(&agent);
            }
        }
        Ok(())
    }

    fn active_deployments(&self, agent: &AgentId) -> Vec<&Deployment> {
        self.agent_deployments
            .get(agent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.deployments.get(id))
            .filter(|d| matches!(d.status, DeploymentStatus::Active))
            .collect()
    }

    /// Cross-record invariants for agents touched by a batch
    fn check_agents(&self, touched: &HashSet<AgentId>) -> Result<(), StoreError> {
        for agent in touched {
            let active = self.active_deployments(agent);
            if active.len() > 1 {
                return Err(StoreError::DataIntegrity(format!(
                    "agent {agent} would have {} active deployments",
                    active.len()
                )));
            }
            if let Some(deployment) = active.first() {
                if self.active_versions.get(agent) != Some(&deployment.version_id) {
                    return Err(StoreError::DataIntegrity(format!(
                        "agent {agent} active version does not match active deployment {}",
                        deployment.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// In-process [`PromptStore`] for tests, simulations and single-node use
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.tables.read().versions.len()
    }

    /// Number of stored deployments
    #[must_use]
    pub fn deployment_count(&self) -> usize {
        self.tables.read().deployments.len()
    }
}

#[async_trait]
impl PromptStore for InMemoryStore {
    type Guard = OwnedMutexGuard<()>;

    async fn lock(&self, key: LockKey) -> Result<Self::Guard, StoreError> {
        let mutex = {
            let entry = self
                .locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        Ok(mutex.lock_owned().await)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let count = batch.len();
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        let mut touched = HashSet::new();

        for write in batch.into_writes() {
            staged.apply(write, &mut touched)?;
        }
        staged.check_agents(&touched)?;

        *tables = staged;
        tracing::trace!(writes = count, "committed write batch");
        Ok(())
    }

    async fn get_version(&self, id: VersionId) -> Result<PromptVersion, StoreError> {
        self.tables.read().version(id).cloned()
    }

    async fn list_agent_versions(&self, agent: &AgentId) -> Result<Vec<PromptVersion>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .agent_versions
            .get(agent)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.versions.get(id).cloned())
            .collect())
    }

    async fn list_branch_versions(
        &self,
        branch: BranchId,
        status: Option<VersionStatus>,
    ) -> Result<Vec<PromptVersion>, StoreError> {
        let tables = self.tables.read();
        let Some(ids) = tables.branch_versions.get(&branch) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| tables.versions.get(id))
            .filter(|v| status.map_or(true, |s| v.status == s))
            .cloned()
            .collect())
    }

    async fn latest_version_number(&self, branch: BranchId) -> Result<Option<u64>, StoreError> {
        Ok(self.tables.read().latest_number(branch))
    }

    async fn get_branch(&self, id: BranchId) -> Result<Branch, StoreError> {
        self.tables
            .read()
            .branches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("branch", id))
    }

    async fn find_branch(&self, agent: &AgentId, name: &str) -> Result<Option<Branch>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .branch_names
            .get(&(agent.clone(), name.to_string()))
            .and_then(|id| tables.branches.get(id))
            .cloned())
    }

    async fn list_branches(&self, agent: &AgentId) -> Result<Vec<Branch>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .agent_branches
            .get(agent)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.branches.get(id).cloned())
            .collect())
    }

    async fn active_version(&self, agent: &AgentId) -> Result<Option<VersionId>, StoreError> {
        Ok(self.tables.read().active_versions.get(agent).copied())
    }

    async fn latest_approval(
        &self,
        version: VersionId,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .version_approvals
            .get(&version)
            .and_then(|ids| ids.last())
            .and_then(|id| tables.approvals.get(id))
            .cloned())
    }

    async fn list_approvals(
        &self,
        agent: Option<&AgentId>,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let tables = self.tables.read();
        let mut requests: Vec<ApprovalRequest> = tables
            .version_approvals
            .values()
            .filter_map(|ids| ids.last())
            .filter_map(|id| tables.approvals.get(id))
            .filter(|r| agent.map_or(true, |a| &r.agent_id == a))
            .cloned()
            .collect();
        requests.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(requests)
    }

    async fn list_votes(&self, request: ApprovalId) -> Result<Vec<ApprovalVote>, StoreError> {
        Ok(self
            .tables
            .read()
            .votes
            .get(&request)
            .map(|votes| votes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_deployment(&self, id: DeploymentId) -> Result<Deployment, StoreError> {
        self.tables
            .read()
            .deployments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("deployment", id))
    }

    async fn active_deployment(&self, agent: &AgentId) -> Result<Option<Deployment>, StoreError> {
        let tables = self.tables.read();
        let active = tables.active_deployments(agent);
        if active.len() > 1 {
            return Err(StoreError::DataIntegrity(format!(
                "agent {agent} has {} active deployments",
                active.len()
            )));
        }
        Ok(active.first().map(|d| (*d).clone()))
    }

    async fn list_deployments(&self, agent: &AgentId) -> Result<Vec<Deployment>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .agent_deployments
            .get(agent)
            .into_iter()
            .flat_map(|ids| ids.iter().rev())
            .filter_map(|id| tables.deployments.get(id).cloned())
            .collect())
    }

    async fn latest_regression_report(
        &self,
        deployment: DeploymentId,
    ) -> Result<Option<RegressionReport>, StoreError> {
        Ok(self.tables.read().reports.get(&deployment).cloned())
    }
}
