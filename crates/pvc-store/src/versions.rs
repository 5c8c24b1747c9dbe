//! Version store component
//!
//! Owns version numbering, branch bookkeeping and the status mutator.
//!
//! Numbering is serialized per branch: [`VersionStore::create_version`] holds
//! the branch lock from reading the latest number to the commit, and the store
//! re-checks the sequence during commit.

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::hash::ContentHash;
use crate::ids::{AgentId, BranchId, UserId, VersionId};
use crate::model::{Branch, FitnessSummary, MutationDescriptor, PromptVersion, VersionStatus};
use crate::state::validate_transition;
use crate::store::{LockKey, PromptStore, Write, WriteBatch};

/// Input for [`VersionStore::create_version`]
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Owning agent
    pub agent_id: AgentId,
    /// Target branch
    pub branch_id: BranchId,
    /// Prompt payload
    pub content: String,
    /// Author
    pub created_by: UserId,
    /// Explicit parents; `None` continues from the branch head (or base)
    pub parents: Option<Vec<VersionId>>,
    /// Change descriptor
    pub mutation: Option<MutationDescriptor>,
    /// Evaluation summary
    pub fitness: Option<FitnessSummary>,
}

impl NewVersion {
    /// Version continuing the branch from its head
    pub fn new(
        agent_id: impl Into<AgentId>,
        branch_id: BranchId,
        content: impl Into<String>,
        created_by: impl Into<UserId>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            branch_id,
            content: content.into(),
            created_by: created_by.into(),
            parents: None,
            mutation: None,
            fitness: None,
        }
    }

    /// Set explicit parents (an empty list creates a root version)
    #[must_use]
    pub fn with_parents(mut self, parents: Vec<VersionId>) -> Self {
        self.parents = Some(parents);
        self
    }

    /// Attach a change descriptor
    #[must_use]
    pub fn with_mutation(mut self, mutation: MutationDescriptor) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// Attach an evaluation summary
    #[must_use]
    pub fn with_fitness(mut self, fitness: FitnessSummary) -> Self {
        self.fitness = Some(fitness);
        self
    }
}

/// Status write for `version`, or `None` when it already has `to`.
///
/// Fails with `IllegalTransition` when the table forbids the change.
pub fn status_write(
    version: &PromptVersion,
    to: VersionStatus,
) -> Result<Option<Write>, StoreError> {
    validate_transition(version.status, to)?;
    if version.status == to {
        return Ok(None);
    }
    Ok(Some(Write::SetVersionStatus {
        version_id: version.id,
        status: to,
    }))
}

/// Versions and branches of every agent
#[derive(Debug)]
pub struct VersionStore<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for VersionStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: PromptStore> VersionStore<S> {
    /// Create the component over a shared store
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Time source
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ── Branches ────────────────────────────────────────────────────────────

    /// Create a branch, optionally forked from `base`.
    pub async fn create_branch(
        &self,
        agent: &AgentId,
        name: &str,
        base: Option<VersionId>,
        creator: &UserId,
    ) -> Result<Branch, StoreError> {
        if agent.is_blank() {
            return Err(StoreError::Validation("agent id is required".into()));
        }
        if name.trim().is_empty() {
            return Err(StoreError::Validation("branch name is required".into()));
        }
        if creator.is_blank() {
            return Err(StoreError::Validation("branch creator is required".into()));
        }
        if let Some(base) = base {
            let base = self.store.get_version(base).await?;
            if &base.agent_id != agent {
                return Err(StoreError::Validation(format!(
                    "base version {} belongs to agent {}",
                    base.id, base.agent_id
                )));
            }
        }

        let branch = Branch {
            id: BranchId::new(),
            agent_id: agent.clone(),
            name: name.to_string(),
            base_version: base,
            created_by: creator.clone(),
            created_at: self.clock.now(),
            merged_at: None,
            merged_into: None,
        };
        self.store
            .commit(WriteBatch::new().with(Write::PutBranch(branch.clone())))
            .await?;

        tracing::info!(agent = %agent, branch = %branch.id, "Created branch {}", branch.name);
        Ok(branch)
    }

    /// Read a branch
    pub async fn get_branch(&self, id: BranchId) -> Result<Branch, StoreError> {
        self.store.get_branch(id).await
    }

    /// Look up a branch by name
    pub async fn find_branch(
        &self,
        agent: &AgentId,
        name: &str,
    ) -> Result<Option<Branch>, StoreError> {
        self.store.find_branch(agent, name).await
    }

    /// Branches of an agent in creation order
    pub async fn list_branches(&self, agent: &AgentId) -> Result<Vec<Branch>, StoreError> {
        self.store.list_branches(agent).await
    }

    /// Newest version on a branch, `None` while the branch is empty
    pub async fn branch_head(&self, branch: BranchId) -> Result<Option<PromptVersion>, StoreError> {
        self.store.get_branch(branch).await?;
        Ok(self
            .store
            .list_branch_versions(branch, None)
            .await?
            .into_iter()
            .next())
    }

    /// Delete a branch record.
    ///
    /// An unmerged branch can only be deleted when none of its versions is
    /// under pending review or served by an active deployment. The store
    /// checks this inside the commit, so a concurrent approval request or
    /// deployment cannot slip in between. Versions are kept either way.
    pub async fn delete_branch(&self, id: BranchId) -> Result<(), StoreError> {
        let _guard = self.store.lock(LockKey::Branch(id)).await?;
        let branch = self.store.get_branch(id).await?;
        let delete = Write::DeleteBranch {
            branch_id: id,
            checked_at: self.clock.now(),
        };
        if let Err(err) = self.store.commit(WriteBatch::new().with(delete)).await {
            tracing::warn!(branch = %id, error = %err, "Refused to delete branch {}", branch.name);
            return Err(err);
        }
        tracing::info!(agent = %branch.agent_id, branch = %id, "Deleted branch {}", branch.name);
        Ok(())
    }

    // ── Versions ────────────────────────────────────────────────────────────

    /// Create a version with the next number on its branch
    pub async fn create_version(&self, new: NewVersion) -> Result<PromptVersion, StoreError> {
        let _guard = self.store.lock(LockKey::Branch(new.branch_id)).await?;
        let version = self.prepare_version(new).await?;
        self.store
            .commit(WriteBatch::new().with(Write::PutVersion(version.clone())))
            .await?;

        tracing::info!(
            agent = %version.agent_id,
            version = %version.id,
            "Created version {} on branch {}",
            version.version_number,
            version.branch_id
        );
        Ok(version)
    }

    /// Validate `new` and build the record without writing it.
    ///
    /// The caller must hold the branch lock until the record is committed.
    pub async fn prepare_version(&self, new: NewVersion) -> Result<PromptVersion, StoreError> {
        if new.agent_id.is_blank() {
            return Err(StoreError::Validation("agent id is required".into()));
        }
        if new.created_by.is_blank() {
            return Err(StoreError::Validation("version creator is required".into()));
        }

        let branch = self.store.get_branch(new.branch_id).await?;
        if branch.agent_id != new.agent_id {
            return Err(StoreError::Validation(format!(
                "branch {} belongs to agent {}",
                branch.name, branch.agent_id
            )));
        }
        if branch.is_merged() {
            return Err(StoreError::Conflict(format!(
                "branch {} is already merged",
                branch.name
            )));
        }

        let latest = self.store.latest_version_number(branch.id).await?;
        let parents = match new.parents {
            Some(parents) => parents,
            None => {
                let head = self.store.list_branch_versions(branch.id, None).await?;
                match head.first() {
                    Some(head) => vec![head.id],
                    None => branch.base_version.into_iter().collect(),
                }
            }
        };
        self.check_parents(&new.agent_id, &parents).await?;

        let content_hash = ContentHash::of(&new.content);
        Ok(PromptVersion {
            id: VersionId::new(),
            agent_id: new.agent_id,
            branch_id: branch.id,
            version_number: latest.unwrap_or(0) + 1,
            content: new.content,
            content_hash,
            status: VersionStatus::Candidate,
            parent_ids: parents,
            created_by: new.created_by,
            created_at: self.clock.now(),
            mutation: new.mutation,
            fitness: new.fitness,
        })
    }

    async fn check_parents(
        &self,
        agent: &AgentId,
        parents: &[VersionId],
    ) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(parents.len());
        for parent_id in parents {
            if !seen.insert(*parent_id) {
                return Err(StoreError::Validation(format!(
                    "parent version {parent_id} listed twice"
                )));
            }
            let parent = match self.store.get_version(*parent_id).await {
                Ok(parent) => parent,
                Err(StoreError::NotFound { .. }) => {
                    return Err(StoreError::Validation(format!(
                        "parent version {parent_id} does not exist"
                    )))
                }
                Err(e) => return Err(e),
            };
            if &parent.agent_id != agent {
                return Err(StoreError::Validation(format!(
                    "parent version {parent_id} belongs to agent {}",
                    parent.agent_id
                )));
            }
        }
        Ok(())
    }

    /// Versions on a branch, newest first
    pub async fn list_versions(
        &self,
        branch: BranchId,
        status: Option<VersionStatus>,
    ) -> Result<Vec<PromptVersion>, StoreError> {
        self.store.list_branch_versions(branch, status).await
    }

    /// All versions of an agent in creation order
    pub async fn list_agent_versions(
        &self,
        agent: &AgentId,
    ) -> Result<Vec<PromptVersion>, StoreError> {
        self.store.list_agent_versions(agent).await
    }

    /// Read a version
    pub async fn get_version(&self, id: VersionId) -> Result<PromptVersion, StoreError> {
        self.store.get_version(id).await
    }

    /// Change a version's status.
    ///
    /// The approval and deployment components are the only intended callers;
    /// they usually fold the write into their own batch via [`status_write`].
    pub async fn update_status(
        &self,
        id: VersionId,
        status: VersionStatus,
    ) -> Result<PromptVersion, StoreError> {
        let mut version = self.store.get_version(id).await?;
        if let Some(write) = status_write(&version, status)? {
            self.store.commit(WriteBatch::new().with(write)).await?;
            tracing::info!(
                agent = %version.agent_id,
                version = %id,
                "Version status {} -> {}",
                version.status,
                status
            );
            version.status = status;
        }
        Ok(version)
    }

    /// Version currently served for an agent
    pub async fn active_version(
        &self,
        agent: &AgentId,
    ) -> Result<Option<PromptVersion>, StoreError> {
        match self.store.active_version(agent).await? {
            Some(id) => Ok(Some(self.store.get_version(id).await?)),
            None => Ok(None),
        }
    }
}
