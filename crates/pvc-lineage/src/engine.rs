//! Lineage engine
//!
//! Read-side traversal of the version graph plus branch merging. Graphs are
//! rebuilt per call from the agent's versions; the store stays the single
//! source of truth.

use pvc_store::{
    Branch, BranchId, ContentHash, LockKey, MutationDescriptor, MutationKind, NewVersion,
    PromptStore, PromptVersion, StoreError, UserId, VersionId, VersionStore, Write, WriteBatch,
};
use serde::{Deserialize, Serialize};

use crate::error::{LineageError, LineageResult};
use crate::graph::LineageGraph;
use crate::merge::{find_conflicts, ConflictRegion};

/// Position of a version relative to the queried one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// The queried version itself
    Itself,
    /// Reachable through parent edges
    Ancestor,
    /// Reachable through child edges
    Descendant,
}

/// Version tagged with its relation and hop distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    /// The version
    pub version: PromptVersion,
    /// Relation to the queried version
    pub relation: Relation,
    /// Hops from the queried version (0 for itself)
    pub distance: usize,
}

/// Result of merge analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Target is empty or its head is an ancestor of the source head
    FastForward,
    /// Source head is already an ancestor of the target head
    AlreadyMerged,
    /// Both heads have line-equal content
    Identical,
    /// Both sides changed, in disjoint regions
    Clean,
    /// Both sides changed the same region
    Conflicted,
}

impl MergeOutcome {
    /// Whether a merge may proceed
    #[inline]
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Self::Conflicted)
    }
}

/// Merge analysis of two branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    /// Branch being merged
    pub source_branch: BranchId,
    /// Branch receiving the merge
    pub target_branch: BranchId,
    /// Newest version on the source branch
    pub source_head: VersionId,
    /// Newest version on the target branch, if any
    pub target_head: Option<VersionId>,
    /// Common ancestor used as diff base
    pub merge_base: Option<VersionId>,
    /// Classification
    pub outcome: MergeOutcome,
    /// Overlapping edits (empty unless conflicted)
    pub conflicts: Vec<ConflictRegion>,
}

impl MergeDecision {
    /// Whether a merge may proceed
    #[inline]
    #[must_use]
    pub fn can_merge(&self) -> bool {
        self.outcome.is_permitted()
    }
}

/// Ancestry queries and branch merging
#[derive(Debug)]
pub struct LineageEngine<S> {
    versions: VersionStore<S>,
}

impl<S> Clone for LineageEngine<S> {
    fn clone(&self) -> Self {
        Self {
            versions: self.versions.clone(),
        }
    }
}

impl<S: PromptStore> LineageEngine<S> {
    /// Create the engine over the version store
    pub fn new(versions: VersionStore<S>) -> Self {
        Self { versions }
    }

    async fn graph_of(&self, id: VersionId) -> LineageResult<LineageGraph> {
        let version = self.versions.get_version(id).await?;
        let all = self.versions.list_agent_versions(&version.agent_id).await?;
        LineageGraph::build(all)
    }

    fn entries(
        graph: &LineageGraph,
        found: Vec<(VersionId, usize)>,
        relation: Relation,
    ) -> LineageResult<Vec<LineageEntry>> {
        found
            .into_iter()
            .map(|(id, distance)| {
                Ok(LineageEntry {
                    version: graph.version(id)?.clone(),
                    relation,
                    distance,
                })
            })
            .collect()
    }

    /// Ancestors of a version, nearest first
    pub async fn get_ancestors(
        &self,
        id: VersionId,
        max_depth: Option<usize>,
    ) -> LineageResult<Vec<LineageEntry>> {
        let graph = self.graph_of(id).await?;
        let found = graph.ancestors(id, max_depth)?;
        Self::entries(&graph, found, Relation::Ancestor)
    }

    /// Descendants of a version, nearest first
    pub async fn get_descendants(
        &self,
        id: VersionId,
        max_depth: Option<usize>,
    ) -> LineageResult<Vec<LineageEntry>> {
        let graph = self.graph_of(id).await?;
        let found = graph.descendants(id, max_depth)?;
        Self::entries(&graph, found, Relation::Descendant)
    }

    /// The version itself, then its ancestors, then its descendants
    pub async fn get_lineage(
        &self,
        id: VersionId,
        max_depth: Option<usize>,
    ) -> LineageResult<Vec<LineageEntry>> {
        let graph = self.graph_of(id).await?;
        let mut lineage = vec![LineageEntry {
            version: graph.version(id)?.clone(),
            relation: Relation::Itself,
            distance: 0,
        }];
        lineage.extend(Self::entries(&graph, graph.ancestors(id, max_depth)?, Relation::Ancestor)?);
        lineage.extend(Self::entries(
            &graph,
            graph.descendants(id, max_depth)?,
            Relation::Descendant,
        )?);
        Ok(lineage)
    }

    async fn merge_branches(
        &self,
        source: BranchId,
        target: BranchId,
    ) -> LineageResult<(Branch, Branch)> {
        if source == target {
            return Err(LineageError::Validation(
                "cannot merge a branch into itself".into(),
            ));
        }
        let source = self.versions.get_branch(source).await?;
        let target = self.versions.get_branch(target).await?;
        if source.agent_id != target.agent_id {
            return Err(LineageError::Validation(format!(
                "branches {} and {} belong to different agents",
                source.name, target.name
            )));
        }
        Ok((source, target))
    }

    /// Analyse merging `source` into `target` without changing anything
    pub async fn can_merge(
        &self,
        source: BranchId,
        target: BranchId,
    ) -> LineageResult<MergeDecision> {
        let (source, target) = self.merge_branches(source, target).await?;
        self.analyse(&source, &target).await
    }

    async fn analyse(&self, source: &Branch, target: &Branch) -> LineageResult<MergeDecision> {
        let source_head = self.versions.branch_head(source.id).await?.ok_or_else(|| {
            LineageError::Validation(format!("branch {} has no versions", source.name))
        })?;
        let target_head = self.versions.branch_head(target.id).await?;

        let mut decision = MergeDecision {
            source_branch: source.id,
            target_branch: target.id,
            source_head: source_head.id,
            target_head: target_head.as_ref().map(|v| v.id),
            merge_base: None,
            outcome: MergeOutcome::FastForward,
            conflicts: Vec::new(),
        };
        let Some(target_head) = target_head else {
            tracing::debug!(
                source = %source.name,
                target = %target.name,
                "Target branch empty, fast-forward"
            );
            return Ok(decision);
        };

        let history = self.versions.list_agent_versions(&source.agent_id).await?;
        let graph = LineageGraph::build(history)?;
        decision.merge_base = graph.merge_base(source_head.id, target_head.id)?;

        decision.outcome = if graph.is_ancestor(target_head.id, source_head.id)? {
            MergeOutcome::FastForward
        } else if graph.is_ancestor(source_head.id, target_head.id)? {
            MergeOutcome::AlreadyMerged
        } else if ContentHash::of_lines(&source_head.content)
            == ContentHash::of_lines(&target_head.content)
        {
            MergeOutcome::Identical
        } else {
            let base = match decision.merge_base {
                Some(id) => graph.version(id)?.content.as_str(),
                None => "",
            };
            decision.conflicts = find_conflicts(base, &source_head.content, &target_head.content);
            if decision.conflicts.is_empty() {
                MergeOutcome::Clean
            } else {
                MergeOutcome::Conflicted
            }
        };

        tracing::debug!(
            source = %source.name,
            target = %target.name,
            base = ?decision.merge_base,
            outcome = ?decision.outcome,
            conflicts = decision.conflicts.len(),
            "Merge analysed"
        );
        Ok(decision)
    }

    /// Merge `source` into `target`.
    ///
    /// Creates a merge version on the target whose parents are the source
    /// head and the target head, and marks the source branch merged, in one
    /// batch. A fast-forward copies the source content; any other permitted
    /// merge keeps the target content.
    pub async fn merge_branch(
        &self,
        source: BranchId,
        target: BranchId,
        approved_by: &UserId,
    ) -> LineageResult<PromptVersion> {
        if approved_by.is_blank() {
            return Err(LineageError::Validation("merge approver is required".into()));
        }

        // fixed order so concurrent opposite merges cannot deadlock
        let (first, second) = if source < target { (source, target) } else { (target, source) };
        let store = self.versions.store();
        let _first = store.lock(LockKey::Branch(first)).await?;
        let _second = store.lock(LockKey::Branch(second)).await?;

        let (mut source_branch, target_branch) = self.merge_branches(source, target).await?;
        if source_branch.is_merged() {
            return Err(StoreError::Conflict(format!(
                "branch {} is already merged",
                source_branch.name
            ))
            .into());
        }

        let decision = self.analyse(&source_branch, &target_branch).await?;
        if !decision.can_merge() {
            tracing::warn!(
                source = %source_branch.name,
                target = %target_branch.name,
                conflicts = decision.conflicts.len(),
                "Merge blocked by conflicts"
            );
            return Err(LineageError::MergeConflict {
                source_branch: source,
                target_branch: target,
                conflicts: decision.conflicts,
            });
        }

        let source_head = self.versions.get_version(decision.source_head).await?;
        let (content, parents) = match decision.target_head {
            Some(target_head) => {
                let content = if decision.outcome == MergeOutcome::FastForward {
                    source_head.content.clone()
                } else {
                    self.versions.get_version(target_head).await?.content
                };
                (content, vec![source_head.id, target_head])
            }
            None => (source_head.content.clone(), vec![source_head.id]),
        };

        let merged = self
            .versions
            .prepare_version(
                NewVersion::new(
                    source_branch.agent_id.clone(),
                    target,
                    content,
                    approved_by.clone(),
                )
                .with_parents(parents)
                .with_mutation(MutationDescriptor::new(
                    MutationKind::Merge,
                    format!("merge {} into {}", source_branch.name, target_branch.name),
                )),
            )
            .await?;

        source_branch.merged_at = Some(merged.created_at);
        source_branch.merged_into = Some(target);
        store
            .commit(
                WriteBatch::new()
                    .with(Write::PutVersion(merged.clone()))
                    .with(Write::PutBranch(source_branch.clone())),
            )
            .await?;

        tracing::info!(
            agent = %merged.agent_id,
            version = %merged.id,
            outcome = ?decision.outcome,
            "Merged branch {} into {}",
            source_branch.name,
            target_branch.name
        );
        Ok(merged)
    }
}
