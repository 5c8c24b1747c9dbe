//! Lineage graph of one agent's versions
//!
//! Versions are held in an arena keyed by id; edges run parent -> child in a
//! petgraph `DiGraphMap`, so both directions are walkable without an extra
//! child index.

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use pvc_store::{PromptVersion, StoreError, VersionId};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{LineageError, LineageResult};

/// Parent/child graph over an agent's versions
#[derive(Debug, Clone)]
pub struct LineageGraph {
    graph: DiGraphMap<VersionId, ()>,
    versions: HashMap<VersionId, PromptVersion>,
}

impl LineageGraph {
    /// Build the graph, checking that every parent is present and that the
    /// edges are acyclic.
    pub fn build(versions: impl IntoIterator<Item = PromptVersion>) -> LineageResult<Self> {
        let versions: HashMap<VersionId, PromptVersion> =
            versions.into_iter().map(|v| (v.id, v)).collect();

        let mut graph = DiGraphMap::with_capacity(versions.len(), versions.len());
        for id in versions.keys() {
            graph.add_node(*id);
        }
        for version in versions.values() {
            for parent in &version.parent_ids {
                if !versions.contains_key(parent) {
                    return Err(LineageError::DataIntegrity(format!(
                        "version {} references missing parent {}",
                        version.id, parent
                    )));
                }
                graph.add_edge(*parent, version.id, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(LineageError::CycleDetected(cycle.node_id()));
        }

        Ok(Self { graph, versions })
    }

    /// Number of versions in the graph
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the graph holds no versions
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Look up a version
    pub fn version(&self, id: VersionId) -> LineageResult<&PromptVersion> {
        self.versions
            .get(&id)
            .ok_or_else(|| StoreError::not_found("prompt version", id).into())
    }

    /// Ancestors of `id` with their hop distance, nearest first.
    ///
    /// Each ancestor appears once, at its shortest distance. `max_depth`
    /// bounds the number of hops walked.
    pub fn ancestors(
        &self,
        id: VersionId,
        max_depth: Option<usize>,
    ) -> LineageResult<Vec<(VersionId, usize)>> {
        self.version(id)?;
        Ok(self.walk(id, max_depth, |v| {
            // declared parent order is meaningful for merges
            self.versions
                .get(&v)
                .map(|version| version.parent_ids.clone())
                .unwrap_or_default()
        }))
    }

    /// Descendants of `id` with their hop distance, nearest first
    pub fn descendants(
        &self,
        id: VersionId,
        max_depth: Option<usize>,
    ) -> LineageResult<Vec<(VersionId, usize)>> {
        self.version(id)?;
        Ok(self.walk(id, max_depth, |v| self.children(v)))
    }

    /// Direct children ordered by creation
    fn children(&self, id: VersionId) -> Vec<VersionId> {
        let mut children: Vec<VersionId> = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .collect();
        children.sort_by_key(|c| (self.versions.get(c).map(|v| v.created_at), *c));
        children
    }

    fn walk<F>(
        &self,
        start: VersionId,
        max_depth: Option<usize>,
        next: F,
    ) -> Vec<(VersionId, usize)>
    where
        F: Fn(VersionId) -> Vec<VersionId>,
    {
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut out = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for neighbor in next(current) {
                if visited.insert(neighbor) {
                    out.push((neighbor, depth + 1));
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        out
    }

    /// Whether `ancestor` is a strict ancestor of `of`
    pub fn is_ancestor(&self, ancestor: VersionId, of: VersionId) -> LineageResult<bool> {
        self.version(ancestor)?;
        self.version(of)?;
        Ok(ancestor != of && has_path_connecting(&self.graph, ancestor, of, None))
    }

    fn ancestors_inclusive(&self, id: VersionId) -> HashSet<VersionId> {
        let mut set: HashSet<VersionId> = self
            .walk(id, None, |v| {
                self.graph
                    .neighbors_directed(v, Direction::Incoming)
                    .collect()
            })
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        set.insert(id);
        set
    }

    /// Common ancestors (inclusive) of `a` and `b` that are not ancestors of
    /// another common ancestor. Crossover histories can yield several.
    pub fn lowest_common_ancestors(
        &self,
        a: VersionId,
        b: VersionId,
    ) -> LineageResult<Vec<VersionId>> {
        self.version(a)?;
        self.version(b)?;

        let from_a = self.ancestors_inclusive(a);
        let common: HashSet<VersionId> = self
            .ancestors_inclusive(b)
            .into_iter()
            .filter(|v| from_a.contains(v))
            .collect();

        let mut lowest: Vec<VersionId> = common
            .iter()
            .copied()
            .filter(|candidate| {
                !common.iter().any(|other| {
                    other != candidate
                        && has_path_connecting(&self.graph, *candidate, *other, None)
                })
            })
            .collect();
        lowest.sort();
        Ok(lowest)
    }

    /// Single merge base of `a` and `b`.
    ///
    /// Among several lowest common ancestors the most recently created wins,
    /// ties broken by the greater id.
    pub fn merge_base(&self, a: VersionId, b: VersionId) -> LineageResult<Option<VersionId>> {
        let candidates = self.lowest_common_ancestors(a, b)?;
        Ok(candidates
            .into_iter()
            .filter_map(|id| self.versions.get(&id))
            .max_by_key(|v| (v.created_at, v.id))
            .map(|v| v.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use pvc_store::{AgentId, BranchId, ContentHash, UserId, VersionStatus};

    fn v(parents: &[&PromptVersion], order: i64) -> PromptVersion {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PromptVersion {
            id: VersionId::new(),
            agent_id: AgentId::new("agent"),
            branch_id: BranchId::new(),
            version_number: 1,
            content: String::new(),
            content_hash: ContentHash::of(""),
            status: VersionStatus::Candidate,
            parent_ids: parents.iter().map(|p| p.id).collect(),
            created_by: UserId::new("author"),
            created_at: epoch + Duration::minutes(order),
            mutation: None,
            fitness: None,
        }
    }

    /// root -> a -> c, root -> b -> c (merge), c -> d
    fn diamond() -> (Vec<PromptVersion>, [VersionId; 5]) {
        let root = v(&[], 0);
        let a = v(&[&root], 1);
        let b = v(&[&root], 2);
        let c = v(&[&a, &b], 3);
        let d = v(&[&c], 4);
        let ids = [root.id, a.id, b.id, c.id, d.id];
        (vec![root, a, b, c, d], ids)
    }

    #[test]
    fn ancestors_are_bfs_with_shortest_distance() {
        let (versions, [root, a, b, c, d]) = diamond();
        let graph = LineageGraph::build(versions).unwrap();

        assert_eq!(
            graph.ancestors(d, None).unwrap(),
            vec![(c, 1), (a, 2), (b, 2), (root, 3)]
        );
        assert_eq!(graph.ancestors(d, Some(2)).unwrap(), vec![(c, 1), (a, 2), (b, 2)]);
        assert!(graph.ancestors(root, None).unwrap().is_empty());
    }

    #[test]
    fn descendants_walk_child_edges() {
        let (versions, [root, a, b, c, d]) = diamond();
        let graph = LineageGraph::build(versions).unwrap();

        assert_eq!(
            graph.descendants(root, None).unwrap(),
            vec![(a, 1), (b, 1), (c, 2), (d, 3)]
        );
        assert_eq!(graph.descendants(root, Some(1)).unwrap(), vec![(a, 1), (b, 1)]);
    }

    #[test]
    fn ancestry_checks() {
        let (versions, [root, a, b, _, d]) = diamond();
        let graph = LineageGraph::build(versions).unwrap();

        assert!(graph.is_ancestor(root, d).unwrap());
        assert!(!graph.is_ancestor(d, root).unwrap());
        assert!(!graph.is_ancestor(a, b).unwrap());
        assert!(!graph.is_ancestor(a, a).unwrap());
    }

    #[test]
    fn merge_base_of_siblings_is_fork_point() {
        let (versions, [root, a, b, c, _]) = diamond();
        let graph = LineageGraph::build(versions).unwrap();

        assert_eq!(graph.merge_base(a, b).unwrap(), Some(root));
        // an ancestor is its own merge base with a descendant
        assert_eq!(graph.merge_base(a, c).unwrap(), Some(a));
    }

    #[test]
    fn criss_cross_picks_most_recent_common_ancestor() {
        let root = v(&[], 0);
        let a = v(&[&root], 1);
        let b = v(&[&root], 2);
        // two crossovers of the same pair
        let x = v(&[&a, &b], 3);
        let y = v(&[&b, &a], 4);
        let (a_id, b_id, x_id, y_id) = (a.id, b.id, x.id, y.id);
        let graph = LineageGraph::build(vec![root, a, b, x, y]).unwrap();

        let mut expected = vec![a_id, b_id];
        expected.sort();
        assert_eq!(graph.lowest_common_ancestors(x_id, y_id).unwrap(), expected);
        // b was created after a
        assert_eq!(graph.merge_base(x_id, y_id).unwrap(), Some(b_id));
    }

    #[test]
    fn unrelated_roots_have_no_merge_base() {
        let r1 = v(&[], 0);
        let r2 = v(&[], 1);
        let (id1, id2) = (r1.id, r2.id);
        let graph = LineageGraph::build(vec![r1, r2]).unwrap();
        assert_eq!(graph.merge_base(id1, id2).unwrap(), None);
    }

    #[test]
    fn missing_parent_is_integrity_violation() {
        let root = v(&[], 0);
        let child = v(&[&root], 1);
        let err = LineageGraph::build(vec![child]).unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn cycle_is_detected() {
        let mut a = v(&[], 0);
        let b = v(&[&a], 1);
        a.parent_ids.push(b.id);
        let err = LineageGraph::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, LineageError::CycleDetected(_)));
    }
}
