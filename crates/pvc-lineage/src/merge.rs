//! Three-way conflict detection
//!
//! Each side is diffed against the merge base and reduced to hunks: a base
//! line range `[start, end)` plus its replacement. Two hunks conflict when
//! their ranges overlap or they insert at the same base position, unless both
//! sides made exactly the same change.

use serde::{Deserialize, Serialize};

use crate::diff::{diff_ops, Op};

/// Base region edited differently on both sides of a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// First base line of the region (zero-based)
    pub base_start: usize,
    /// One past the last base line of the region
    pub base_end: usize,
    /// Source branch replacement for its part of the region
    pub source_lines: Vec<String>,
    /// Target branch replacement for its part of the region
    pub target_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    start: usize,
    end: usize,
    replacement: Vec<String>,
}

impl Hunk {
    fn overlaps(&self, other: &Hunk) -> bool {
        self.start == other.start || (self.start < other.end && other.start < self.end)
    }
}

fn hunks(base: &[&str], side: &[&str]) -> Vec<Hunk> {
    let mut out = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut base_pos = 0;

    for op in diff_ops(base, side) {
        match op {
            Op::Equal { old, .. } => {
                out.extend(current.take());
                base_pos = old + 1;
            }
            Op::Delete { old } => {
                let hunk = current.get_or_insert_with(|| Hunk {
                    start: old,
                    end: old,
                    replacement: Vec::new(),
                });
                hunk.end = old + 1;
                base_pos = old + 1;
            }
            Op::Insert { new } => {
                current
                    .get_or_insert_with(|| Hunk {
                        start: base_pos,
                        end: base_pos,
                        replacement: Vec::new(),
                    })
                    .replacement
                    .push(side[new].to_string());
            }
        }
    }
    out.extend(current);
    out
}

/// Regions both sides changed relative to `base`, in base order
#[must_use]
pub fn find_conflicts(base: &str, source: &str, target: &str) -> Vec<ConflictRegion> {
    let base_lines: Vec<&str> = base.lines().collect();
    let source_hunks = hunks(&base_lines, &source.lines().collect::<Vec<_>>());
    let target_hunks = hunks(&base_lines, &target.lines().collect::<Vec<_>>());

    let mut conflicts = Vec::new();
    for s in &source_hunks {
        for t in target_hunks.iter().filter(|t| s.overlaps(t)) {
            if s == t {
                continue;
            }
            conflicts.push(ConflictRegion {
                base_start: s.start.min(t.start),
                base_end: s.end.max(t.end),
                source_lines: s.replacement.clone(),
                target_lines: t.replacement.clone(),
            });
        }
    }
    conflicts.sort_by_key(|c| (c.base_start, c.base_end));
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: &str = "You are a support agent.\nBe concise.\nCite sources.\nSign off politely.";

    #[test]
    fn disjoint_edits_are_clean() {
        let source = BASE.replace("Be concise.", "Be brief.");
        let target = BASE.replace("Sign off politely.", "Sign off with the ticket id.");
        assert!(find_conflicts(BASE, &source, &target).is_empty());
    }

    #[test]
    fn same_line_edited_twice_conflicts() {
        let source = BASE.replace("Be concise.", "Be brief.");
        let target = BASE.replace("Be concise.", "Be thorough.");
        let conflicts = find_conflicts(BASE, &source, &target);
        assert_eq!(
            conflicts,
            vec![ConflictRegion {
                base_start: 1,
                base_end: 2,
                source_lines: vec!["Be brief.".into()],
                target_lines: vec!["Be thorough.".into()],
            }]
        );
    }

    #[test]
    fn identical_change_on_both_sides_is_clean() {
        let edited = BASE.replace("Cite sources.", "Cite sources with links.");
        assert!(find_conflicts(BASE, &edited, &edited).is_empty());
    }

    #[test]
    fn insertions_at_same_point_conflict() {
        let source = BASE.replace("Be concise.", "Be concise.\nUse bullet points.");
        let target = BASE.replace("Be concise.", "Be concise.\nUse tables.");
        let conflicts = find_conflicts(BASE, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!((conflicts[0].base_start, conflicts[0].base_end), (2, 2));
    }

    #[test]
    fn insertion_next_to_edit_is_clean() {
        // source appends after line 1, target rewrites line 0
        let source = BASE.replace("Be concise.", "Be concise.\nUse bullet points.");
        let target = BASE.replace("You are a support agent.", "You are a billing agent.");
        assert!(find_conflicts(BASE, &source, &target).is_empty());
    }

    #[test]
    fn empty_base_with_two_payloads_conflicts() {
        let conflicts = find_conflicts("", "alpha", "beta");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].source_lines, vec!["alpha"]);
    }
}
