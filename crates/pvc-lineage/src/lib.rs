//! # pvc-lineage
//!
//! Lineage queries, line diffs and branch merging for prompt versions.
//!
//! - [`LineageGraph`]: parent/child graph of one agent's versions
//! - [`LineageEngine`]: ancestors, descendants, merge analysis and merging
//! - [`diff_prompt_content`]: pure line diff of two payloads

pub mod diff;
pub mod engine;
pub mod error;
pub mod graph;
pub mod merge;

pub use diff::{diff_prompt_content, render_diff, DiffSpan, SpanKind};
pub use engine::{LineageEngine, LineageEntry, MergeDecision, MergeOutcome, Relation};
pub use error::{LineageError, LineageResult};
pub use graph::LineageGraph;
pub use merge::{find_conflicts, ConflictRegion};
