//! Lineage error types

use pvc_store::{BranchId, ErrorKind, StoreError, VersionId};

use crate::merge::ConflictRegion;

/// Errors from lineage traversal and merging
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// Store failure (not found, conflict, backend)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid merge or traversal request
    #[error("validation failed: {0}")]
    Validation(String),

    /// Parent edges form a cycle
    #[error("lineage cycle detected at version {0}")]
    CycleDetected(VersionId),

    /// Version graph references a missing record
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Both branches edited the same region
    #[error(
        "merging branch {source_branch} into {target_branch} conflicts in {} region(s)",
        .conflicts.len()
    )]
    MergeConflict {
        /// Branch being merged
        source_branch: BranchId,
        /// Branch receiving the merge
        target_branch: BranchId,
        /// Overlapping edits
        conflicts: Vec<ConflictRegion>,
    },
}

impl LineageError {
    /// Taxonomy classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Validation(_) => ErrorKind::Validation,
            Self::CycleDetected(_) | Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::MergeConflict { .. } => ErrorKind::MergeConflict,
        }
    }

    /// Check if the error reports corrupted stored state
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        self.kind() == ErrorKind::DataIntegrity
    }
}

/// Result alias for lineage operations
pub type LineageResult<T> = Result<T, LineageError>;
