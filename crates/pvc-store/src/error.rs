//! Error types for the prompt store
//!
//! [`ErrorKind`] is the classification shared by every crate in the workspace;
//! each crate's error enum maps onto it so callers can render a user-facing
//! message without matching on every variant.

use crate::model::VersionStatus;

/// Classification of failures across the release pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input, rejected before any mutation
    Validation,
    /// Referenced entity absent
    NotFound,
    /// Role check failed
    Forbidden,
    /// Request incompatible with current state
    Conflict,
    /// Approval window passed
    Expired,
    /// Overlapping edits on both sides of a merge
    MergeConflict,
    /// Rollback requested with no predecessor deployment
    NoPriorDeployment,
    /// Invariant violation observed at read time (always a bug)
    DataIntegrity,
    /// Transient storage failure
    Backend,
}

/// Errors returned by [`PromptStore`](crate::PromptStore) implementations and
/// the [`VersionStore`](crate::VersionStore) component
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier looked up
        id: String,
    },

    /// Invalid input
    #[error("validation failed: {0}")]
    Validation(String),

    /// State-incompatible write (duplicate vote, duplicate branch name, ...)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version status change not permitted by the transition table
    #[error("illegal version status transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: VersionStatus,
        /// Requested status
        to: VersionStatus,
    },

    /// Stored data violates an invariant
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Backend-specific failure (connection, serialization, ...)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Build a not-found error
    #[inline]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Taxonomy classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) | Self::IllegalTransition { .. } => ErrorKind::Conflict,
            Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Check if the caller may retry the same request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Check if the error reports corrupted stored state
    #[inline]
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::DataIntegrity(_))
    }
}
