//! Release error types

use chrono::{DateTime, Utc};
use pvc_lineage::LineageError;
use pvc_store::{ApprovalId, DeploymentId, ErrorKind, StoreError, UserId};

use crate::config::ConfigError;

/// Errors from the approval workflow and deployment pipeline
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// Malformed or missing input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Role check failed
    #[error("{user} is not allowed to {action}")]
    Forbidden {
        /// Acting user
        user: UserId,
        /// Attempted action
        action: &'static str,
    },

    /// Request incompatible with current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Approval window elapsed
    #[error("approval request {request} expired at {expired_at}")]
    Expired {
        /// Request
        request: ApprovalId,
        /// Its expiry time
        expired_at: DateTime<Utc>,
    },

    /// Rollback target has no predecessor
    #[error("deployment {0} has no prior deployment to restore")]
    NoPriorDeployment(DeploymentId),

    /// Stored records contradict each other
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics collaborator failed
    #[error("metrics source failed: {0}")]
    Metrics(String),

    /// Reviewer directory failed
    #[error("reviewer directory failed: {0}")]
    Directory(String),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lineage failure
    #[error(transparent)]
    Lineage(#[from] LineageError),
}

impl ReleaseError {
    /// Taxonomy classification
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::NoPriorDeployment(_) => ErrorKind::NoPriorDeployment,
            Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::Metrics(_) | Self::Directory(_) => ErrorKind::Backend,
            Self::Store(e) => e.kind(),
            Self::Lineage(e) => e.kind(),
        }
    }

    /// Check if the caller may retry the same request
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Metrics(_) | Self::Directory(_) => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if the error reports corrupted stored state
    #[inline]
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        self.kind() == ErrorKind::DataIntegrity
    }
}

/// Result alias for release operations
pub type ReleaseResult<T> = Result<T, ReleaseError>;
