//! # pvc-store
//!
//! Records, persistence primitives and the version store of the prompt
//! release pipeline.
//!
//! ## Core Types
//!
//! - [`PromptVersion`]: immutable revision of an agent's prompt
//! - [`Branch`]: named line of development
//! - [`ApprovalRequest`] / [`ApprovalVote`]: review records
//! - [`Deployment`] / [`RegressionReport`]: release records
//!
//! ## Persistence
//!
//! [`PromptStore`] exposes per-key locks and atomic [`WriteBatch`] commits;
//! [`InMemoryStore`] is the in-process implementation. [`VersionStore`] is the
//! component that numbers versions and manages branches on top of it.

pub mod clock;
pub mod error;
pub mod hash;
pub mod ids;
pub mod memory;
pub mod model;
pub mod state;
pub mod store;
pub mod versions;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, StoreError};
pub use hash::{ContentHash, HashError};
pub use ids::{AgentId, ApprovalId, BranchId, DeploymentId, ReportId, UserId, VersionId, VoteId};
pub use memory::InMemoryStore;
pub use model::{
    ApprovalRequest, ApprovalStatus, ApprovalVote, Branch, Deployment, DeploymentStatus,
    FitnessSummary, Metric, MetricDelta, MetricsSnapshot, MutationDescriptor, MutationKind,
    PromptVersion, Recommendation, RecommendedAction, RegressionReport, Severity, VersionStatus,
    VoteDecision,
};
pub use state::{allowed_transitions, validate_transition};
pub use store::{LockKey, PromptStore, Write, WriteBatch};
pub use versions::{status_write, NewVersion, VersionStore};
