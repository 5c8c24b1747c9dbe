//! # pvc-release
//!
//! Review, deployment and regression handling for prompt versions.
//!
//! ## Components
//!
//! - [`ApprovalWorkflow`]: quorum-based review with lazy expiry
//! - [`DeploymentPipeline`]: activation, regression evaluation, rollback
//! - [`RegressionEvaluator`]: pure comparison of metric snapshots
//! - [`PromptRegistry`]: everything above wired over one store
//!
//! ## Collaborators
//!
//! Role checks go through a [`ReviewerDirectory`] and performance data comes
//! from a [`MetricsSource`]; both are traits so hosts can plug in their own.

pub mod approval;
pub mod collab;
pub mod config;
pub mod deployment;
pub mod error;
pub mod regression;
pub mod service;

pub use approval::{transition, ApprovalEvent, ApprovalView, ApprovalWorkflow};
pub use collab::{FixedMetrics, MetricsSource, ReviewerDirectory, Role, StaticDirectory};
pub use config::{
    ApprovalConfig, ConfigError, DeploymentConfig, RegressionThresholds, ReleaseConfig,
    TierThresholds,
};
pub use deployment::DeploymentPipeline;
pub use error::{ReleaseError, ReleaseResult};
pub use regression::{RegressionAssessment, RegressionEvaluator};
pub use service::PromptRegistry;
