//! Release pipeline configuration
//!
//! Every section defaults independently, so a file only needs the keys it
//! changes. Files are TOML or YAML, chosen by extension.

use pvc_store::UserId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collab::Role;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("invalid TOML: {0}")]
    InvalidToml(#[from] toml::de::Error),

    /// Malformed YAML
    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    /// Extension is neither TOML nor YAML
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Values parse but violate a constraint
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Review settings
    pub approval: ApprovalConfig,
    /// Deployment settings
    pub deployment: DeploymentConfig,
    /// Regression thresholds
    pub regression: RegressionThresholds,
}

/// Review settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Quorum used when a request does not name one
    pub default_required_approvals: u32,
    /// Largest quorum a request may ask for
    pub max_required_approvals: u32,
    /// Longest approval window in hours
    pub max_expiry_hours: u32,
    /// Roles allowed to vote
    pub approver_roles: Vec<Role>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_required_approvals: 1,
            max_required_approvals: 10,
            max_expiry_hours: 720,
            approver_roles: vec![Role::Reviewer, Role::Admin],
        }
    }
}

/// Deployment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Roles allowed to deploy and roll back
    pub deployer_roles: Vec<Role>,
    /// Trailing window of the baseline snapshot, in hours
    pub baseline_window_hours: u32,
    /// Roll back automatically on critical regressions
    pub auto_rollback: bool,
    /// Actor recorded on automatic rollbacks
    pub system_actor: UserId,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            deployer_roles: vec![Role::Admin, Role::Reviewer],
            baseline_window_hours: 24,
            auto_rollback: true,
            system_actor: UserId::new("regression-evaluator"),
        }
    }
}

/// Relative drop needed for each severity tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    /// Low severity
    pub low: f64,
    /// Medium severity
    pub medium: f64,
    /// High severity
    pub high: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            low: 0.05,
            medium: 0.10,
            high: 0.20,
        }
    }
}

impl TierThresholds {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let ordered = self.low > 0.0 && self.low <= self.medium && self.medium <= self.high;
        if !(self.low.is_finite() && self.medium.is_finite() && self.high.is_finite()) || !ordered {
            return Err(ConfigError::Invalid(format!(
                "{name} tiers must satisfy 0 < low <= medium <= high"
            )));
        }
        Ok(())
    }
}

/// Regression classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionThresholds {
    /// Relative success-rate drop per tier
    pub success_rate_drop: TierThresholds,
    /// Relative efficiency drop per tier
    pub efficiency_drop: TierThresholds,
    /// Relative error-rate increase that counts as a medium regression
    pub error_rate_increase: f64,
    /// Error-rate multiple that counts as critical
    pub critical_error_multiplier: f64,
    /// Absolute error-rate increase below which the change is noise
    pub min_error_rate_delta: f64,
    /// Samples needed in both snapshots before anything is critical
    pub min_sample_size: u64,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self {
            success_rate_drop: TierThresholds::default(),
            efficiency_drop: TierThresholds::default(),
            error_rate_increase: 0.25,
            critical_error_multiplier: 2.0,
            min_error_rate_delta: 0.01,
            min_sample_size: 30,
        }
    }
}

impl ReleaseConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default quorum
    #[inline]
    #[must_use]
    pub fn with_default_required_approvals(mut self, quorum: u32) -> Self {
        self.approval.default_required_approvals = quorum;
        self
    }

    /// With automatic rollback on or off
    #[inline]
    #[must_use]
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.deployment.auto_rollback = enabled;
        self
    }

    /// With baseline window
    #[inline]
    #[must_use]
    pub fn with_baseline_window_hours(mut self, hours: u32) -> Self {
        self.deployment.baseline_window_hours = hours;
        self
    }

    /// With sample floor for critical regressions
    #[inline]
    #[must_use]
    pub fn with_min_sample_size(mut self, samples: u64) -> Self {
        self.regression.min_sample_size = samples;
        self
    }

    /// Parse and validate TOML
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.toml`, `.yaml` or `.yml` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&input),
            Some("yaml" | "yml") => Self::from_yaml_str(&input),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let approval = &self.approval;
        if approval.default_required_approvals == 0 {
            return Err(ConfigError::Invalid(
                "approval.default_required_approvals must be at least 1".into(),
            ));
        }
        if approval.default_required_approvals > approval.max_required_approvals {
            return Err(ConfigError::Invalid(format!(
                "approval.default_required_approvals exceeds approval.max_required_approvals ({})",
                approval.max_required_approvals
            )));
        }
        if approval.max_expiry_hours == 0 {
            return Err(ConfigError::Invalid("approval.max_expiry_hours must be positive".into()));
        }
        if approval.approver_roles.is_empty() {
            return Err(ConfigError::Invalid("approval.approver_roles is empty".into()));
        }

        let deployment = &self.deployment;
        if deployment.deployer_roles.is_empty() {
            return Err(ConfigError::Invalid("deployment.deployer_roles is empty".into()));
        }
        if deployment.baseline_window_hours == 0 {
            return Err(ConfigError::Invalid(
                "deployment.baseline_window_hours must be positive".into(),
            ));
        }
        if deployment.system_actor.is_blank() {
            return Err(ConfigError::Invalid("deployment.system_actor is blank".into()));
        }

        let regression = &self.regression;
        regression.success_rate_drop.validate("regression.success_rate_drop")?;
        regression.efficiency_drop.validate("regression.efficiency_drop")?;
        if !(regression.error_rate_increase.is_finite() && regression.error_rate_increase > 0.0) {
            return Err(ConfigError::Invalid(
                "regression.error_rate_increase must be positive".into(),
            ));
        }
        if !(regression.critical_error_multiplier.is_finite()
            && regression.critical_error_multiplier > 1.0)
        {
            return Err(ConfigError::Invalid(
                "regression.critical_error_multiplier must be greater than 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&regression.min_error_rate_delta) {
            return Err(ConfigError::Invalid(
                "regression.min_error_rate_delta must be in [0, 1)".into(),
            ));
        }
        if regression.min_sample_size == 0 {
            return Err(ConfigError::Invalid(
                "regression.min_sample_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ReleaseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.approval.default_required_approvals, 1);
        assert_eq!(config.deployment.baseline_window_hours, 24);
        assert_eq!(config.regression.min_sample_size, 30);
        assert!(config.deployment.auto_rollback);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = ReleaseConfig::from_toml_str(
            r#"
            [approval]
            default_required_approvals = 2

            [regression]
            min_sample_size = 50

            [regression.success_rate_drop]
            low = 0.02
            medium = 0.05
            high = 0.15
            "#,
        )
        .unwrap();

        assert_eq!(config.approval.default_required_approvals, 2);
        assert_eq!(config.approval.max_required_approvals, 10);
        assert_eq!(config.regression.min_sample_size, 50);
        assert_eq!(config.regression.success_rate_drop.low, 0.02);
        assert_eq!(config.regression.efficiency_drop, TierThresholds::default());
        assert_eq!(config.deployment, DeploymentConfig::default());
    }

    #[test]
    fn yaml_roles_parse() {
        let config = ReleaseConfig::from_yaml_str(
            "deployment:\n  deployer_roles: [admin]\n  auto_rollback: false\n",
        )
        .unwrap();
        assert_eq!(config.deployment.deployer_roles, vec![Role::Admin]);
        assert!(!config.deployment.auto_rollback);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ReleaseConfig::from_toml_str("[approval]\ndefault_required_approvals = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ReleaseConfig::from_toml_str(
            "[regression.efficiency_drop]\nlow = 0.3\nmedium = 0.2\nhigh = 0.1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ReleaseConfig::from_toml_str("[regression]\ncritical_error_multiplier = 1.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ReleaseConfig::from_toml_str("[regression]\nmin_error_rate_delta = -0.1\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ReleaseConfig::from_toml_str("approval = 3").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidToml(_)));
    }

    #[test]
    fn loads_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("release.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(file, "[deployment]\nbaseline_window_hours = 48").unwrap();
        let config = ReleaseConfig::from_path(&toml_path).unwrap();
        assert_eq!(config.deployment.baseline_window_hours, 48);

        let yaml_path = dir.path().join("release.yml");
        std::fs::write(&yaml_path, "approval:\n  max_expiry_hours: 24\n").unwrap();
        let config = ReleaseConfig::from_path(&yaml_path).unwrap();
        assert_eq!(config.approval.max_expiry_hours, 24);

        let json_path = dir.path().join("release.json");
        std::fs::write(&json_path, "{}").unwrap();
        assert!(matches!(
            ReleaseConfig::from_path(&json_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        assert!(matches!(
            ReleaseConfig::from_path(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
