//! Regression evaluation
//!
//! Compares a deployment's post-activation snapshot against its baseline.
//! Evaluation is a pure function of the two snapshots and the thresholds, so
//! the same inputs always yield the same severity and recommendations.
//!
//! - Success rate and efficiency are graded by relative drop (low, medium,
//!   high tiers).
//! - Error rate counts as medium past the relative-increase threshold, and as
//!   critical once it reaches the configured multiple of the baseline. An
//!   absolute increase under `min_error_rate_delta` is ignored. A critical
//!   grade needs both snapshots to meet the sample floor; otherwise it is
//!   capped at high.

use pvc_store::{
    Metric, MetricDelta, MetricsSnapshot, Recommendation, RecommendedAction, Severity,
};
use serde::{Deserialize, Serialize};

use crate::config::{RegressionThresholds, TierThresholds};

/// Result of comparing two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAssessment {
    /// Whether any metric crossed a threshold
    pub detected: bool,
    /// Worst severity found, `Low` when nothing was detected
    pub severity: Severity,
    /// Success rate, error rate and efficiency, in that order
    pub deltas: Vec<MetricDelta>,
    /// Whether both snapshots met the sample floor
    pub sample_size_sufficient: bool,
    /// Suggested follow-ups
    pub recommendations: Vec<Recommendation>,
}

/// Grades snapshots against [`RegressionThresholds`]
#[derive(Debug, Clone, Default)]
pub struct RegressionEvaluator {
    thresholds: RegressionThresholds,
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn delta(metric: Metric, before: f64, after: f64) -> MetricDelta {
    let (before, after) = (finite(before), finite(after));
    let relative_change = (before != 0.0).then(|| (after - before) / before);
    MetricDelta {
        metric,
        before,
        after,
        relative_change,
    }
}

/// Severity of a relative drop (`before` higher is better)
fn drop_severity(delta: &MetricDelta, tiers: &TierThresholds) -> Option<Severity> {
    let drop = -delta.relative_change?;
    if drop >= tiers.high {
        Some(Severity::High)
    } else if drop >= tiers.medium {
        Some(Severity::Medium)
    } else if drop >= tiers.low {
        Some(Severity::Low)
    } else {
        None
    }
}

fn metric_name(metric: Metric) -> &'static str {
    match metric {
        Metric::SuccessRate => "success rate",
        Metric::ErrorRate => "error rate",
        Metric::Efficiency => "efficiency",
    }
}

fn percent(delta: &MetricDelta) -> String {
    match delta.relative_change {
        Some(change) => format!("{:+.1}%", change * 100.0),
        None => format!("{:.3} -> {:.3}", delta.before, delta.after),
    }
}

impl RegressionEvaluator {
    /// Create an evaluator
    #[inline]
    #[must_use]
    pub fn new(thresholds: RegressionThresholds) -> Self {
        Self { thresholds }
    }

    /// Grade the error-rate delta
    fn error_severity(&self, delta: &MetricDelta, sufficient: bool) -> Option<Severity> {
        let t = &self.thresholds;
        if delta.after - delta.before < t.min_error_rate_delta {
            return None;
        }
        let critical_multiple =
            delta.after > delta.before && delta.after >= delta.before * t.critical_error_multiplier;
        if critical_multiple {
            return Some(if sufficient { Severity::Critical } else { Severity::High });
        }
        match delta.relative_change {
            Some(change) if change >= t.error_rate_increase => Some(Severity::Medium),
            _ => None,
        }
    }

    /// Compare `after` against `before`
    #[must_use]
    pub fn evaluate(
        &self,
        before: &MetricsSnapshot,
        after: &MetricsSnapshot,
    ) -> RegressionAssessment {
        let t = &self.thresholds;
        let sufficient =
            before.sample_count >= t.min_sample_size && after.sample_count >= t.min_sample_size;

        let deltas = vec![
            delta(Metric::SuccessRate, before.success_rate, after.success_rate),
            delta(Metric::ErrorRate, before.error_rate, after.error_rate),
            delta(Metric::Efficiency, before.avg_efficiency, after.avg_efficiency),
        ];

        let mut recommendations = Vec::new();
        let mut worst: Option<Severity> = None;
        for d in &deltas {
            let severity = match d.metric {
                Metric::SuccessRate => drop_severity(d, &t.success_rate_drop),
                Metric::Efficiency => drop_severity(d, &t.efficiency_drop),
                Metric::ErrorRate => self.error_severity(d, sufficient),
            };
            let Some(severity) = severity else {
                continue;
            };
            worst = worst.max(Some(severity));

            let name = metric_name(d.metric);
            let (action, message) = match severity {
                Severity::Critical => (
                    RecommendedAction::Rollback,
                    format!("{name} regressed critically ({}), roll back", percent(d)),
                ),
                // an error spike on thin data is not worth reverting yet
                Severity::High if d.metric == Metric::ErrorRate && !sufficient => (
                    RecommendedAction::Investigate,
                    format!(
                        "{name} spiked ({}) on too few samples to confirm, investigate",
                        percent(d)
                    ),
                ),
                Severity::High => (
                    RecommendedAction::ConsiderRollback,
                    format!("{name} regressed sharply ({}), consider rolling back", percent(d)),
                ),
                Severity::Medium => (
                    RecommendedAction::Investigate,
                    format!("{name} regressed ({}), investigate trajectories", percent(d)),
                ),
                Severity::Low => (
                    RecommendedAction::Monitor,
                    format!("{name} drifted ({}), keep monitoring", percent(d)),
                ),
            };
            recommendations.push(Recommendation {
                action,
                metric: Some(d.metric),
                message,
            });
        }

        let detected = worst.is_some();
        if !detected {
            recommendations.push(Recommendation {
                action: RecommendedAction::Monitor,
                metric: None,
                message: "no regression detected".into(),
            });
        }

        RegressionAssessment {
            detected,
            severity: worst.unwrap_or(Severity::Low),
            deltas,
            sample_size_sufficient: sufficient,
            recommendations,
        }
    }
}
