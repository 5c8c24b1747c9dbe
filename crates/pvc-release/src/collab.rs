//! Collaborators consumed by the pipeline
//!
//! - [`ReviewerDirectory`]: role lookup by user id
//! - [`MetricsSource`]: trailing-window performance snapshots by agent
//!
//! Both come with in-process implementations for tests, simulations and
//! single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use pvc_store::{AgentId, MetricsSnapshot, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::{ReleaseError, ReleaseResult};

/// Role of a user in the release process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// May author versions
    Developer,
    /// May vote, deploy and roll back
    Reviewer,
    /// Everything
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Viewer => "viewer",
            Self::Developer => "developer",
            Self::Reviewer => "reviewer",
            Self::Admin => "admin",
        })
    }
}

/// Role lookup
#[async_trait]
pub trait ReviewerDirectory: Send + Sync {
    /// Role of `user`, `None` when unknown
    async fn role_of(&self, user: &UserId) -> ReleaseResult<Option<Role>>;
}

/// Map-backed directory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    roles: DashMap<UserId, Role>,
}

impl StaticDirectory {
    /// Empty directory
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user (builder form)
    #[must_use]
    pub fn with_user(self, user: impl Into<UserId>, role: Role) -> Self {
        self.roles.insert(user.into(), role);
        self
    }

    /// Add or change a user's role
    pub fn set_role(&self, user: impl Into<UserId>, role: Role) {
        self.roles.insert(user.into(), role);
    }

    /// Remove a user
    pub fn remove(&self, user: &UserId) {
        self.roles.remove(user);
    }
}

#[async_trait]
impl ReviewerDirectory for StaticDirectory {
    async fn role_of(&self, user: &UserId) -> ReleaseResult<Option<Role>> {
        Ok(self.roles.get(user).map(|r| *r))
    }
}

/// Fail with `Forbidden` unless `user` holds one of `allowed`
pub(crate) async fn require_role(
    directory: &dyn ReviewerDirectory,
    user: &UserId,
    allowed: &[Role],
    action: &'static str,
) -> ReleaseResult<Role> {
    if user.is_blank() {
        return Err(ReleaseError::Validation("acting user is required".into()));
    }
    match directory.role_of(user).await? {
        Some(role) if allowed.contains(&role) => Ok(role),
        role => {
            tracing::warn!(user = %user, role = ?role, "Refused: not allowed to {}", action);
            Err(ReleaseError::Forbidden {
                user: user.clone(),
                action,
            })
        }
    }
}

/// Performance aggregates
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Aggregate over `[window_start, window_end)`
    async fn snapshot(
        &self,
        agent: &AgentId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> ReleaseResult<MetricsSnapshot>;
}

/// Scripted metrics: queued snapshots are returned in order, the last one
/// repeats. Agents without data get an empty snapshot.
#[derive(Debug, Default)]
pub struct FixedMetrics {
    queues: Mutex<HashMap<AgentId, VecDeque<MetricsSnapshot>>>,
}

impl FixedMetrics {
    /// No data for any agent
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a snapshot for `agent`; window bounds are overwritten on read
    pub fn push(&self, agent: &AgentId, snapshot: MetricsSnapshot) {
        self.queues
            .lock()
            .entry(agent.clone())
            .or_default()
            .push_back(snapshot);
    }

    /// Replace everything queued for `agent` with a single snapshot
    pub fn set(&self, agent: &AgentId, snapshot: MetricsSnapshot) {
        self.queues
            .lock()
            .insert(agent.clone(), VecDeque::from([snapshot]));
    }
}

#[async_trait]
impl MetricsSource for FixedMetrics {
    async fn snapshot(
        &self,
        agent: &AgentId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> ReleaseResult<MetricsSnapshot> {
        let mut queues = self.queues.lock();
        let next = match queues.get_mut(agent) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(match next {
            Some(snapshot) => MetricsSnapshot {
                window_start,
                window_end,
                ..snapshot
            },
            None => MetricsSnapshot::empty(window_start, window_end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(success_rate: f64) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            success_rate,
            sample_count: 100,
            ..MetricsSnapshot::empty(now, now)
        }
    }

    #[tokio::test]
    async fn fixed_metrics_drain_then_repeat() {
        let metrics = FixedMetrics::new();
        let agent = AgentId::new("agent");
        let (start, end) = (Utc::now(), Utc::now());

        assert_eq!(metrics.snapshot(&agent, start, end).await.unwrap().sample_count, 0);

        metrics.push(&agent, sample(0.9));
        metrics.push(&agent, sample(0.7));

        let rates: Vec<f64> = [
            metrics.snapshot(&agent, start, end).await.unwrap(),
            metrics.snapshot(&agent, start, end).await.unwrap(),
            metrics.snapshot(&agent, start, end).await.unwrap(),
        ]
        .iter()
        .map(|s| s.success_rate)
        .collect();
        assert_eq!(rates, vec![0.9, 0.7, 0.7]);

        let snap = metrics.snapshot(&agent, start, end).await.unwrap();
        assert_eq!((snap.window_start, snap.window_end), (start, end));
    }

    #[tokio::test]
    async fn role_checks() {
        let directory = StaticDirectory::new()
            .with_user("alice", Role::Reviewer)
            .with_user("dave", Role::Developer);
        let allowed = [Role::Reviewer, Role::Admin];

        let role = require_role(&directory, &UserId::new("alice"), &allowed, "vote")
            .await
            .unwrap();
        assert_eq!(role, Role::Reviewer);

        let err = require_role(&directory, &UserId::new("dave"), &allowed, "vote")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Forbidden { .. }));

        let err = require_role(&directory, &UserId::new("mallory"), &allowed, "vote")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Forbidden { .. }));

        let err = require_role(&directory, &UserId::new(""), &allowed, "vote")
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Validation(_)));
    }
}
