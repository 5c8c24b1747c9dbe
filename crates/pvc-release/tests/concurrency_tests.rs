//! Races on shared approval requests and deployments

use futures::future::join_all;
use pvc_release::Role;
use pvc_store::{ErrorKind, PromptStore, VersionStatus};
use pvc_test_utils::{healthy_metrics, user, Harness, ADMIN, AUTHOR};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_never_exceed_quorum() {
    let h = Arc::new(Harness::new());
    let reviewers: Vec<String> = (0..8).map(|i| format!("reviewer-{i}")).collect();
    for name in &reviewers {
        h.directory.set_role(name.as_str(), Role::Reviewer);
    }

    let v = h.seed_candidate("contended").await;
    h.registry
        .approvals()
        .request_approval(v.id, &user(AUTHOR), Some(3), None)
        .await
        .unwrap();

    let tasks = reviewers.iter().cloned().map(|name| {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            h.registry
                .approvals()
                .cast_approve_vote(v.id, &user(&name), None)
                .await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 3);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    let view = h.registry.approvals().get_approval_status(v.id).await.unwrap();
    assert_eq!(view.request.current_approvals, 3);
    assert_eq!(view.votes.len(), 3);
    assert!(view.can_deploy);
    assert_eq!(h.status_of(v.id).await, VersionStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deploys_leave_one_active_deployment() {
    let h = Arc::new(Harness::new());
    h.metrics.set(&h.agent, healthy_metrics());

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(h.approved_version(&format!("prompt {i}")).await.id);
    }

    let tasks = ids.iter().copied().map(|id| {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.registry.deployments().deploy(id, &user(ADMIN)).await })
    });
    let deployments: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert_eq!(deployments.len(), 5);
    assert_eq!(h.store.deployment_count(), 5);

    let history = h.registry.deployments().list_deployments(&h.agent).await.unwrap();
    let active: Vec<_> = history.iter().filter(|d| d.is_active()).collect();
    assert_eq!(active.len(), 1);

    // each deployment chains to the one before it
    let roots = history.iter().filter(|d| d.previous_deployment_id.is_none()).count();
    assert_eq!(roots, 1);

    let active_version = h.store.active_version(&h.agent).await.unwrap();
    assert_eq!(active_version, Some(active[0].version_id));
    let production = {
        let mut n = 0;
        for id in &ids {
            if h.status_of(*id).await == VersionStatus::Production {
                n += 1;
            }
        }
        n
    };
    assert_eq!(production, 1);
}
