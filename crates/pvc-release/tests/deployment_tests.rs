//! Deployment, regression and rollback tests

use pretty_assertions::assert_eq;
use pvc_release::{ReleaseConfig, ReleaseError};
use pvc_store::{
    DeploymentStatus, ErrorKind, PromptStore, RecommendedAction, Severity, VersionStatus,
};
use pvc_test_utils::{
    degraded_metrics, healthy_metrics, metrics, user, Harness, ADMIN, DEVELOPER, REVIEWER_A,
};

#[tokio::test]
async fn second_deployment_supersedes_first_and_rollback_restores_it() {
    let h = Harness::new();
    h.metrics.set(&h.agent, healthy_metrics());
    let pipeline = h.registry.deployments();

    let v1 = h.approved_version("v1 prompt").await;
    let d1 = pipeline.deploy(v1.id, &user(ADMIN)).await.unwrap();
    assert!(d1.is_active());
    assert_eq!(d1.previous_deployment_id, None);
    assert_eq!(d1.metrics_before.sample_count, 200);
    assert_eq!(h.status_of(v1.id).await, VersionStatus::Production);

    let v2 = h.approved_version("v2 prompt").await;
    h.advance(5);
    let d2 = pipeline.deploy(v2.id, &user(REVIEWER_A)).await.unwrap();
    assert_eq!(d2.previous_deployment_id, Some(d1.id));

    let d1_now = pipeline.get_deployment(d1.id).await.unwrap();
    assert_eq!(
        d1_now.status,
        DeploymentStatus::Superseded {
            superseded_at: d2.deployed_at,
            superseded_by: d2.id,
        }
    );
    assert_eq!(h.status_of(v1.id).await, VersionStatus::Retired);
    assert_eq!(h.status_of(v2.id).await, VersionStatus::Production);
    assert_eq!(
        h.registry.versions().active_version(&h.agent).await.unwrap().map(|v| v.id),
        Some(v2.id)
    );

    let restored = pipeline
        .rollback(d2.id, &user(ADMIN), Some("bad tone".into()))
        .await
        .unwrap();
    assert_eq!(restored.id, d1.id);
    assert!(restored.is_active());

    let d2_now = pipeline.get_deployment(d2.id).await.unwrap();
    assert!(d2_now.is_rolled_back());
    assert!(matches!(
        d2_now.status,
        DeploymentStatus::RolledBack { ref rolled_back_by, ref reason, .. }
            if rolled_back_by == &user(ADMIN) && reason.as_deref() == Some("bad tone")
    ));
    assert_eq!(h.status_of(v1.id).await, VersionStatus::Production);
    assert_eq!(h.status_of(v2.id).await, VersionStatus::Candidate);
    assert_eq!(pipeline.active_deployment(&h.agent).await.unwrap().unwrap().id, d1.id);
    assert_eq!(
        h.store.active_version(&h.agent).await.unwrap(),
        Some(v1.id)
    );

    let history: Vec<_> = pipeline
        .list_deployments(&h.agent)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(history, vec![d2.id, d1.id]);

    // rolled back is terminal
    let err = pipeline.rollback(d2.id, &user(ADMIN), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn first_deployment_has_nothing_to_roll_back_to() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    let v1 = h.approved_version("only prompt").await;
    let d1 = pipeline.deploy(v1.id, &user(ADMIN)).await.unwrap();

    let err = pipeline.rollback(d1.id, &user(ADMIN), None).await.unwrap_err();
    assert!(matches!(err, ReleaseError::NoPriorDeployment(id) if id == d1.id));

    assert!(pipeline.get_deployment(d1.id).await.unwrap().is_active());
    assert_eq!(h.status_of(v1.id).await, VersionStatus::Production);
    assert_eq!(h.store.active_version(&h.agent).await.unwrap(), Some(v1.id));
}

#[tokio::test]
async fn repeated_rollbacks_walk_the_chain_one_link_at_a_time() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    let mut chain = Vec::new();
    for content in ["a", "b", "c"] {
        let v = h.approved_version(content).await;
        chain.push(pipeline.deploy(v.id, &user(ADMIN)).await.unwrap());
    }
    let [d1, d2, d3] = [chain[0].clone(), chain[1].clone(), chain[2].clone()];

    assert_eq!(pipeline.rollback(d3.id, &user(ADMIN), None).await.unwrap().id, d2.id);
    assert_eq!(pipeline.rollback(d2.id, &user(ADMIN), None).await.unwrap().id, d1.id);

    let err = pipeline.rollback(d1.id, &user(ADMIN), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPriorDeployment);

    assert_eq!(pipeline.active_deployment(&h.agent).await.unwrap().unwrap().id, d1.id);
    assert_eq!(h.status_of(d1.version_id).await, VersionStatus::Production);
    assert_eq!(h.status_of(d2.version_id).await, VersionStatus::Candidate);
    assert_eq!(h.status_of(d3.version_id).await, VersionStatus::Candidate);
}

#[tokio::test]
async fn superseded_deployment_cannot_be_rolled_back() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    let d1 = pipeline
        .deploy(h.approved_version("a").await.id, &user(ADMIN))
        .await
        .unwrap();
    pipeline
        .deploy(h.approved_version("b").await.id, &user(ADMIN))
        .await
        .unwrap();

    let err = pipeline.rollback(d1.id, &user(ADMIN), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn deploy_requires_role_and_approval() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();

    let candidate = h.seed_candidate("unreviewed").await;
    let err = pipeline.deploy(candidate.id, &user(ADMIN)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let approved = h.approved_version("reviewed").await;
    let err = pipeline.deploy(approved.id, &user(DEVELOPER)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(pipeline.active_deployment(&h.agent).await.unwrap().is_none());

    let d = pipeline.deploy(approved.id, &user(ADMIN)).await.unwrap();
    let err = pipeline.rollback(d.id, &user(DEVELOPER), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // already in production
    let err = pipeline.deploy(approved.id, &user(ADMIN)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn healthy_deployment_reports_no_regression() {
    let h = Harness::new();
    h.metrics.set(&h.agent, healthy_metrics());
    let pipeline = h.registry.deployments();
    let v = h.approved_version("steady").await;
    let d = pipeline.deploy(v.id, &user(ADMIN)).await.unwrap();

    h.advance(60);
    let report = pipeline.evaluate_regression(d.id).await.unwrap();
    assert!(!report.detected);
    assert_eq!(report.severity, Severity::Low);
    assert_eq!(report.recommendations.len(), 1);
    assert_eq!(report.recommendations[0].action, RecommendedAction::Monitor);
    assert!(!report.auto_rollback_triggered);

    let stored = pipeline.get_deployment(d.id).await.unwrap();
    assert!(!stored.regression_detected);
    let after = stored.metrics_after.unwrap();
    assert_eq!(after.window_start, d.deployed_at);
    assert_eq!(
        pipeline.get_regression_report(d.id).await.unwrap().unwrap().id,
        report.id
    );
}

#[tokio::test]
async fn critical_regression_rolls_back_automatically() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, healthy_metrics());

    let v1 = h.approved_version("v1").await;
    let d1 = pipeline.deploy(v1.id, &user(ADMIN)).await.unwrap();
    let v2 = h.approved_version("v2").await;
    let d2 = pipeline.deploy(v2.id, &user(ADMIN)).await.unwrap();

    h.metrics.set(&h.agent, degraded_metrics());
    h.advance(120);
    let report = pipeline.evaluate_regression(d2.id).await.unwrap();

    assert!(report.detected);
    assert_eq!(report.severity, Severity::Critical);
    assert!(report.auto_rollback_triggered);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.action == RecommendedAction::Rollback));

    let d2_now = pipeline.get_deployment(d2.id).await.unwrap();
    assert!(d2_now.regression_detected);
    assert!(matches!(
        d2_now.status,
        DeploymentStatus::RolledBack { ref rolled_back_by, .. }
            if rolled_back_by == &h.registry.config().deployment.system_actor
    ));
    assert_eq!(pipeline.active_deployment(&h.agent).await.unwrap().unwrap().id, d1.id);
    assert_eq!(h.status_of(v1.id).await, VersionStatus::Production);
    assert_eq!(h.status_of(v2.id).await, VersionStatus::Candidate);
}

#[tokio::test]
async fn critical_regression_without_prior_keeps_report_and_fails() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, healthy_metrics());
    let v1 = h.approved_version("v1").await;
    let d1 = pipeline.deploy(v1.id, &user(ADMIN)).await.unwrap();

    h.metrics.set(&h.agent, degraded_metrics());
    let err = pipeline.evaluate_regression(d1.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoPriorDeployment);

    let report = pipeline.get_regression_report(d1.id).await.unwrap().unwrap();
    assert_eq!(report.severity, Severity::Critical);
    assert!(!report.auto_rollback_triggered);
    let d1_now = pipeline.get_deployment(d1.id).await.unwrap();
    assert!(d1_now.is_active());
    assert!(d1_now.regression_detected);
}

#[tokio::test]
async fn auto_rollback_can_be_disabled() {
    let h = Harness::with_config(ReleaseConfig::default().with_auto_rollback(false));
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, healthy_metrics());
    pipeline
        .deploy(h.approved_version("v1").await.id, &user(ADMIN))
        .await
        .unwrap();
    let d2 = pipeline
        .deploy(h.approved_version("v2").await.id, &user(ADMIN))
        .await
        .unwrap();

    h.metrics.set(&h.agent, degraded_metrics());
    let report = pipeline.evaluate_regression(d2.id).await.unwrap();
    assert_eq!(report.severity, Severity::Critical);
    assert!(!report.auto_rollback_triggered);
    assert!(pipeline.get_deployment(d2.id).await.unwrap().is_active());
}

#[tokio::test]
async fn thin_samples_cap_severity() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, healthy_metrics());
    pipeline
        .deploy(h.approved_version("v1").await.id, &user(ADMIN))
        .await
        .unwrap();
    let d2 = pipeline
        .deploy(h.approved_version("v2").await.id, &user(ADMIN))
        .await
        .unwrap();

    h.metrics.set(&h.agent, metrics(0.92, 0.30, 0.80, 4));
    let report = pipeline.evaluate_regression(d2.id).await.unwrap();
    assert!(report.detected);
    assert!(!report.sample_size_sufficient);
    assert_eq!(report.severity, Severity::High);
    assert!(!report.auto_rollback_triggered);
    assert!(pipeline.get_deployment(d2.id).await.unwrap().is_active());
}

#[tokio::test]
async fn error_blip_on_clean_baseline_keeps_deployment() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, metrics(0.92, 0.0, 0.80, 10_000));
    pipeline
        .deploy(h.approved_version("v1").await.id, &user(ADMIN))
        .await
        .unwrap();
    let d2 = pipeline
        .deploy(h.approved_version("v2").await.id, &user(ADMIN))
        .await
        .unwrap();

    h.metrics.set(&h.agent, metrics(0.92, 0.0001, 0.80, 10_000));
    let report = pipeline.evaluate_regression(d2.id).await.unwrap();
    assert!(!report.detected);
    assert!(!report.auto_rollback_triggered);
    assert!(pipeline.get_deployment(d2.id).await.unwrap().is_active());
}

#[tokio::test]
async fn served_branch_cannot_be_deleted_until_rolled_off() {
    let h = Harness::new();
    let pipeline = h.registry.deployments();
    h.metrics.set(&h.agent, healthy_metrics());

    let feature = h.branch("feature", None).await;
    let f1 = h.commit(&feature, "feature prompt").await;
    h.approve(f1.id).await;
    pipeline
        .deploy(h.approved_version("v1").await.id, &user(ADMIN))
        .await
        .unwrap();
    let d2 = pipeline.deploy(f1.id, &user(ADMIN)).await.unwrap();

    let versions = h.registry.versions();
    let err = versions.delete_branch(feature.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(versions.get_branch(feature.id).await.is_ok());

    pipeline.rollback(d2.id, &user(ADMIN), None).await.unwrap();
    versions.delete_branch(feature.id).await.unwrap();
    assert_eq!(versions.get_branch(feature.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(h.status_of(f1.id).await, VersionStatus::Candidate);
}

#[tokio::test]
async fn unknown_deployment_is_not_found() {
    let h = Harness::new();
    let id = pvc_store::DeploymentId::new();
    let pipeline = h.registry.deployments();
    assert_eq!(pipeline.get_deployment(id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        pipeline.evaluate_regression(id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        pipeline.get_regression_report(id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
