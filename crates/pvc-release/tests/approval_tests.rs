//! Approval workflow tests

use chrono::Duration;
use pretty_assertions::assert_eq;
use pvc_release::{ReleaseError, ReleaseConfig};
use pvc_store::{ApprovalStatus, ErrorKind, PromptStore, VersionStatus, VoteDecision};
use pvc_test_utils::{user, Harness, ADMIN, AUTHOR, DEVELOPER, REVIEWER_A, REVIEWER_B};

#[tokio::test]
async fn quorum_of_two_needs_two_distinct_reviewers() {
    let h = Harness::new();
    let v = h.seed_candidate("You are a support agent.").await;
    let approvals = h.registry.approvals();

    let request = approvals
        .request_approval(v.id, &user(AUTHOR), Some(2), Some(24))
        .await
        .unwrap();
    assert_eq!(request.required_approvals, 2);
    assert_eq!(request.current_approvals, 0);
    assert!(request.status.is_pending());

    let view = approvals
        .cast_approve_vote(v.id, &user(REVIEWER_A), Some("reads well".into()))
        .await
        .unwrap();
    assert_eq!(view.request.current_approvals, 1);
    assert!(!view.can_deploy);
    assert_eq!(h.status_of(v.id).await, VersionStatus::Candidate);

    let err = approvals
        .cast_approve_vote(v.id, &user(REVIEWER_A), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let view = approvals
        .cast_approve_vote(v.id, &user(REVIEWER_B), None)
        .await
        .unwrap();
    assert_eq!(view.request.current_approvals, 2);
    assert!(view.request.status.is_approved());
    assert!(view.can_deploy);
    assert_eq!(view.votes.len(), 2);
    assert_eq!(h.status_of(v.id).await, VersionStatus::Approved);

    // decided requests take no more votes
    let err = approvals
        .cast_approve_vote(v.id, &user(ADMIN), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn rejection_is_a_veto() {
    let h = Harness::new();
    let v = h.seed_candidate("draft").await;
    let approvals = h.registry.approvals();
    approvals
        .request_approval(v.id, &user(AUTHOR), Some(3), None)
        .await
        .unwrap();
    approvals
        .cast_approve_vote(v.id, &user(REVIEWER_A), None)
        .await
        .unwrap();

    let err = approvals
        .cast_reject_vote(v.id, &user(REVIEWER_B), "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::Validation(_)));

    let view = approvals
        .cast_reject_vote(v.id, &user(REVIEWER_B), "leaks internal tool names")
        .await
        .unwrap();
    assert_eq!(
        view.request.status,
        ApprovalStatus::Rejected {
            rejected_by: user(REVIEWER_B),
            rejected_at: h.registry.versions().clock().now(),
        }
    );
    assert!(!view.can_deploy);
    assert_eq!(view.votes[1].decision, VoteDecision::Reject);
    assert_eq!(h.status_of(v.id).await, VersionStatus::Candidate);

    // a rejected version can be put up for review again
    approvals
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn only_reviewers_vote() {
    let h = Harness::new();
    let v = h.seed_candidate("draft").await;
    let approvals = h.registry.approvals();
    approvals
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap();

    for who in [DEVELOPER, "mallory"] {
        let err = approvals
            .cast_approve_vote(v.id, &user(who), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden, "{who}");
    }
    let view = approvals.get_approval_status(v.id).await.unwrap();
    assert_eq!(view.request.current_approvals, 0);
    assert!(view.votes.is_empty());
}

#[tokio::test]
async fn expired_request_refuses_votes_and_allows_a_new_request() {
    let h = Harness::new();
    let v = h.seed_candidate("draft").await;
    let approvals = h.registry.approvals();
    let first = approvals
        .request_approval(v.id, &user(AUTHOR), Some(2), Some(1))
        .await
        .unwrap();
    let deadline = first.expires_at.unwrap();

    h.clock.advance(Duration::minutes(61));
    assert_eq!(
        approvals.get_approval_status(v.id).await.unwrap().request.status,
        ApprovalStatus::Expired { expired_at: deadline }
    );
    assert!(approvals.list_pending_approvals(None).await.unwrap().is_empty());
    // reads apply expiry without writing it back
    let stored = h.store.latest_approval(v.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);

    let err = approvals
        .cast_approve_vote(v.id, &user(REVIEWER_A), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::Expired { request, .. } if request == first.id));
    let stored = h.store.latest_approval(v.id).await.unwrap().unwrap();
    assert_eq!(stored.id, first.id);
    assert_eq!(stored.status, ApprovalStatus::Expired { expired_at: deadline });

    let second = approvals
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    let pending = approvals.list_pending_approvals(Some(&h.agent)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);
}

#[tokio::test]
async fn request_validation() {
    let h = Harness::with_config(ReleaseConfig::default().with_default_required_approvals(2));
    let v = h.seed_candidate("draft").await;
    let approvals = h.registry.approvals();

    for (quorum, hours) in [(Some(0), None), (Some(11), None), (None, Some(0)), (None, Some(721))] {
        let err = approvals
            .request_approval(v.id, &user(AUTHOR), quorum, hours)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{quorum:?} {hours:?}");
    }

    let request = approvals
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap();
    assert_eq!(request.required_approvals, 2);
    assert_eq!(request.expires_at, None);

    let err = approvals
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = approvals
        .get_approval_status(pvc_store::VersionId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn approved_versions_are_not_reviewed_again() {
    let h = Harness::new();
    let v = h.approved_version("ready").await;
    let err = h
        .registry
        .approvals()
        .request_approval(v.id, &user(AUTHOR), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
