//! Integration tests for the review code seed run.
//!
//! These run against the in-memory invitation store; the PostgreSQL
//! repository is covered by the persistence crate's tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::models::{CreatorType, InvitationCode, Redemption, RedemptionState};
use domain::services::{InMemoryInvitationStore, InvitationLifecycle, InvitationStore, SeedOutcome};
use fake::faker::internet::en::Username;
use fake::Fake;
use register_admin::config::{ReviewCodesConfig, ReviewPolicy};
use register_admin::seed::seed_review_codes;
use uuid::Uuid;

// ============================================================================
// Helper Functions
// ============================================================================

fn used_code(code: &str, used_by: &str) -> InvitationCode {
    let now = Utc::now();
    InvitationCode {
        id: Uuid::new_v4(),
        code: code.to_string(),
        state: RedemptionState::Used(Redemption {
            used_by: Some(used_by.to_string()),
            used_by_openid: Some(format!("wx-{}", used_by)),
            used_at: now - Duration::days(3),
        }),
        expire_at: now + Duration::days(1),
        created_by: 0,
        created_by_type: CreatorType::Admin,
        notes: Some("auto-approve review code".to_string()),
        created_at: now - Duration::days(29),
    }
}

async fn run(
    lifecycle: &InvitationLifecycle<impl InvitationStore>,
    config: &ReviewCodesConfig,
) -> (register_admin::seed::SeedReport, String) {
    let mut out = Vec::new();
    let report = seed_review_codes(lifecycle, config, &mut out)
        .await
        .expect("writing to a Vec cannot fail");
    (report, String::from_utf8(out).unwrap())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_empty_bypass_list_is_skipped() {
    let lifecycle = InvitationLifecycle::new(InMemoryInvitationStore::new());
    let config = ReviewCodesConfig::new(vec![], vec!["R1".to_string()]);

    let (report, printed) = run(&lifecycle, &config).await;

    assert_eq!(report.skipped(), vec![ReviewPolicy::AutoApprove]);
    assert_eq!(report.processed(), 1);
    assert_eq!(lifecycle.store().len(), 1);
    assert!(printed.contains("REVIEW_BYPASS_CODES is not configured"));
}

#[tokio::test]
async fn test_used_code_is_reset() {
    let store = InMemoryInvitationStore::new();
    store.insert(used_code("B1", "user42")).unwrap();
    let lifecycle = InvitationLifecycle::new(store);
    let config = ReviewCodesConfig::new(vec!["B1".to_string()], vec![]);

    let (report, printed) = run(&lifecycle, &config).await;

    assert_eq!(report.outcome_of("B1"), Some(&Ok(SeedOutcome::Reset)));
    let record = lifecycle.store().get_by_code("B1").await.unwrap().unwrap();
    assert!(!record.is_used());
    assert!(record.state.redemption().is_none());
    let drift = record.expire_at - (Utc::now() + Duration::days(30));
    assert!(drift.num_seconds().abs() <= 5);
    assert!(printed.contains("[reset]          B1"));
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let store = InMemoryInvitationStore::new();
    let user: String = Username().fake();
    store.insert(used_code("B1", &user)).unwrap();
    let lifecycle = InvitationLifecycle::new(store);
    let config = ReviewCodesConfig::new(
        vec!["B1".to_string(), "B2".to_string()],
        vec!["R1".to_string()],
    );

    run(&lifecycle, &config).await;
    let after_first: Vec<_> = ["B1", "B2", "R1"]
        .iter()
        .map(|c| lifecycle.store().snapshot(c).unwrap().unwrap())
        .collect();

    let (report, _) = run(&lifecycle, &config).await;
    let after_second: Vec<_> = ["B1", "B2", "R1"]
        .iter()
        .map(|c| lifecycle.store().snapshot(c).unwrap().unwrap())
        .collect();

    assert_eq!(after_first, after_second);
    assert!(report
        .results()
        .all(|r| r.outcome == Ok(SeedOutcome::AlreadyActive)));
}

#[tokio::test]
async fn test_commit_failure_is_reported_per_code() {
    let store = InMemoryInvitationStore::new();
    store.insert(used_code("B1", "user1")).unwrap();
    store.fail_commits(true);
    let lifecycle = InvitationLifecycle::new(store);
    let config = ReviewCodesConfig::new(vec!["B1".to_string()], vec!["R1".to_string()]);

    let (report, printed) = run(&lifecycle, &config).await;

    assert_eq!(report.failures(), 1);
    assert!(report.outcome_of("B1").unwrap().is_err());
    // R1 only needs an insert, which still succeeds
    assert_eq!(report.outcome_of("R1"), Some(&Ok(SeedOutcome::Created)));
    assert!(lifecycle.store().snapshot("B1").unwrap().unwrap().is_used());
    assert!(printed.contains("[failed]"));
}

#[tokio::test]
async fn test_concurrent_runs_leave_codes_unused() {
    let store = Arc::new(InMemoryInvitationStore::new());
    store.race_next_create(used_code("R1", "racer")).unwrap();
    let first = InvitationLifecycle::new(Arc::clone(&store));
    let second = InvitationLifecycle::new(Arc::clone(&store));
    let config = ReviewCodesConfig::new(vec![], vec!["R1".to_string()]);

    let (first_report, _) = run(&first, &config).await;
    let (second_report, _) = run(&second, &config).await;

    assert!(!first_report.has_failures());
    assert!(!second_report.has_failures());
    let record = store.snapshot("R1").unwrap().unwrap();
    assert_eq!(record.state, RedemptionState::Unused);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_seeded_codes_are_redeemable_and_reseedable() {
    let lifecycle = InvitationLifecycle::new(InMemoryInvitationStore::new());
    let config = ReviewCodesConfig::new(vec!["B1".to_string()], vec![]);
    run(&lifecycle, &config).await;

    lifecycle
        .redeem("B1", Some("user42".to_string()), Some("wx-42".to_string()))
        .await
        .unwrap();
    assert_eq!(config.policy_for("B1"), Some(ReviewPolicy::AutoApprove));

    let (report, _) = run(&lifecycle, &config).await;
    assert_eq!(report.outcome_of("B1"), Some(&Ok(SeedOutcome::Reset)));
    assert!(lifecycle
        .store()
        .snapshot("B1")
        .unwrap()
        .unwrap()
        .is_redeemable_at(Utc::now()));
}
