//! Integration tests for the billing service: plan changes, recurring
//! billing, overdue handling and cancellation refunds.

mod common;

use common::*;
use chrono::{Duration, Utc};
use std::sync::Arc;

use orchestrator::billing::{validate_plan_change, PlanChangeKind};
use orchestrator::database::Database;
use orchestrator::services::{AlertService, BillingService};
use orchestrator::state::SubscriptionState;

struct BillingStack {
    _tmp: tempfile::TempDir,
    database: Arc<Database>,
    service: BillingService,
}

async fn setup() -> BillingStack {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let database = Arc::new(Database::new(":memory:").await.unwrap());
    let service = BillingService::new(
        database.clone(),
        Arc::new(AlertService::new(String::new())),
        config,
    );
    BillingStack {
        _tmp: tmp,
        database,
        service,
    }
}

/// Activate a subscription with a billing period starting today
async fn activate(database: &Database, subscription_id: i64) {
    let today = Utc::now().date_naive();
    database
        .update_subscription_state(subscription_id, SubscriptionState::Provisioning)
        .await
        .unwrap();
    database
        .update_subscription_state(subscription_id, SubscriptionState::Active)
        .await
        .unwrap();
    database
        .set_subscription_billing_dates(subscription_id, today, today + Duration::days(30))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_validate_plan_change_rules() {
    let stack = setup().await;
    let small = seed_plan(&stack.database, "small", "10.00", "0").await;
    let big = seed_plan(&stack.database, "big", "30.00", "0").await;
    let retired = seed_plan(&stack.database, "retired", "50.00", "0").await;
    stack.database.deactivate_plan(retired.id).await.unwrap();
    let retired = stack.database.get_plan(retired.id).await.unwrap();

    // Same plan is not an upgrade
    assert!(validate_plan_change(&small, &small, false).is_err());
    // Inactive targets are rejected
    assert!(validate_plan_change(&small, &retired, false).is_err());
    // Downgrades need explicit permission
    assert!(validate_plan_change(&big, &small, false).is_err());
    assert_eq!(
        validate_plan_change(&big, &small, true).unwrap(),
        PlanChangeKind::Downgrade
    );
    assert_eq!(
        validate_plan_change(&small, &big, false).unwrap(),
        PlanChangeKind::Upgrade
    );
}

#[tokio::test]
async fn test_upgrade_emits_proration_and_bumps_invoiced() {
    let stack = setup().await;
    let small = seed_plan(&stack.database, "small", "10.00", "0").await;
    let big = seed_plan(&stack.database, "big", "30.00", "0").await;
    let subscription = seed_subscription(&stack.database, small.id).await;
    activate(&stack.database, subscription.id).await;

    let amount = stack
        .service
        .change_plan(subscription.id, big.id, false)
        .await
        .unwrap();
    // Change on day 0 of the cycle charges the full difference
    assert_eq!(amount, dec("20.00"));

    let subscription = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription.plan_id, big.id);
    assert_eq!(subscription.total_invoiced, dec("20.00"));

    let events = stack
        .database
        .list_billing_events(subscription.id)
        .await
        .unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == "PRORATION" && e.amount == dec("20.00")));
}

#[tokio::test]
async fn test_downgrade_credit_does_not_shrink_totals() {
    let stack = setup().await;
    let small = seed_plan(&stack.database, "small", "10.00", "0").await;
    let big = seed_plan(&stack.database, "big", "30.00", "0").await;
    let subscription = seed_subscription(&stack.database, big.id).await;
    activate(&stack.database, subscription.id).await;

    let amount = stack
        .service
        .change_plan(subscription.id, small.id, true)
        .await
        .unwrap();
    assert!(amount < dec("0"));
    // The credit is bounded by one month of the old plan
    assert!(amount.abs() <= dec("30.00"));

    // total_invoiced is monotonic: a credit event exists, the total did not
    // go down
    let subscription = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription.total_invoiced, dec("0"));
    let events = stack
        .database
        .list_billing_events(subscription.id)
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event_type == "PRORATION" && e.amount < dec("0")));
}

#[tokio::test]
async fn test_recurring_billing_advances_dates_and_continues_past_failures() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "plan", "12.00", "0").await;
    let due = seed_subscription(&stack.database, plan.id).await;
    activate(&stack.database, due.id).await;

    // Make it due today
    let today = Utc::now().date_naive();
    stack
        .database
        .set_subscription_billing_dates(due.id, today - Duration::days(30), today)
        .await
        .unwrap();

    let report = stack.service.run_recurring_billing(today).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    let after = stack.database.get_subscription(due.id).await.unwrap();
    assert_eq!(after.total_invoiced, dec("12.00"));
    assert_eq!(after.current_period_start, Some(today));
    assert!(after.next_billing_date.unwrap() > today);

    // A second run the same day finds nothing due
    let report = stack.service.run_recurring_billing(today).await.unwrap();
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn test_overdue_subscriptions_get_suspended() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "plan", "12.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;
    activate(&stack.database, subscription.id).await;

    let today = Utc::now().date_naive();
    // Invoiced long ago, never paid, billing date 10 days in the past
    stack
        .database
        .add_subscription_invoiced(subscription.id, &dec("12.00"))
        .await
        .unwrap();
    stack
        .database
        .set_subscription_billing_dates(
            subscription.id,
            today - Duration::days(40),
            today - Duration::days(10),
        )
        .await
        .unwrap();

    let report = stack.service.run_overdue_checks(today).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let after = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(after.state, SubscriptionState::Suspended);
    let events = stack
        .database
        .list_billing_events(subscription.id)
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event_type == "OVERDUE"));
}

#[tokio::test]
async fn test_paid_up_subscription_is_not_suspended() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "plan", "12.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;
    activate(&stack.database, subscription.id).await;

    let today = Utc::now().date_naive();
    stack
        .database
        .add_subscription_invoiced(subscription.id, &dec("12.00"))
        .await
        .unwrap();
    stack
        .service
        .record_payment(subscription.id, &dec("12.00"))
        .await
        .unwrap();
    stack
        .database
        .set_subscription_billing_dates(
            subscription.id,
            today - Duration::days(40),
            today - Duration::days(10),
        )
        .await
        .unwrap();

    stack.service.run_overdue_checks(today).await.unwrap();
    let after = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(after.state, SubscriptionState::Active);
}

#[tokio::test]
async fn test_cancellation_within_grace_refunds_setup_fee() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "plan", "12.00", "25.00").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;
    activate(&stack.database, subscription.id).await;

    stack
        .service
        .cancel_subscription(subscription.id)
        .await
        .unwrap();

    let after = stack
        .database
        .get_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(after.state, SubscriptionState::Cancelled);
    assert!(after.cancelled_at.is_some());

    let events = stack
        .database
        .list_billing_events(subscription.id)
        .await
        .unwrap();
    let refund = events
        .iter()
        .find(|e| e.event_type == "SETUP_FEE_REFUND")
        .expect("refund event inside grace period");
    assert_eq!(refund.amount, dec("-25.00"));
}

#[tokio::test]
async fn test_monotonic_totals_rejected_on_negative_delta() {
    let stack = setup().await;
    let plan = seed_plan(&stack.database, "plan", "12.00", "0").await;
    let subscription = seed_subscription(&stack.database, plan.id).await;

    assert!(stack
        .database
        .add_subscription_invoiced(subscription.id, &dec("-1.00"))
        .await
        .is_err());
    assert!(stack
        .database
        .add_subscription_paid(subscription.id, &dec("-0.01"))
        .await
        .is_err());
    assert!(stack.service.record_payment(subscription.id, &dec("0")).await.is_err());
}
