//! Billing orchestration on top of the pure calculator.
//!
//! Plan changes, recurring billing and overdue handling all end up as
//! `billing_events` rows; the external invoicing subsystem turns those into
//! documents. Batch runs tolerate per-item failures and report a tally.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::billing::{
    next_billing_date, prorated_plan_change_amount, setup_fee_refund, validate_plan_change,
    PlanChangeKind,
};
use crate::config::Config;
use crate::database::Database;
use crate::services::alert_service::{AlertService, AlertSeverity, AlertType};
use crate::state::SubscriptionState;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BillingService {
    database: Arc<Database>,
    alert_service: Arc<AlertService>,
    config: Arc<Config>,
}

impl BillingService {
    pub fn new(
        database: Arc<Database>,
        alert_service: Arc<AlertService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            database,
            alert_service,
            config,
        }
    }

    fn minimum_charge(&self) -> Result<BigDecimal> {
        BigDecimal::from_str(&self.config.billing.minimum_charge)
            .map_err(|e| anyhow!("Bad billing.minimum_charge in config: {}", e))
    }

    /// Change a subscription's plan mid-cycle, emitting the pro-rated
    /// adjustment. Returns the signed amount (negative = downgrade credit).
    pub async fn change_plan(
        &self,
        subscription_id: i64,
        new_plan_id: i64,
        allow_downgrade: bool,
    ) -> Result<BigDecimal> {
        let subscription = self.database.get_subscription(subscription_id).await?;
        if subscription.state != SubscriptionState::Active {
            return Err(anyhow!(
                "Plan changes require an active subscription (currently {})",
                subscription.state
            ));
        }
        let current_plan = self.database.get_plan(subscription.plan_id).await?;
        let new_plan = self.database.get_plan(new_plan_id).await?;

        let kind = validate_plan_change(&current_plan, &new_plan, allow_downgrade)?;

        let period_start = subscription
            .current_period_start
            .ok_or_else(|| anyhow!("Subscription {} has no billing period", subscription_id))?;
        let period_end = subscription
            .next_billing_date
            .ok_or_else(|| anyhow!("Subscription {} has no billing date", subscription_id))?;

        let today = Utc::now().date_naive();
        let amount = prorated_plan_change_amount(
            &current_plan.monthly_price,
            &new_plan.monthly_price,
            period_start,
            period_end,
            today.clamp(period_start, period_end),
            &self.minimum_charge()?,
        )?;

        let description = match kind {
            PlanChangeKind::Upgrade => format!(
                "Upgrade '{}' -> '{}', pro-rated",
                current_plan.name, new_plan.name
            ),
            PlanChangeKind::Downgrade => format!(
                "Downgrade '{}' -> '{}', pro-rated credit",
                current_plan.name, new_plan.name
            ),
        };

        self.database
            .append_billing_event(
                subscription_id,
                "PRORATION",
                &amount,
                &description,
                Some(period_start),
                Some(period_end),
            )
            .await?;

        let zero = BigDecimal::from(0);
        if amount > zero {
            self.database
                .add_subscription_invoiced(subscription_id, &amount)
                .await?;
        }

        self.database
            .set_subscription_plan(subscription_id, new_plan_id)
            .await?;

        info!(
            "Subscription {} plan change {} -> {}: {}",
            subscription_id, current_plan.name, new_plan.name, amount
        );
        Ok(amount)
    }

    /// Record an external payment against a subscription
    pub async fn record_payment(&self, subscription_id: i64, amount: &BigDecimal) -> Result<()> {
        if amount <= &BigDecimal::from(0) {
            return Err(anyhow!("Payments must be positive"));
        }
        self.database
            .add_subscription_paid(subscription_id, amount)
            .await?;
        info!("Recorded payment {} for subscription {}", amount, subscription_id);
        Ok(())
    }

    /// Cancel a subscription; inside the grace period the setup fee comes
    /// back as a refund event.
    pub async fn cancel_subscription(&self, subscription_id: i64) -> Result<()> {
        let subscription = self.database.get_subscription(subscription_id).await?;
        let plan = self.database.get_plan(subscription.plan_id).await?;

        self.database
            .update_subscription_state(subscription_id, SubscriptionState::Cancelled)
            .await?;

        let today = Utc::now().date_naive();
        let refund = setup_fee_refund(
            &plan.setup_fee,
            subscription.start_date,
            today,
            self.config.billing.setup_fee_grace_days,
        );
        if refund > BigDecimal::from(0) {
            self.database
                .append_billing_event(
                    subscription_id,
                    "SETUP_FEE_REFUND",
                    &(-&refund),
                    &format!(
                        "Setup fee refunded: cancelled within {} days",
                        self.config.billing.setup_fee_grace_days
                    ),
                    None,
                    None,
                )
                .await?;
        }

        info!(
            "Subscription {} cancelled (setup fee refund: {})",
            subscription_id, refund
        );
        Ok(())
    }

    /// Bill every ACTIVE auto-renew subscription that is due.
    ///
    /// Items fail independently; the batch always finishes and reports its
    /// tally.
    pub async fn run_recurring_billing(&self, today: NaiveDate) -> Result<BatchReport> {
        let due = self.database.list_subscriptions_due(today).await?;
        let mut report = BatchReport {
            processed: due.len(),
            ..Default::default()
        };

        for subscription in due {
            match self.bill_subscription(subscription.id, today).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Recurring billing failed for subscription {}: {}",
                        subscription.id, e
                    );
                }
            }
        }

        info!(
            "Recurring billing run: {} due, {} billed, {} failed",
            report.processed, report.succeeded, report.failed
        );
        Ok(report)
    }

    async fn bill_subscription(&self, subscription_id: i64, today: NaiveDate) -> Result<()> {
        let subscription = self.database.get_subscription(subscription_id).await?;
        let plan = self.database.get_plan(subscription.plan_id).await?;
        let due_date = subscription
            .next_billing_date
            .ok_or_else(|| anyhow!("Subscription {} has no billing date", subscription_id))?;

        let period_start = due_date;
        let period_end = next_billing_date(due_date, subscription.billing_cycle);

        self.database
            .append_billing_event(
                subscription_id,
                "RECURRING",
                &plan.monthly_price,
                &format!("Renewal on plan '{}'", plan.name),
                Some(period_start),
                Some(period_end),
            )
            .await?;
        self.database
            .add_subscription_invoiced(subscription_id, &plan.monthly_price)
            .await?;
        self.database
            .set_subscription_billing_dates(subscription_id, period_start, period_end)
            .await?;

        info!(
            "Billed subscription {} for period {} .. {} ({} due on {})",
            subscription_id, period_start, period_end, plan.monthly_price, today
        );
        Ok(())
    }

    /// Suspend ACTIVE subscriptions that stayed unpaid past the overdue
    /// window. Per-item failures do not stop the sweep.
    pub async fn run_overdue_checks(&self, today: NaiveDate) -> Result<BatchReport> {
        let candidates = self
            .database
            .list_subscriptions_overdue(today, self.config.billing.overdue_suspend_days)
            .await?;
        let mut report = BatchReport {
            processed: candidates.len(),
            ..Default::default()
        };

        for subscription in candidates {
            if subscription.total_paid >= subscription.total_invoiced {
                continue;
            }
            match self.suspend_overdue(subscription.id).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Overdue handling failed for subscription {}: {}",
                        subscription.id, e
                    );
                }
            }
        }

        info!(
            "Overdue sweep: {} candidates, {} suspended, {} failed",
            report.processed, report.succeeded, report.failed
        );
        Ok(report)
    }

    async fn suspend_overdue(&self, subscription_id: i64) -> Result<()> {
        let subscription = self
            .database
            .update_subscription_state(subscription_id, SubscriptionState::Suspended)
            .await?;
        let outstanding = &subscription.total_invoiced - &subscription.total_paid;

        self.database
            .append_billing_event(
                subscription_id,
                "OVERDUE",
                &BigDecimal::from(0),
                &format!("Suspended with {} outstanding", outstanding),
                None,
                None,
            )
            .await?;

        if let Err(e) = self
            .alert_service
            .send_immediate_alert(
                AlertType::Billing,
                AlertSeverity::Warning,
                &format!("subscription-{}", subscription_id),
                format!(
                    "Subscription {} suspended: {} outstanding past {} days",
                    subscription_id, outstanding, self.config.billing.overdue_suspend_days
                ),
                None,
            )
            .await
        {
            warn!("Failed to send overdue alert: {}", e);
        }
        Ok(())
    }
}
