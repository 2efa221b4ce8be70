//! Subscription persistence.
//!
//! State changes go through [`Database::update_subscription_state`], which
//! checks the transition table before writing. Running totals are guarded:
//! they may only grow.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::errors::InvariantError;
use crate::state::{ensure_subscription_transition, SubscriptionState};

use super::records::{NewSubscription, Subscription};
use super::Database;

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription> {
    let state: String = row.try_get("state")?;
    let cycle: String = row.try_get("billing_cycle")?;
    let total_invoiced: String = row.try_get("total_invoiced")?;
    let total_paid: String = row.try_get("total_paid")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        plan_id: row.try_get("plan_id")?,
        state: state.parse().map_err(|e: String| anyhow!(e))?,
        billing_cycle: cycle.parse().map_err(|e: String| anyhow!(e))?,
        start_date: row.try_get("start_date")?,
        current_period_start: row.try_get("current_period_start")?,
        next_billing_date: row.try_get("next_billing_date")?,
        is_trial: row.try_get("is_trial")?,
        auto_renew: row.try_get("auto_renew")?,
        total_invoiced: BigDecimal::from_str(&total_invoiced)
            .map_err(|e| anyhow!("Bad total_invoiced: {}", e))?,
        total_paid: BigDecimal::from_str(&total_paid)
            .map_err(|e| anyhow!("Bad total_paid: {}", e))?,
        custom_image_id: row.try_get("custom_image_id")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    pub async fn create_subscription(&self, new: &NewSubscription) -> Result<Subscription> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                customer_id, plan_id, state, billing_cycle, start_date,
                is_trial, auto_renew, custom_image_id, created_at, updated_at
            ) VALUES (?, ?, 'PENDING', ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.customer_id)
        .bind(new.plan_id)
        .bind(new.billing_cycle.as_str())
        .bind(new.start_date)
        .bind(new.is_trial)
        .bind(new.auto_renew)
        .bind(new.custom_image_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        info!(
            "Created subscription {} for customer {} on plan {}",
            id, new.customer_id, new.plan_id
        );
        self.get_subscription(id).await
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Subscription> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("Subscription {} not found", id))?;
        row_to_subscription(&row)
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query("SELECT * FROM subscriptions ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_subscription).collect()
    }

    /// ACTIVE auto-renew subscriptions whose billing date has arrived
    pub async fn list_subscriptions_due(&self, today: NaiveDate) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE state = 'ACTIVE' AND auto_renew = 1
              AND next_billing_date IS NOT NULL AND next_billing_date <= ?
            ORDER BY id
            "#,
        )
        .bind(today)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_subscription).collect()
    }

    /// ACTIVE subscriptions whose billing date passed more than the overdue
    /// window ago
    pub async fn list_subscriptions_overdue(
        &self,
        today: NaiveDate,
        overdue_days: i64,
    ) -> Result<Vec<Subscription>> {
        let cutoff = today - chrono::Duration::days(overdue_days);
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE state = 'ACTIVE'
              AND next_billing_date IS NOT NULL AND next_billing_date <= ?
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_subscription).collect()
    }

    /// Transition a subscription through the state table
    pub async fn update_subscription_state(
        &self,
        id: i64,
        to: SubscriptionState,
    ) -> Result<Subscription> {
        let current = self.get_subscription(id).await?;
        ensure_subscription_transition(current.state, to)?;

        let now = Utc::now();
        let cancelled_at = if to == SubscriptionState::Cancelled {
            Some(now)
        } else {
            current.cancelled_at
        };

        sqlx::query(
            "UPDATE subscriptions SET state = ?, cancelled_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(to.as_str())
        .bind(cancelled_at)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        debug!("Subscription {} moved {} -> {}", id, current.state, to);
        self.get_subscription(id).await
    }

    pub async fn set_subscription_billing_dates(
        &self,
        id: i64,
        period_start: NaiveDate,
        next_billing_date: NaiveDate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET current_period_start = ?, next_billing_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(period_start)
        .bind(next_billing_date)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_subscription_plan(&self, id: i64, plan_id: i64) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET plan_id = ?, updated_at = ? WHERE id = ?")
            .bind(plan_id)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Add to total_invoiced; negative deltas are an invariant violation
    pub async fn add_subscription_invoiced(&self, id: i64, delta: &BigDecimal) -> Result<()> {
        if delta < &BigDecimal::from(0) {
            return Err(InvariantError::MonotonicTotal {
                field: "total_invoiced",
            }
            .into());
        }
        let sub = self.get_subscription(id).await?;
        let new_total = &sub.total_invoiced + delta;
        sqlx::query("UPDATE subscriptions SET total_invoiced = ?, updated_at = ? WHERE id = ?")
            .bind(new_total.to_string())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Add to total_paid; negative deltas are an invariant violation
    pub async fn add_subscription_paid(&self, id: i64, delta: &BigDecimal) -> Result<()> {
        if delta < &BigDecimal::from(0) {
            return Err(InvariantError::MonotonicTotal {
                field: "total_paid",
            }
            .into());
        }
        let sub = self.get_subscription(id).await?;
        let new_total = &sub.total_paid + delta;
        sqlx::query("UPDATE subscriptions SET total_paid = ?, updated_at = ? WHERE id = ?")
            .bind(new_total.to_string())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
