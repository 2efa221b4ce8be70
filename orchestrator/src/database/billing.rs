//! Billing events: the append-only stream the external invoicing subsystem
//! consumes. This core computes amounts; it never renders invoice documents.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::records::BillingEvent;
use super::Database;

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub async fn append_billing_event(
        &self,
        subscription_id: i64,
        event_type: &str,
        amount: &BigDecimal,
        description: &str,
        period_start: Option<NaiveDate>,
        period_end: Option<NaiveDate>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_events (
                subscription_id, event_type, amount, description,
                period_start, period_end, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription_id)
        .bind(event_type)
        .bind(amount.to_string())
        .bind(description)
        .bind(period_start)
        .bind(period_end)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        debug!(
            "Billing event {} {} for subscription {}",
            event_type, amount, subscription_id
        );
        Ok(result.last_insert_rowid())
    }

    pub async fn list_billing_events(&self, subscription_id: i64) -> Result<Vec<BillingEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscription_id, event_type, amount, description,
                   period_start, period_end, created_at
            FROM billing_events
            WHERE subscription_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let amount: String = row.try_get("amount")?;
                Ok(BillingEvent {
                    id: row.try_get("id")?,
                    subscription_id: row.try_get("subscription_id")?,
                    event_type: row.try_get("event_type")?,
                    amount: BigDecimal::from_str(&amount)
                        .map_err(|e| anyhow!("Bad billing amount: {}", e))?,
                    description: row.try_get("description")?,
                    period_start: row.try_get("period_start")?,
                    period_end: row.try_get("period_end")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
