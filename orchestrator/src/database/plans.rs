//! Plan catalog operations.
//!
//! Plans are never deleted: once a live subscription references one it can
//! only be deactivated.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::records::{NewPlan, Plan};
use super::Database;

fn row_to_plan(row: &SqliteRow) -> Result<Plan> {
    let monthly_price: String = row.try_get("monthly_price")?;
    let setup_fee: String = row.try_get("setup_fee")?;
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cpu_cores: row.try_get("cpu_cores")?,
        memory_mb: row.try_get("memory_mb")?,
        storage_gb: row.try_get("storage_gb")?,
        bandwidth_gb: row.try_get("bandwidth_gb")?,
        monthly_price: BigDecimal::from_str(&monthly_price)
            .map_err(|e| anyhow!("Bad monthly_price '{}': {}", monthly_price, e))?,
        setup_fee: BigDecimal::from_str(&setup_fee)
            .map_err(|e| anyhow!("Bad setup_fee '{}': {}", setup_fee, e))?,
        base_image: row.try_get("base_image")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    pub async fn create_plan(&self, plan: &NewPlan) -> Result<Plan> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO plans (
                name, cpu_cores, memory_mb, storage_gb, bandwidth_gb,
                monthly_price, setup_fee, base_image, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&plan.name)
        .bind(plan.cpu_cores)
        .bind(plan.memory_mb)
        .bind(plan.storage_gb)
        .bind(plan.bandwidth_gb)
        .bind(plan.monthly_price.to_string())
        .bind(plan.setup_fee.to_string())
        .bind(&plan.base_image)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        debug!("Created plan '{}'", plan.name);
        self.get_plan(result.last_insert_rowid()).await
    }

    pub async fn get_plan(&self, id: i64) -> Result<Plan> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("Plan {} not found", id))?;
        row_to_plan(&row)
    }

    pub async fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>> {
        let rows = if include_inactive {
            sqlx::query("SELECT * FROM plans ORDER BY id")
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query("SELECT * FROM plans WHERE is_active = 1 ORDER BY id")
                .fetch_all(self.pool())
                .await?
        };
        rows.iter().map(row_to_plan).collect()
    }

    pub async fn deactivate_plan(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE plans SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("Plan {} not found", id));
        }
        Ok(())
    }
}
