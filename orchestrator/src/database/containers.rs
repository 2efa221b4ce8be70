//! Container persistence.
//!
//! The 1:1 invariant (at most one non-terminated container per subscription)
//! is enforced at the insert site; state changes go through the transition
//! table.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::errors::InvariantError;
use crate::state::{ensure_container_transition, ContainerState};

use super::records::Container;
use super::Database;

fn row_to_container(row: &SqliteRow) -> Result<Container> {
    let state: String = row.try_get("state")?;
    Ok(Container {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        state: state.parse().map_err(|e: String| anyhow!(e))?,
        runtime_id: row.try_get("runtime_id")?,
        ip_address: row.try_get("ip_address")?,
        ssh_port: row.try_get("ssh_port")?,
        hostname: row.try_get("hostname")?,
        volume_path: row.try_get("volume_path")?,
        first_started_at: row.try_get("first_started_at")?,
        last_started_at: row.try_get("last_started_at")?,
        last_stopped_at: row.try_get("last_stopped_at")?,
        uptime_seconds: row.try_get("uptime_seconds")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    /// Insert a container in CREATING state for a subscription.
    ///
    /// Rejects the insert when the subscription already owns a live
    /// (non-terminated) container.
    pub async fn create_container(
        &self,
        subscription_id: i64,
        ip_address: &str,
        ssh_port: i64,
        hostname: &str,
        volume_path: &str,
    ) -> Result<Container> {
        if let Some(existing) = self.get_live_container(subscription_id).await? {
            return Err(InvariantError::ContainerExists {
                subscription_id: existing.subscription_id,
            }
            .into());
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO containers (
                subscription_id, state, ip_address, ssh_port, hostname,
                volume_path, created_at, updated_at
            ) VALUES (?, 'CREATING', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription_id)
        .bind(ip_address)
        .bind(ssh_port)
        .bind(hostname)
        .bind(volume_path)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        info!(
            "Created container {} for subscription {} ({} / {}:{})",
            id, subscription_id, hostname, ip_address, ssh_port
        );
        self.get_container(id).await
    }

    pub async fn get_container(&self, id: i64) -> Result<Container> {
        let row = sqlx::query("SELECT * FROM containers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("Container {} not found", id))?;
        row_to_container(&row)
    }

    /// The non-terminated container of a subscription, if any
    pub async fn get_live_container(&self, subscription_id: i64) -> Result<Option<Container>> {
        let row = sqlx::query(
            "SELECT * FROM containers WHERE subscription_id = ? AND state != 'TERMINATED' LIMIT 1",
        )
        .bind(subscription_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_container).transpose()
    }

    pub async fn list_containers_in_state(&self, state: ContainerState) -> Result<Vec<Container>> {
        let rows = sqlx::query("SELECT * FROM containers WHERE state = ? ORDER BY id")
            .bind(state.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_container).collect()
    }

    /// IP addresses and SSH ports held by non-terminated containers
    pub async fn list_allocated_addresses(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT ip_address, ssh_port FROM containers WHERE state != 'TERMINATED'",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("ip_address")?, row.try_get("ssh_port")?)))
            .collect()
    }

    /// Transition a container through the state table
    pub async fn update_container_state(
        &self,
        id: i64,
        to: ContainerState,
    ) -> Result<Container> {
        let current = self.get_container(id).await?;
        ensure_container_transition(current.state, to)?;

        sqlx::query("UPDATE containers SET state = ?, updated_at = ? WHERE id = ?")
            .bind(to.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;

        debug!("Container {} moved {} -> {}", id, current.state, to);
        self.get_container(id).await
    }

    pub async fn set_container_runtime_id(&self, id: i64, runtime_id: &str) -> Result<()> {
        sqlx::query("UPDATE containers SET runtime_id = ?, updated_at = ? WHERE id = ?")
            .bind(runtime_id)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Stamp start timestamps (first start recorded once)
    pub async fn record_container_started(&self, id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE containers
            SET first_started_at = COALESCE(first_started_at, ?),
                last_started_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stamp the stop timestamp and fold the run into cumulative uptime
    pub async fn record_container_stopped(&self, id: i64) -> Result<()> {
        let container = self.get_container(id).await?;
        let now = Utc::now();
        let run_seconds = container
            .last_started_at
            .map(|started| (now - started).num_seconds().max(0))
            .unwrap_or(0);

        sqlx::query(
            r#"
            UPDATE containers
            SET last_stopped_at = ?, uptime_seconds = uptime_seconds + ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(run_seconds)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
