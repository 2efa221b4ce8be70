//! DNS zone, record, and sync-log persistence.
//!
//! Record inserts enforce the (zone, name, type) uniqueness rule for
//! non-system records. Zone deletion is a soft `DELETED` marker; the sync
//! service turns that into a file tombstone.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::errors::InvariantError;

use super::records::{DnsRecord, DnsSyncLog, DnsZone, NewDnsRecord};
use super::Database;

fn row_to_zone(row: &SqliteRow) -> Result<DnsZone> {
    Ok(DnsZone {
        id: row.try_get("id")?,
        zone_name: row.try_get("zone_name")?,
        subscription_id: row.try_get("subscription_id")?,
        soa_mname: row.try_get("soa_mname")?,
        soa_rname: row.try_get("soa_rname")?,
        refresh: row.try_get("refresh")?,
        retry: row.try_get("retry")?,
        expire: row.try_get("expire")?,
        minimum: row.try_get("minimum")?,
        nameservers: row.try_get("nameservers")?,
        default_ttl: row.try_get("default_ttl")?,
        last_updated_serial: row.try_get("last_updated_serial")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_record(row: &SqliteRow) -> Result<DnsRecord> {
    Ok(DnsRecord {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        name: row.try_get("name")?,
        record_type: row.try_get("record_type")?,
        value: row.try_get("value")?,
        ttl: row.try_get("ttl")?,
        priority: row.try_get("priority")?,
        weight: row.try_get("weight")?,
        port: row.try_get("port")?,
        is_system: row.try_get("is_system")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_zone(
        &self,
        zone_name: &str,
        subscription_id: Option<i64>,
        soa_mname: &str,
        soa_rname: &str,
        refresh: i64,
        retry: i64,
        expire: i64,
        minimum: i64,
        nameservers: &[String],
        default_ttl: i64,
    ) -> Result<DnsZone> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO dns_zones (
                zone_name, subscription_id, soa_mname, soa_rname,
                refresh, retry, expire, minimum, nameservers, default_ttl,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?, ?)
            "#,
        )
        .bind(zone_name)
        .bind(subscription_id)
        .bind(soa_mname)
        .bind(soa_rname)
        .bind(refresh)
        .bind(retry)
        .bind(expire)
        .bind(minimum)
        .bind(serde_json::to_string(nameservers)?)
        .bind(default_ttl)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        info!("Created DNS zone '{}'", zone_name);
        self.get_zone(result.last_insert_rowid()).await
    }

    pub async fn get_zone(&self, id: i64) -> Result<DnsZone> {
        let row = sqlx::query("SELECT * FROM dns_zones WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("DNS zone {} not found", id))?;
        row_to_zone(&row)
    }

    pub async fn get_zone_by_name(&self, zone_name: &str) -> Result<Option<DnsZone>> {
        let row = sqlx::query("SELECT * FROM dns_zones WHERE zone_name = ?")
            .bind(zone_name)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_zone).transpose()
    }

    pub async fn list_zones(&self, include_deleted: bool) -> Result<Vec<DnsZone>> {
        let rows = if include_deleted {
            sqlx::query("SELECT * FROM dns_zones ORDER BY zone_name")
                .fetch_all(self.pool())
                .await?
        } else {
            sqlx::query("SELECT * FROM dns_zones WHERE status != 'DELETED' ORDER BY zone_name")
                .fetch_all(self.pool())
                .await?
        };
        rows.iter().map(row_to_zone).collect()
    }

    pub async fn set_zone_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE dns_zones SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        debug!("DNS zone {} status set to {}", id, status);
        Ok(())
    }

    pub async fn set_zone_serial(&self, id: i64, serial: i64) -> Result<()> {
        sqlx::query("UPDATE dns_zones SET last_updated_serial = ?, updated_at = ? WHERE id = ?")
            .bind(serial)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Insert a record, enforcing (zone, name, type) uniqueness for
    /// non-system records
    pub async fn create_dns_record(&self, record: &NewDnsRecord) -> Result<DnsRecord> {
        let zone = self.get_zone(record.zone_id).await?;

        if !record.is_system {
            let existing = sqlx::query(
                r#"
                SELECT COUNT(*) as cnt FROM dns_records
                WHERE zone_id = ? AND name = ? AND record_type = ? AND is_system = 0
                "#,
            )
            .bind(record.zone_id)
            .bind(&record.name)
            .bind(&record.record_type)
            .fetch_one(self.pool())
            .await?;
            let count: i64 = existing.try_get("cnt")?;
            if count > 0 {
                return Err(InvariantError::DuplicateDnsRecord {
                    zone: zone.zone_name,
                    name: record.name.clone(),
                    record_type: record.record_type.clone(),
                }
                .into());
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO dns_records (
                zone_id, name, record_type, value, ttl, priority, weight, port,
                is_system, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.zone_id)
        .bind(&record.name)
        .bind(&record.record_type)
        .bind(&record.value)
        .bind(record.ttl)
        .bind(record.priority)
        .bind(record.weight)
        .bind(record.port)
        .bind(record.is_system)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            "Created DNS record {} {} {} in zone {}",
            record.record_type, record.name, record.value, zone.zone_name
        );
        self.get_dns_record(id).await
    }

    pub async fn get_dns_record(&self, id: i64) -> Result<DnsRecord> {
        let row = sqlx::query("SELECT * FROM dns_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("DNS record {} not found", id))?;
        row_to_record(&row)
    }

    pub async fn list_zone_records(&self, zone_id: i64) -> Result<Vec<DnsRecord>> {
        let rows = sqlx::query("SELECT * FROM dns_records WHERE zone_id = ? ORDER BY name, id")
            .bind(zone_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn delete_dns_record(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM dns_records WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("DNS record {} not found", id));
        }
        Ok(())
    }

    /// Remove a system-managed record (used at container de-provisioning)
    pub async fn delete_system_record(
        &self,
        zone_id: i64,
        name: &str,
        record_type: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM dns_records WHERE zone_id = ? AND name = ? AND record_type = ? AND is_system = 1",
        )
        .bind(zone_id)
        .bind(name)
        .bind(record_type)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Sync audit rows
    // ------------------------------------------------------------------

    pub async fn create_sync_log(&self, zone_id: i64) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO dns_sync_logs (zone_id, status, started_at) VALUES (?, 'PENDING', ?)",
        )
        .bind(zone_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn finalize_sync_log(
        &self,
        log_id: i64,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE dns_sync_logs SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(if success { "SUCCESS" } else { "FAILED" })
        .bind(error_message)
        .bind(Utc::now())
        .bind(log_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_sync_logs(&self, zone_id: i64, limit: i32) -> Result<Vec<DnsSyncLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, zone_id, status, error_message, started_at, completed_at
            FROM dns_sync_logs
            WHERE zone_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(zone_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DnsSyncLog {
                    id: row.try_get("id")?,
                    zone_id: row.try_get("zone_id")?,
                    status: row.try_get("status")?,
                    error_message: row.try_get("error_message")?,
                    started_at: row.try_get("started_at")?,
                    completed_at: row.try_get("completed_at")?,
                })
            })
            .collect()
    }
}
