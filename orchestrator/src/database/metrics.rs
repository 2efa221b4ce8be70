//! Container metric samples: append-only, pruned by the retention job.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use super::records::ContainerMetricRecord;
use super::Database;

impl Database {
    pub async fn insert_metric(&self, metric: &ContainerMetricRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO container_metrics (
                container_id, recorded_at, cpu_percent, memory_mb, storage_mb,
                net_rx_bytes, net_tx_bytes, block_read_bytes, block_write_bytes,
                process_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric.container_id)
        .bind(metric.recorded_at)
        .bind(metric.cpu_percent)
        .bind(metric.memory_mb)
        .bind(metric.storage_mb)
        .bind(metric.net_rx_bytes)
        .bind(metric.net_tx_bytes)
        .bind(metric.block_read_bytes)
        .bind(metric.block_write_bytes)
        .bind(metric.process_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_metrics_since(
        &self,
        container_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT container_id, recorded_at, cpu_percent, memory_mb, storage_mb,
                   net_rx_bytes, net_tx_bytes, block_read_bytes, block_write_bytes,
                   process_count
            FROM container_metrics
            WHERE container_id = ? AND recorded_at >= ?
            ORDER BY recorded_at
            "#,
        )
        .bind(container_id)
        .bind(since)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ContainerMetricRecord {
                    container_id: row.try_get("container_id")?,
                    recorded_at: row.try_get("recorded_at")?,
                    cpu_percent: row.try_get("cpu_percent")?,
                    memory_mb: row.try_get("memory_mb")?,
                    storage_mb: row.try_get("storage_mb")?,
                    net_rx_bytes: row.try_get("net_rx_bytes")?,
                    net_tx_bytes: row.try_get("net_tx_bytes")?,
                    block_read_bytes: row.try_get("block_read_bytes")?,
                    block_write_bytes: row.try_get("block_write_bytes")?,
                    process_count: row.try_get("process_count")?,
                })
            })
            .collect()
    }

    /// Delete samples older than the cutoff; returns the number removed
    pub async fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM container_metrics WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            debug!("Pruned {} metric samples older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}
