//! Metric sampling and pruning for running containers.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::{ContainerMetricRecord, Database};
use crate::runtime::ContainerRuntime;
use crate::services::billing_service::BatchReport;
use crate::state::ContainerState;

pub struct MetricsService {
    database: Arc<Database>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl MetricsService {
    pub fn new(database: Arc<Database>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { database, runtime }
    }

    /// Sample every running container once; per-container failures are
    /// tolerated so one broken container never starves the rest of the
    /// fleet of samples.
    pub async fn sample_all(&self) -> Result<BatchReport> {
        let running = self
            .database
            .list_containers_in_state(ContainerState::Running)
            .await?;
        let mut report = BatchReport {
            processed: running.len(),
            ..Default::default()
        };

        for container in running {
            let Some(runtime_id) = container.runtime_id.as_deref() else {
                continue;
            };
            match self.runtime.stats(runtime_id).await {
                Ok(stats) => {
                    let record = ContainerMetricRecord {
                        container_id: container.id,
                        recorded_at: Utc::now(),
                        cpu_percent: stats.cpu_percent,
                        memory_mb: stats.memory_bytes as f64 / 1024.0 / 1024.0,
                        storage_mb: volume_size_mb(&container.volume_path).await,
                        net_rx_bytes: stats.net_rx_bytes as i64,
                        net_tx_bytes: stats.net_tx_bytes as i64,
                        block_read_bytes: stats.block_read_bytes as i64,
                        block_write_bytes: stats.block_write_bytes as i64,
                        process_count: stats.process_count as i64,
                    };
                    match self.database.insert_metric(&record).await {
                        Ok(()) => report.succeeded += 1,
                        Err(e) => {
                            report.failed += 1;
                            warn!("Failed to store metrics for {}: {}", container.hostname, e);
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Stats call failed for {}: {}", container.hostname, e);
                }
            }
        }

        Ok(report)
    }

    /// Drop samples older than the retention horizon
    pub async fn prune(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let removed = self.database.prune_metrics_before(cutoff).await?;
        if removed > 0 {
            info!(
                "Metric pruning removed {} samples older than {} days",
                removed, retention_days
            );
        }
        Ok(removed)
    }
}

/// Approximate volume usage by walking the directory
async fn volume_size_mb(volume_path: &str) -> f64 {
    let mut total = 0u64;
    let mut stack = vec![std::path::PathBuf::from(volume_path)];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
    }
    total as f64 / 1024.0 / 1024.0
}
