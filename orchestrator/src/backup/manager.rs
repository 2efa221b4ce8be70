//! Backup and retention management for container data volumes.
//!
//! Archives are staged locally as
//! `{customer_id}/{container_id}/{YYYYMMDD_HHMMSS}-{type}.tar.gz` and
//! optionally uploaded through the object-storage trait. Retention keeps
//! the newest N archives per (container, type) bucket; manual and
//! pre-restore archives are never auto-pruned. A restore always takes a
//! pre-restore safety backup first, so a bad restore is itself recoverable.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::{Container, Database};
use crate::runtime::ContainerRuntime;
use crate::state::ContainerState;
use crate::storage::{ObjectMeta, ObjectStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupType {
    Daily,
    Weekly,
    Monthly,
    Manual,
    PreRestore,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Daily => "daily",
            BackupType::Weekly => "weekly",
            BackupType::Monthly => "monthly",
            BackupType::Manual => "manual",
            BackupType::PreRestore => "pre-restore",
        }
    }

    /// Buckets outside the scheduled cadence are kept until deleted by hand
    pub fn auto_pruned(&self) -> bool {
        matches!(
            self,
            BackupType::Daily | BackupType::Weekly | BackupType::Monthly
        )
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(BackupType::Daily),
            "weekly" => Ok(BackupType::Weekly),
            "monthly" => Ok(BackupType::Monthly),
            "manual" => Ok(BackupType::Manual),
            "pre-restore" => Ok(BackupType::PreRestore),
            other => Err(format!("Unknown backup type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub container_id: i64,
    pub subscription_id: i64,
    pub customer_id: i64,
    pub backup_type: BackupType,
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub deleted: usize,
    pub freed_bytes: u64,
}

pub struct BackupManager {
    database: Arc<Database>,
    runtime: Arc<dyn ContainerRuntime>,
    storage: Arc<dyn ObjectStorage>,
    config: Arc<Config>,
}

impl BackupManager {
    pub fn new(
        database: Arc<Database>,
        runtime: Arc<dyn ContainerRuntime>,
        storage: Arc<dyn ObjectStorage>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            database,
            runtime,
            storage,
            config,
        }
    }

    fn staging_root(&self) -> PathBuf {
        PathBuf::from(&self.config.backup.staging_dir)
    }

    fn container_dir(&self, customer_id: i64, container_id: i64) -> PathBuf {
        self.staging_root()
            .join(customer_id.to_string())
            .join(container_id.to_string())
    }

    async fn container_with_customer(&self, container_id: i64) -> Result<(Container, i64)> {
        let container = self.database.get_container(container_id).await?;
        let subscription = self
            .database
            .get_subscription(container.subscription_id)
            .await?;
        Ok((container, subscription.customer_id))
    }

    /// Archive a container's data volume into the staging directory and
    /// optionally upload it to object storage.
    pub async fn backup_container(
        &self,
        container_id: i64,
        backup_type: BackupType,
    ) -> Result<BackupInfo> {
        let (container, customer_id) = self.container_with_customer(container_id).await?;
        let created_at = Utc::now();
        let filename = format!(
            "{}-{}.tar.gz",
            created_at.format("%Y%m%d_%H%M%S"),
            backup_type.as_str()
        );

        let dir = self.container_dir(customer_id, container_id);
        tokio::fs::create_dir_all(&dir).await?;
        let archive_path = dir.join(&filename);

        info!(
            "Creating {} backup of container {} ({})",
            backup_type.as_str(),
            container.hostname,
            container.volume_path
        );

        let volume_path = PathBuf::from(&container.volume_path);
        if !tokio::fs::try_exists(&volume_path).await.unwrap_or(false) {
            return Err(anyhow!(
                "Volume path {} does not exist",
                container.volume_path
            ));
        }

        let archive_path_clone = archive_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::create(&archive_path_clone)?;
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(".", &volume_path)?;
            builder.into_inner()?.finish()?;
            Ok(())
        })
        .await??;

        let size_bytes = tokio::fs::metadata(&archive_path).await?.len();
        if size_bytes == 0 {
            return Err(anyhow!("Backup archive came out empty"));
        }

        if self.config.backup.upload_enabled {
            let key = format!("{}/{}/{}", customer_id, container_id, filename);
            let data = tokio::fs::read(&archive_path).await?;
            let meta = ObjectMeta {
                encrypt: self.config.backup.encrypt_uploads,
                tags: HashMap::from([
                    ("customer_id".to_string(), customer_id.to_string()),
                    ("container_id".to_string(), container_id.to_string()),
                    (
                        "subscription_id".to_string(),
                        container.subscription_id.to_string(),
                    ),
                    ("backup_type".to_string(), backup_type.as_str().to_string()),
                    ("created_at".to_string(), created_at.to_rfc3339()),
                ]),
            };
            self.storage.put(&key, &data, &meta).await?;
            info!("Uploaded backup {} to object storage", key);
        }

        info!(
            "Backup of {} complete: {} ({} bytes)",
            container.hostname, filename, size_bytes
        );

        Ok(BackupInfo {
            container_id,
            subscription_id: container.subscription_id,
            customer_id,
            backup_type,
            filename,
            path: archive_path.to_string_lossy().to_string(),
            size_bytes,
            created_at,
        })
    }

    /// Staged backups of one container, newest first
    pub async fn list_backups(&self, container_id: i64) -> Result<Vec<BackupInfo>> {
        let (container, customer_id) = self.container_with_customer(container_id).await?;
        let dir = self.container_dir(customer_id, container_id);
        let mut backups = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(backups),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((created_at, backup_type)) = parse_backup_filename(filename) else {
                continue;
            };
            let size_bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                container_id,
                subscription_id: container.subscription_id,
                customer_id,
                backup_type,
                filename: filename.to_string(),
                path: path.to_string_lossy().to_string(),
                size_bytes,
                created_at,
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Enforce the retention policy across every staged backup.
    ///
    /// Backups are grouped by (container, type) and the newest N per bucket
    /// survive; the rest are deleted and the freed space reported.
    pub async fn cleanup_old_backups(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let root = self.staging_root();

        let mut customer_dirs = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(report),
        };

        while let Some(customer_entry) = customer_dirs.next_entry().await? {
            if !customer_entry.path().is_dir() {
                continue;
            }
            let mut container_dirs = tokio::fs::read_dir(customer_entry.path()).await?;
            while let Some(container_entry) = container_dirs.next_entry().await? {
                if !container_entry.path().is_dir() {
                    continue;
                }
                let removed = self
                    .cleanup_container_dir(&container_entry.path(), &mut report)
                    .await?;
                if removed > 0 {
                    info!(
                        "Retention removed {} backups under {}",
                        removed,
                        container_entry.path().display()
                    );
                }
            }
        }

        info!(
            "Backup retention pass: {} examined, {} deleted, {} bytes freed",
            report.examined, report.deleted, report.freed_bytes
        );
        Ok(report)
    }

    async fn cleanup_container_dir(
        &self,
        dir: &Path,
        report: &mut CleanupReport,
    ) -> Result<usize> {
        let mut by_type: HashMap<BackupType, Vec<(DateTime<Utc>, PathBuf, u64)>> = HashMap::new();

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((created_at, backup_type)) = parse_backup_filename(filename) else {
                continue;
            };
            report.examined += 1;
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            by_type
                .entry(backup_type)
                .or_default()
                .push((created_at, path, size));
        }

        let mut removed = 0usize;
        for (backup_type, mut files) in by_type {
            if !backup_type.auto_pruned() {
                continue;
            }
            let keep = match backup_type {
                BackupType::Daily => self.config.backup.daily_keep,
                BackupType::Weekly => self.config.backup.weekly_keep,
                BackupType::Monthly => self.config.backup.monthly_keep,
                _ => continue,
            };

            // Newest first; everything past the keep-count goes
            files.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, path, size) in files.into_iter().skip(keep) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        removed += 1;
                        report.deleted += 1;
                        report.freed_bytes += size;
                    }
                    Err(e) => {
                        warn!("Failed to delete old backup {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(removed)
    }

    /// Restore a container's volume from a staged backup.
    ///
    /// Stops the container, takes a pre-restore safety backup of the current
    /// state, swaps the volume contents, then restarts.
    pub async fn restore_container(&self, container_id: i64, filename: &str) -> Result<()> {
        let (container, customer_id) = self.container_with_customer(container_id).await?;
        let archive_path = self.container_dir(customer_id, container_id).join(filename);
        if parse_backup_filename(filename).is_none() {
            return Err(anyhow!("'{}' is not a backup archive name", filename));
        }
        if !tokio::fs::try_exists(&archive_path).await.unwrap_or(false) {
            return Err(anyhow!("Backup {} not found", filename));
        }

        info!(
            "Restoring container {} from {}",
            container.hostname, filename
        );

        // Step 1: stop the container if it is running
        let was_running = container.state == ContainerState::Running;
        if was_running {
            let runtime_id = container
                .runtime_id
                .as_deref()
                .ok_or_else(|| anyhow!("Container {} has no runtime id", container_id))?;
            self.runtime.stop(runtime_id).await?;
            self.database.record_container_stopped(container_id).await?;
            self.database
                .update_container_state(container_id, ContainerState::Stopped)
                .await?;
        }

        // Step 2: safety backup of the current state, so the restore itself
        // is recoverable
        self.backup_container(container_id, BackupType::PreRestore)
            .await?;

        // Step 3: clear and repopulate the volume
        let volume_path = PathBuf::from(&container.volume_path);
        if tokio::fs::try_exists(&volume_path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&volume_path).await?;
        }
        tokio::fs::create_dir_all(&volume_path).await?;

        let archive_path_clone = archive_path.clone();
        let volume_clone = volume_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::open(&archive_path_clone)?;
            let decoder = flate2::read::GzDecoder::new(file);
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(&volume_clone)?;
            Ok(())
        })
        .await??;

        // Step 4: bring the container back
        if let Some(runtime_id) = container.runtime_id.as_deref() {
            self.runtime.start(runtime_id).await?;
            self.database.record_container_started(container_id).await?;
            self.database
                .update_container_state(container_id, ContainerState::Running)
                .await?;
        }

        info!(
            "Restore of container {} from {} complete",
            container.hostname, filename
        );
        Ok(())
    }
}

/// Parse `{YYYYMMDD_HHMMSS}-{type}.tar.gz`
pub fn parse_backup_filename(filename: &str) -> Option<(DateTime<Utc>, BackupType)> {
    let stem = filename.strip_suffix(".tar.gz")?;
    if stem.len() < 17 {
        return None;
    }
    let (timestamp_part, rest) = stem.split_at(15);
    let type_part = rest.strip_prefix('-')?;

    let naive = NaiveDateTime::parse_from_str(timestamp_part, "%Y%m%d_%H%M%S").ok()?;
    let backup_type = type_part.parse().ok()?;
    Some((DateTime::from_naive_utc_and_offset(naive, Utc), backup_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backup_filename() {
        let (ts, backup_type) = parse_backup_filename("20250806_120000-daily.tar.gz").unwrap();
        assert_eq!(backup_type, BackupType::Daily);
        assert_eq!(ts.format("%Y%m%d_%H%M%S").to_string(), "20250806_120000");

        let (_, backup_type) = parse_backup_filename("20250806_120000-pre-restore.tar.gz").unwrap();
        assert_eq!(backup_type, BackupType::PreRestore);

        assert!(parse_backup_filename("garbage.tar.gz").is_none());
        assert!(parse_backup_filename("20250806_120000-daily.txt").is_none());
        assert!(parse_backup_filename("20250806_120000-unknown.tar.gz").is_none());
    }
}
