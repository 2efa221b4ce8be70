//! DNS sync service: renders zone files and config snippets into the shared
//! config directory, then asks the DNS server process to reload.
//!
//! The DNS server is one shared process, so write+reload runs under an
//! exclusive lock, so only one reload is ever in flight. Every push is
//! audited as a `dns_sync_logs` row (`PENDING` before the call,
//! `SUCCESS`/`FAILED` after).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DnsConfig;
use crate::database::{Database, DnsZone};
use crate::errors::ExternalError;

use super::zone::{generate_zone_file, render_zone_config_snippet};

#[async_trait]
pub trait DnsControlPlane: Send + Sync {
    /// Ask the DNS server to reload its zones
    async fn reload(&self) -> Result<()>;

    /// Probe the DNS server's health endpoint
    async fn health(&self) -> Result<bool>;
}

pub struct HttpDnsControl {
    client: Client,
    reload_url: String,
    health_url: String,
}

impl HttpDnsControl {
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.reload_timeout_seconds))
            .build()
            .map_err(|e| anyhow!("Failed to build DNS control client: {}", e))?;
        Ok(Self {
            client,
            reload_url: config.reload_url.clone(),
            health_url: config.health_url.clone(),
        })
    }
}

#[async_trait]
impl DnsControlPlane for HttpDnsControl {
    async fn reload(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.reload_url)
            .send()
            .await
            .map_err(|e| ExternalError::DnsControl {
                reason: format!("reload request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::DnsControl {
                reason: format!("reload returned {}: {}", status, body),
            }
            .into());
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| ExternalError::DnsControl {
                reason: format!("health request failed: {}", e),
            })?;
        Ok(response.status().is_success())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub zones_written: usize,
    pub zones_removed: usize,
    pub reload_ok: bool,
}

pub struct DnsSyncService {
    database: Arc<Database>,
    control: Arc<dyn DnsControlPlane>,
    zone_dir: PathBuf,
    config_dir: PathBuf,
    /// Serializes every write+reload against the shared DNS server
    sync_lock: Mutex<()>,
}

impl DnsSyncService {
    pub fn new(
        database: Arc<Database>,
        control: Arc<dyn DnsControlPlane>,
        config: &DnsConfig,
    ) -> Self {
        Self {
            database,
            control,
            zone_dir: PathBuf::from(&config.zone_dir),
            config_dir: PathBuf::from(&config.config_dir),
            sync_lock: Mutex::new(()),
        }
    }

    fn zone_file_path(&self, zone_name: &str) -> PathBuf {
        self.zone_dir.join(format!("{}.zone", zone_name))
    }

    fn config_file_path(&self, zone_name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.conf", zone_name))
    }

    /// Write or tombstone one zone's files. Active zones get a fresh serial
    /// first, so downstream resolvers pick the change up.
    async fn write_zone_files(&self, zone: &DnsZone) -> Result<bool> {
        if zone.is_active() {
            let serial = super::zone::increment_soa_serial(
                zone.last_updated_serial,
                Utc::now().date_naive(),
            );
            self.database.set_zone_serial(zone.id, serial).await?;
            let zone = self.database.get_zone(zone.id).await?;

            let records = self.database.list_zone_records(zone.id).await?;
            let rendered = generate_zone_file(&zone, &records);

            tokio::fs::create_dir_all(&self.zone_dir).await?;
            tokio::fs::create_dir_all(&self.config_dir).await?;
            tokio::fs::write(self.zone_file_path(&zone.zone_name), rendered).await?;
            tokio::fs::write(
                self.config_file_path(&zone.zone_name),
                render_zone_config_snippet(&zone.zone_name, &self.zone_dir.to_string_lossy()),
            )
            .await?;
            debug!("Wrote zone files for {}", zone.zone_name);
            Ok(true)
        } else {
            // Tombstone: a disabled or deleted zone must disappear from the
            // server, not linger with stale data
            let _ = tokio::fs::remove_file(self.zone_file_path(&zone.zone_name)).await;
            let _ = tokio::fs::remove_file(self.config_file_path(&zone.zone_name)).await;
            debug!("Removed zone files for {} ({})", zone.zone_name, zone.status);
            Ok(false)
        }
    }

    /// Push one zone to the DNS server and reload it
    pub async fn sync_zone(&self, zone_id: i64) -> Result<()> {
        let _guard = self.sync_lock.lock().await;

        let zone = self.database.get_zone(zone_id).await?;
        let log_id = self.database.create_sync_log(zone_id).await?;

        let result: Result<()> = async {
            self.write_zone_files(&zone).await?;
            self.control.reload().await
        }
        .await;

        match &result {
            Ok(()) => {
                self.database.finalize_sync_log(log_id, true, None).await?;
                info!("Synced zone {} to DNS server", zone.zone_name);
            }
            Err(e) => {
                let message = e.to_string();
                self.database
                    .finalize_sync_log(log_id, false, Some(&message))
                    .await?;
                warn!("Zone sync failed for {}: {}", zone.zone_name, e);
            }
        }

        result
    }

    /// Rewrite every zone's files and reload once.
    ///
    /// This is a single global operation: the lock covers all file writes
    /// and the one reload call.
    pub async fn regenerate_all_zones(&self) -> Result<SyncSummary> {
        let _guard = self.sync_lock.lock().await;

        let zones = self.database.list_zones(true).await?;
        let mut log_ids = Vec::with_capacity(zones.len());
        let mut written = 0usize;
        let mut removed = 0usize;
        let mut write_errors: Vec<String> = Vec::new();

        for zone in &zones {
            let log_id = self.database.create_sync_log(zone.id).await?;
            match self.write_zone_files(zone).await {
                Ok(true) => {
                    written += 1;
                    log_ids.push((log_id, None));
                }
                Ok(false) => {
                    removed += 1;
                    log_ids.push((log_id, None));
                }
                Err(e) => {
                    let msg = format!("{}: {}", zone.zone_name, e);
                    write_errors.push(msg.clone());
                    log_ids.push((log_id, Some(msg)));
                }
            }
        }

        let reload_result = self.control.reload().await;
        let reload_ok = reload_result.is_ok();
        let reload_error = reload_result.as_ref().err().map(|e| e.to_string());

        for (log_id, write_error) in log_ids {
            match (&write_error, reload_ok) {
                (Some(err), _) => {
                    self.database
                        .finalize_sync_log(log_id, false, Some(err))
                        .await?;
                }
                (None, true) => {
                    self.database.finalize_sync_log(log_id, true, None).await?;
                }
                (None, false) => {
                    self.database
                        .finalize_sync_log(log_id, false, reload_error.as_deref())
                        .await?;
                }
            }
        }

        if let Err(e) = reload_result {
            return Err(anyhow!("DNS reload after regeneration failed: {}", e));
        }
        if !write_errors.is_empty() {
            return Err(anyhow!(
                "Zone regeneration finished with {} write failures: {}",
                write_errors.len(),
                write_errors.join("; ")
            ));
        }

        info!(
            "Regenerated all zones: {} written, {} tombstoned",
            written, removed
        );
        Ok(SyncSummary {
            zones_written: written,
            zones_removed: removed,
            reload_ok,
        })
    }
}
