//! Custom image build pipeline.
//!
//! Uploads land in object storage and a PENDING record; the worker then
//! walks each record through VALIDATING -> BUILDING -> SCANNING ->
//! COMPLETED, appending engine output to the build log as it goes. Any
//! step failure parks the record in FAILED with `build_error` set. Records
//! are never rebuilt in place: a rebuild is a new row chained through
//! `previous_version_id`.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{CustomImage, Database};
use crate::errors::ValidationError;
use crate::runtime::ContainerRuntime;
use crate::services::alert_service::{AlertService, AlertSeverity, AlertType};
use crate::state::ImageState;
use crate::storage::{ObjectMeta, ObjectStorage};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct ImagePipeline {
    database: Arc<Database>,
    storage: Arc<dyn ObjectStorage>,
    runtime: Arc<dyn ContainerRuntime>,
    alert_service: Arc<AlertService>,
    config: Arc<Config>,
}

impl ImagePipeline {
    pub fn new(
        database: Arc<Database>,
        storage: Arc<dyn ObjectStorage>,
        runtime: Arc<dyn ContainerRuntime>,
        alert_service: Arc<AlertService>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            database,
            storage,
            runtime,
            alert_service,
            config,
        }
    }

    /// Accept an uploaded build archive and queue it for processing.
    ///
    /// The storage key embeds a fresh UUID, so concurrent uploads of the
    /// same image name never collide.
    pub async fn upload(
        &self,
        customer_id: i64,
        name: &str,
        data: Vec<u8>,
        build_args: &HashMap<String, String>,
        requires_approval: bool,
    ) -> Result<CustomImage> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                reason: "image names are alphanumeric with '-' and '_'".to_string(),
            }
            .into());
        }
        if data.is_empty() {
            return Err(ValidationError::InvalidArchive {
                reason: "archive is empty".to_string(),
            }
            .into());
        }
        if data.len() > self.config.images.max_archive_bytes {
            return Err(ValidationError::InvalidArchive {
                reason: format!(
                    "archive is {} bytes, limit is {}",
                    data.len(),
                    self.config.images.max_archive_bytes
                ),
            }
            .into());
        }
        if data.len() < 2 || data[0..2] != GZIP_MAGIC {
            return Err(ValidationError::InvalidArchive {
                reason: "archive is not gzip-compressed".to_string(),
            }
            .into());
        }

        let archive_key = format!("build-archives/{}/{}.tar.gz", customer_id, Uuid::new_v4());
        let meta = ObjectMeta {
            encrypt: false,
            tags: HashMap::from([
                ("customer_id".to_string(), customer_id.to_string()),
                ("image_name".to_string(), name.to_string()),
            ]),
        };
        self.storage.put(&archive_key, &data, &meta).await?;

        let build_args_json = if build_args.is_empty() {
            None
        } else {
            Some(serde_json::to_string(build_args)?)
        };

        let image = self
            .database
            .create_image(
                customer_id,
                name,
                1,
                None,
                &archive_key,
                build_args_json.as_deref(),
                requires_approval,
            )
            .await?;

        info!(
            "Queued image build {} for customer {} ({} bytes)",
            image.id,
            customer_id,
            data.len()
        );
        Ok(image)
    }

    /// Queue a rebuild: a brand-new record with `version + 1` chained to the
    /// original, which is never mutated.
    pub async fn rebuild(&self, image_id: i64) -> Result<CustomImage> {
        let original = self.database.get_image(image_id).await?;
        if original.deleted_at.is_some() {
            return Err(ValidationError::InvalidValue {
                field: "image_id".to_string(),
                reason: "cannot rebuild a deleted image".to_string(),
            }
            .into());
        }

        let rebuilt = self
            .database
            .create_image(
                original.customer_id,
                &original.name,
                original.version + 1,
                Some(original.id),
                &original.archive_key,
                original.build_args.as_deref(),
                original.requires_approval,
            )
            .await?;

        info!(
            "Queued rebuild of image {} as {} (v{})",
            original.id, rebuilt.id, rebuilt.version
        );
        Ok(rebuilt)
    }

    pub async fn approve(&self, image_id: i64, approved_by: &str) -> Result<CustomImage> {
        self.database.approve_image(image_id, approved_by).await
    }

    /// Administratively reject a completed image
    pub async fn reject(&self, image_id: i64, reason: &str) -> Result<CustomImage> {
        let image = self
            .database
            .update_image_state(image_id, ImageState::Rejected, Some(reason))
            .await?;
        self.database
            .append_build_log(image_id, "review", &format!("Rejected: {}", reason))
            .await?;
        Ok(image)
    }

    /// Process every PENDING image; per-image failures do not stop the batch
    pub async fn process_pending(&self) -> Result<usize> {
        let pending = self.database.list_pending_images().await?;
        let mut processed = 0usize;
        for image in pending {
            match self.process_image(image.id).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    error!("Image {} pipeline run failed: {}", image.id, e);
                }
            }
        }
        Ok(processed)
    }

    /// Walk one image through the pipeline states
    pub async fn process_image(&self, image_id: i64) -> Result<()> {
        let image = self.database.get_image(image_id).await?;

        self.database
            .update_image_state(image_id, ImageState::Validating, None)
            .await?;
        self.database
            .append_build_log(image_id, "validate", "Validating build archive")
            .await?;

        let archive = match self.storage.get(&image.archive_key).await {
            Ok(data) => data,
            Err(e) => {
                return self
                    .fail_image(image_id, "validate", &format!("archive unavailable: {}", e))
                    .await
            }
        };

        if let Err(reason) = validate_build_archive(&archive) {
            return self.fail_image(image_id, "validate", &reason).await;
        }

        self.database
            .update_image_state(image_id, ImageState::Building, None)
            .await?;
        let tag = format!(
            "customer-{}/{}:v{}",
            image.customer_id, image.name, image.version
        );
        self.database
            .append_build_log(image_id, "build", &format!("Building image {}", tag))
            .await?;

        let build_args: HashMap<String, String> = image
            .build_args
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        match self
            .runtime
            .build_image(&tag, Bytes::from(archive), &build_args)
            .await
        {
            Ok(lines) => {
                for line in lines {
                    self.database.append_build_log(image_id, "build", &line).await?;
                }
            }
            Err(e) => {
                return self.fail_image(image_id, "build", &e.to_string()).await;
            }
        }
        self.database.set_image_tag(image_id, &tag).await?;

        self.database
            .update_image_state(image_id, ImageState::Scanning, None)
            .await?;
        if let Err(reason) = self.scan_image(image_id, &tag).await {
            return self.fail_image(image_id, "scan", &reason.to_string()).await;
        }

        self.database
            .update_image_state(image_id, ImageState::Completed, None)
            .await?;
        self.database
            .append_build_log(image_id, "complete", &format!("Image {} ready", tag))
            .await?;

        if let Err(e) = self
            .alert_service
            .send_immediate_alert(
                AlertType::ImageBuild,
                AlertSeverity::Info,
                &tag,
                format!("Image build {} completed", image_id),
                None,
            )
            .await
        {
            error!("Failed to send build alert: {}", e);
        }

        info!("Image {} completed as {}", image_id, tag);
        Ok(())
    }

    async fn scan_image(&self, image_id: i64, tag: &str) -> Result<()> {
        let Some(command_line) = &self.config.images.scanner_command else {
            self.database
                .append_build_log(image_id, "scan", "No scanner configured, skipping scan")
                .await?;
            return Ok(());
        };

        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("scanner_command is empty"))?;
        let mut command = tokio::process::Command::new(program);
        command.args(parts).arg(tag);

        self.database
            .append_build_log(image_id, "scan", &format!("Scanning {} with {}", tag, program))
            .await?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.config.images.scan_timeout_seconds),
            command.output(),
        )
        .await
        .map_err(|_| {
            anyhow!(
                "scanner timed out after {}s",
                self.config.images.scan_timeout_seconds
            )
        })?
        .map_err(|e| anyhow!("scanner failed to run: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().rev().take(50).collect::<Vec<_>>().into_iter().rev() {
            if !line.trim().is_empty() {
                self.database.append_build_log(image_id, "scan", line).await?;
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "vulnerability scan failed ({}): {}",
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }

    async fn fail_image(&self, image_id: i64, step: &str, reason: &str) -> Result<()> {
        warn!("Image {} failed at {}: {}", image_id, step, reason);
        self.database
            .append_build_log(image_id, step, &format!("FAILED: {}", reason))
            .await?;
        self.database
            .update_image_state(image_id, ImageState::Failed, Some(reason))
            .await?;

        if let Err(e) = self
            .alert_service
            .send_immediate_alert(
                AlertType::ImageBuild,
                AlertSeverity::Warning,
                &format!("image-{}", image_id),
                format!("Image build {} failed at {}: {}", image_id, step, reason),
                None,
            )
            .await
        {
            error!("Failed to send build failure alert: {}", e);
        }
        Ok(())
    }
}

/// Check an uploaded build context: it must be a readable tar.gz containing
/// a root-level Dockerfile whose effective USER is not root.
pub fn validate_build_archive(data: &[u8]) -> Result<(), String> {
    let decoder = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(decoder);

    let mut dockerfile: Option<String> = None;
    let entries = archive
        .entries()
        .map_err(|e| format!("unreadable archive: {}", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("corrupt archive entry: {}", e))?;
        let path = entry
            .path()
            .map_err(|e| format!("bad entry path: {}", e))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if path == "Dockerfile" {
            let mut contents = String::new();
            entry
                .read_to_string(&mut contents)
                .map_err(|e| format!("unreadable Dockerfile: {}", e))?;
            dockerfile = Some(contents);
        }
    }

    let dockerfile = dockerfile.ok_or_else(|| "archive contains no Dockerfile".to_string())?;

    // The last USER directive wins, same as the engine's view
    let effective_user = dockerfile
        .lines()
        .map(str::trim)
        .filter(|line| {
            let upper = line.to_ascii_uppercase();
            upper.starts_with("USER ") || upper == "USER"
        })
        .last()
        .map(|line| line[4..].trim().to_string());

    match effective_user.as_deref() {
        None => Err("Dockerfile has no USER directive; containers may not run as root".to_string()),
        Some("root") | Some("0") => {
            Err("Dockerfile sets USER root; containers may not run as root".to_string())
        }
        Some(user) if user.is_empty() => Err("Dockerfile USER directive is empty".to_string()),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn archive_with(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_valid_archive_passes() {
        let data = archive_with(&[(
            "Dockerfile",
            "FROM debian:stable\nRUN apt-get update\nUSER app\nCMD [\"bash\"]\n",
        )]);
        assert!(validate_build_archive(&data).is_ok());
    }

    #[test]
    fn test_missing_dockerfile_rejected() {
        let data = archive_with(&[("README.md", "no build here")]);
        let err = validate_build_archive(&data).unwrap_err();
        assert!(err.contains("no Dockerfile"));
    }

    #[test]
    fn test_root_user_rejected() {
        let data = archive_with(&[("Dockerfile", "FROM debian\nUSER app\nUSER root\n")]);
        let err = validate_build_archive(&data).unwrap_err();
        assert!(err.contains("root"));
    }

    #[test]
    fn test_missing_user_rejected() {
        let data = archive_with(&[("Dockerfile", "FROM debian\nCMD [\"bash\"]\n")]);
        let err = validate_build_archive(&data).unwrap_err();
        assert!(err.contains("USER"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_build_archive(b"\x1f\x8bnot really gzip").is_err());
    }
}
