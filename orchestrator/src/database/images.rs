//! Custom image persistence.
//!
//! Image rows are immutable apart from state advancement and build output
//! fields; a rebuild always inserts a new row with `previous_version_id`
//! pointing at its parent, so the version chain stays auditable.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::errors::InvariantError;
use crate::state::{ensure_image_transition, ImageState};

use super::records::{CustomImage, ImageBuildLogLine};
use super::Database;

fn row_to_image(row: &SqliteRow) -> Result<CustomImage> {
    let state: String = row.try_get("state")?;
    Ok(CustomImage {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        previous_version_id: row.try_get("previous_version_id")?,
        state: state.parse().map_err(|e: String| anyhow!(e))?,
        archive_key: row.try_get("archive_key")?,
        image_tag: row.try_get("image_tag")?,
        build_args: row.try_get("build_args")?,
        build_error: row.try_get("build_error")?,
        requires_approval: row.try_get("requires_approval")?,
        approved_at: row.try_get("approved_at")?,
        approved_by: row.try_get("approved_by")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_image(
        &self,
        customer_id: i64,
        name: &str,
        version: i64,
        previous_version_id: Option<i64>,
        archive_key: &str,
        build_args: Option<&str>,
        requires_approval: bool,
    ) -> Result<CustomImage> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO custom_images (
                customer_id, name, version, previous_version_id, state,
                archive_key, build_args, requires_approval, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(customer_id)
        .bind(name)
        .bind(version)
        .bind(previous_version_id)
        .bind(archive_key)
        .bind(build_args)
        .bind(requires_approval)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        info!(
            "Created image {} '{}' v{} for customer {}",
            id, name, version, customer_id
        );
        self.get_image(id).await
    }

    pub async fn get_image(&self, id: i64) -> Result<CustomImage> {
        let row = sqlx::query("SELECT * FROM custom_images WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| anyhow!("Image {} not found", id))?;
        row_to_image(&row)
    }

    pub async fn list_pending_images(&self) -> Result<Vec<CustomImage>> {
        let rows = sqlx::query(
            "SELECT * FROM custom_images WHERE state = 'PENDING' AND deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_image).collect()
    }

    pub async fn list_customer_images(&self, customer_id: i64) -> Result<Vec<CustomImage>> {
        let rows = sqlx::query(
            "SELECT * FROM custom_images WHERE customer_id = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_image).collect()
    }

    /// Advance an image through the pipeline state table
    pub async fn update_image_state(
        &self,
        id: i64,
        to: ImageState,
        build_error: Option<&str>,
    ) -> Result<CustomImage> {
        let current = self.get_image(id).await?;
        ensure_image_transition(current.state, to)?;

        sqlx::query(
            "UPDATE custom_images SET state = ?, build_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(to.as_str())
        .bind(build_error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        debug!("Image {} moved {} -> {}", id, current.state, to);
        self.get_image(id).await
    }

    pub async fn set_image_tag(&self, id: i64, image_tag: &str) -> Result<()> {
        sqlx::query("UPDATE custom_images SET image_tag = ?, updated_at = ? WHERE id = ?")
            .bind(image_tag)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Approval gate: only COMPLETED images may be approved
    pub async fn approve_image(&self, id: i64, approved_by: &str) -> Result<CustomImage> {
        let image = self.get_image(id).await?;
        if image.state != ImageState::Completed {
            return Err(InvariantError::ImageNotEligible {
                image_id: id,
                reason: format!("cannot approve an image in state {}", image.state),
            }
            .into());
        }

        sqlx::query(
            "UPDATE custom_images SET approved_at = ?, approved_by = ?, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(approved_by)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        info!("Image {} approved by {}", id, approved_by);
        self.get_image(id).await
    }

    pub async fn soft_delete_image(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE custom_images SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn append_build_log(&self, image_id: i64, step: &str, line: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO image_build_logs (image_id, step, line, logged_at) VALUES (?, ?, ?, ?)",
        )
        .bind(image_id)
        .bind(step)
        .bind(line)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_build_logs(&self, image_id: i64, limit: i32) -> Result<Vec<ImageBuildLogLine>> {
        let rows = sqlx::query(
            r#"
            SELECT image_id, step, line, logged_at
            FROM image_build_logs
            WHERE image_id = ?
            ORDER BY logged_at, id
            LIMIT ?
            "#,
        )
        .bind(image_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ImageBuildLogLine {
                    image_id: row.try_get("image_id")?,
                    step: row.try_get("step")?,
                    line: row.try_get("line")?,
                    logged_at: row.try_get("logged_at")?,
                })
            })
            .collect()
    }
}
