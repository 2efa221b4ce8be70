//! Operation records: one row per background orchestration attempt.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use super::records::OperationRecord;
use super::Database;

impl Database {
    pub async fn store_operation(&self, record: &OperationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (
                id, operation_type, target, status, attempts,
                started_at, completed_at, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempts = excluded.attempts,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message
            "#,
        )
        .bind(&record.id)
        .bind(&record.operation_type)
        .bind(&record.target)
        .bind(&record.status)
        .bind(record.attempts)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(&record.error_message)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_operation_status(
        &self,
        operation_id: &str,
        status: &str,
        attempts: i64,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE operations
            SET status = ?, attempts = ?, completed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(attempts)
        .bind(Utc::now())
        .bind(error_message)
        .bind(operation_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_recent_operations(&self, limit: i32) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, operation_type, target, status, attempts,
                   started_at, completed_at, error_message
            FROM operations
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OperationRecord {
                    id: row.try_get("id")?,
                    operation_type: row.try_get("operation_type")?,
                    target: row.try_get("target")?,
                    status: row.try_get("status")?,
                    attempts: row.try_get("attempts")?,
                    started_at: row.try_get("started_at")?,
                    completed_at: row.try_get("completed_at")?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }
}
