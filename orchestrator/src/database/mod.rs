//! Database layer for the hosting orchestrator.
//!
//! SQLite persistence for:
//! - Plans and subscriptions (billing/ownership units)
//! - Containers and their metric samples
//! - Custom images and build logs (immutable version chains)
//! - DNS zones, records and sync audit rows
//! - Operation records and billing events
//!
//! The module is organized into submodules:
//! - `records` - All record types (entities)
//! - `plans`, `subscriptions`, `containers`, `images`, `dns`, `metrics`,
//!   `billing`, `operations` - typed CRUD per concern

mod billing;
mod containers;
mod dns;
mod images;
mod metrics;
mod operations;
mod plans;
mod records;
mod subscriptions;

pub use records::*;

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{error, info, warn};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Database path: {}", database_path);

        if database_path != ":memory:" {
            if let Some(parent) = Path::new(database_path).parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create database directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        // An in-memory database exists per connection, so the pool must be
        // pinned to a single never-reaped connection or the schema vanishes
        let connect_result = if database_path == ":memory:" {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await
        } else {
            SqlitePool::connect(&format!("sqlite:{}?mode=rwc", database_path)).await
        };

        let pool = match connect_result {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to connect to database {}: {}", database_path, e);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;

        // Anything left mid-flight by a previous process cannot complete now;
        // move it to its failure state so operators see it and retries can run.
        let cleaned = database.cleanup_interrupted_work().await?;
        if cleaned > 0 {
            warn!("Marked {} interrupted rows as failed on startup", cleaned);
        }

        info!("Database initialized");
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let statements: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                cpu_cores INTEGER NOT NULL,
                memory_mb INTEGER NOT NULL,
                storage_gb INTEGER NOT NULL,
                bandwidth_gb INTEGER NOT NULL,
                monthly_price TEXT NOT NULL,
                setup_fee TEXT NOT NULL DEFAULT '0',
                base_image TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                plan_id INTEGER NOT NULL REFERENCES plans(id),
                state TEXT NOT NULL,
                billing_cycle TEXT NOT NULL,
                start_date DATE NOT NULL,
                current_period_start DATE,
                next_billing_date DATE,
                is_trial BOOLEAN NOT NULL DEFAULT 0,
                auto_renew BOOLEAN NOT NULL DEFAULT 1,
                total_invoiced TEXT NOT NULL DEFAULT '0',
                total_paid TEXT NOT NULL DEFAULT '0',
                custom_image_id INTEGER,
                cancelled_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_state ON subscriptions(state)",
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_billing ON subscriptions(next_billing_date)",
            r#"
            CREATE TABLE IF NOT EXISTS containers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
                state TEXT NOT NULL,
                runtime_id TEXT,
                ip_address TEXT NOT NULL,
                ssh_port INTEGER NOT NULL,
                hostname TEXT NOT NULL,
                volume_path TEXT NOT NULL,
                first_started_at DATETIME,
                last_started_at DATETIME,
                last_stopped_at DATETIME,
                uptime_seconds INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_containers_subscription ON containers(subscription_id, state)",
            r#"
            CREATE TABLE IF NOT EXISTS container_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id INTEGER NOT NULL,
                recorded_at DATETIME NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_mb REAL NOT NULL,
                storage_mb REAL NOT NULL,
                net_rx_bytes INTEGER NOT NULL,
                net_tx_bytes INTEGER NOT NULL,
                block_read_bytes INTEGER NOT NULL,
                block_write_bytes INTEGER NOT NULL,
                process_count INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_metrics_container_time ON container_metrics(container_id, recorded_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS custom_images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                previous_version_id INTEGER,
                state TEXT NOT NULL,
                archive_key TEXT NOT NULL,
                image_tag TEXT,
                build_args TEXT,
                build_error TEXT,
                requires_approval BOOLEAN NOT NULL DEFAULT 0,
                approved_at DATETIME,
                approved_by TEXT,
                deleted_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_images_state ON custom_images(state)",
            "CREATE INDEX IF NOT EXISTS idx_images_customer ON custom_images(customer_id, name)",
            r#"
            CREATE TABLE IF NOT EXISTS image_build_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id INTEGER NOT NULL,
                step TEXT NOT NULL,
                line TEXT NOT NULL,
                logged_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_build_logs_image ON image_build_logs(image_id, logged_at)",
            r#"
            CREATE TABLE IF NOT EXISTS dns_zones (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zone_name TEXT UNIQUE NOT NULL,
                subscription_id INTEGER,
                soa_mname TEXT NOT NULL,
                soa_rname TEXT NOT NULL,
                refresh INTEGER NOT NULL,
                retry INTEGER NOT NULL,
                expire INTEGER NOT NULL,
                minimum INTEGER NOT NULL,
                nameservers TEXT NOT NULL,
                default_ttl INTEGER NOT NULL,
                last_updated_serial INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS dns_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zone_id INTEGER NOT NULL REFERENCES dns_zones(id),
                name TEXT NOT NULL,
                record_type TEXT NOT NULL,
                value TEXT NOT NULL,
                ttl INTEGER,
                priority INTEGER,
                weight INTEGER,
                port INTEGER,
                is_system BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_dns_records_zone ON dns_records(zone_id, name, record_type)",
            r#"
            CREATE TABLE IF NOT EXISTS dns_sync_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zone_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                started_at DATETIME NOT NULL,
                completed_at DATETIME
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_dns_sync_zone ON dns_sync_logs(zone_id, started_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                operation_type TEXT NOT NULL,
                target TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 1,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                error_message TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_operations_status ON operations(status, started_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS billing_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                period_start DATE,
                period_end DATE,
                created_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_billing_events_subscription ON billing_events(subscription_id, created_at DESC)",
        ];

        for sql in statements {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                error!("Failed to run schema statement: {}\nSQL was: {}", e, sql);
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Move rows stuck in transitional states to their failure state.
    ///
    /// Runs once at startup: a container left CREATING or REBOOTING, an image
    /// left in a working state, or a PENDING sync log can only mean the
    /// previous process died mid-operation.
    async fn cleanup_interrupted_work(&self) -> Result<u32> {
        let now = Utc::now();
        let mut cleaned = 0u32;

        let res = sqlx::query(
            "UPDATE containers SET state = 'ERROR', updated_at = ? WHERE state IN ('CREATING', 'REBOOTING')",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        cleaned += res.rows_affected() as u32;

        let res = sqlx::query(
            r#"
            UPDATE custom_images
            SET state = 'FAILED',
                build_error = 'Build interrupted by orchestrator restart',
                updated_at = ?
            WHERE state IN ('VALIDATING', 'BUILDING', 'SCANNING')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        cleaned += res.rows_affected() as u32;

        let res = sqlx::query(
            r#"
            UPDATE dns_sync_logs
            SET status = 'FAILED',
                error_message = 'Sync interrupted by orchestrator restart',
                completed_at = ?
            WHERE status = 'PENDING'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        cleaned += res.rows_affected() as u32;

        let res = sqlx::query(
            r#"
            UPDATE operations
            SET status = 'failed',
                error_message = 'Operation interrupted by orchestrator restart',
                completed_at = ?
            WHERE status = 'started'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        cleaned += res.rows_affected() as u32;

        Ok(cleaned)
    }
}
