//! Scheduled jobs: backup cadences, retention cleanup, metric pruning and
//! the billing batches.
//!
//! Schedules are 6-field cron expressions (sec min hour day month dow)
//! from the configuration; a job whose schedule is unset simply is not
//! registered.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::backup::{BackupManager, BackupType};
use crate::config::Config;
use crate::database::Database;
use crate::services::{BillingService, MetricsService, OperationExecutor};
use crate::state::ContainerState;

pub struct OrchestratorScheduler {
    config: Arc<Config>,
    database: Arc<Database>,
    backup_manager: Arc<BackupManager>,
    metrics_service: Arc<MetricsService>,
    billing_service: Arc<BillingService>,
    executor: Arc<OperationExecutor>,
    scheduler: JobScheduler,
}

impl OrchestratorScheduler {
    pub async fn new(
        config: Arc<Config>,
        database: Arc<Database>,
        backup_manager: Arc<BackupManager>,
        metrics_service: Arc<MetricsService>,
        billing_service: Arc<BillingService>,
        executor: Arc<OperationExecutor>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            config,
            database,
            backup_manager,
            metrics_service,
            billing_service,
            executor,
            scheduler,
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("Registering scheduled jobs (6-field cron format)");
        let mut scheduled_count = 0;

        let backup_jobs = [
            (
                self.config.schedules.daily_backup.clone(),
                BackupType::Daily,
            ),
            (
                self.config.schedules.weekly_backup.clone(),
                BackupType::Weekly,
            ),
            (
                self.config.schedules.monthly_backup.clone(),
                BackupType::Monthly,
            ),
        ];
        for (schedule, backup_type) in backup_jobs {
            if let Some(schedule) = schedule {
                match self.schedule_backup_job(&schedule, backup_type).await {
                    Ok(()) => {
                        scheduled_count += 1;
                        info!(
                            "Scheduled {} backups: {}",
                            backup_type.as_str(),
                            schedule
                        );
                    }
                    Err(e) => {
                        error!(
                            "Failed to schedule {} backups ({}): {}",
                            backup_type.as_str(),
                            schedule,
                            e
                        );
                    }
                }
            }
        }

        if let Some(schedule) = self.config.schedules.retention_cleanup.clone() {
            match self.schedule_retention_job(&schedule).await {
                Ok(()) => {
                    scheduled_count += 1;
                    info!("Scheduled retention cleanup: {}", schedule);
                }
                Err(e) => error!("Failed to schedule retention cleanup: {}", e),
            }
        }

        if let Some(schedule) = self.config.schedules.metrics_prune.clone() {
            match self.schedule_metrics_prune_job(&schedule).await {
                Ok(()) => {
                    scheduled_count += 1;
                    info!("Scheduled metrics pruning: {}", schedule);
                }
                Err(e) => error!("Failed to schedule metrics pruning: {}", e),
            }
        }

        if let Some(schedule) = self.config.schedules.recurring_billing.clone() {
            match self.schedule_recurring_billing_job(&schedule).await {
                Ok(()) => {
                    scheduled_count += 1;
                    info!("Scheduled recurring billing: {}", schedule);
                }
                Err(e) => error!("Failed to schedule recurring billing: {}", e),
            }
        }

        if let Some(schedule) = self.config.schedules.overdue_check.clone() {
            match self.schedule_overdue_job(&schedule).await {
                Ok(()) => {
                    scheduled_count += 1;
                    info!("Scheduled overdue checks: {}", schedule);
                }
                Err(e) => error!("Failed to schedule overdue checks: {}", e),
            }
        }

        if scheduled_count > 0 {
            self.scheduler.start().await?;
            info!("Scheduler started with {} jobs", scheduled_count);
        } else {
            warn!("No scheduled jobs configured - scheduler not started");
        }

        Ok(())
    }

    fn validate_6_field_cron(&self, schedule: &str) -> Result<()> {
        let fields: Vec<&str> = schedule.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(anyhow!(
                "Expected 6 cron fields (sec min hour day month dow), got {}",
                fields.len()
            ));
        }
        Ok(())
    }

    /// Back up every running container on the given cadence. Each container
    /// runs under its subscription's exclusive lock; busy subscriptions are
    /// skipped until the next tick.
    async fn schedule_backup_job(&self, schedule: &str, backup_type: BackupType) -> Result<()> {
        self.validate_6_field_cron(schedule)?;

        let database = self.database.clone();
        let backup_manager = self.backup_manager.clone();
        let executor = self.executor.clone();

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let database = database.clone();
            let backup_manager = backup_manager.clone();
            let executor = executor.clone();

            Box::pin(async move {
                info!("Executing scheduled {} backups", backup_type.as_str());
                let containers = match database
                    .list_containers_in_state(ContainerState::Running)
                    .await
                {
                    Ok(containers) => containers,
                    Err(e) => {
                        error!("Backup sweep could not list containers: {}", e);
                        return;
                    }
                };

                for container in containers {
                    let backup_manager = backup_manager.clone();
                    let container_id = container.id;
                    let operation_type = format!("{}_backup", backup_type.as_str());
                    let result = executor
                        .execute_for_subscription(
                            container.subscription_id,
                            &operation_type,
                            move || {
                                let backup_manager = backup_manager.clone();
                                async move {
                                    backup_manager
                                        .backup_container(container_id, backup_type)
                                        .await
                                        .map(|_| ())
                                }
                            },
                        )
                        .await;
                    if let Err(e) = result {
                        warn!(
                            "Skipping {} backup of container {}: {}",
                            backup_type.as_str(),
                            container_id,
                            e
                        );
                    }
                }
            })
        })
        .map_err(|e| anyhow!("Invalid cron schedule: {}", e))?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn schedule_retention_job(&self, schedule: &str) -> Result<()> {
        self.validate_6_field_cron(schedule)?;
        let backup_manager = self.backup_manager.clone();

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let backup_manager = backup_manager.clone();
            Box::pin(async move {
                info!("Executing scheduled backup retention cleanup");
                match backup_manager.cleanup_old_backups().await {
                    Ok(report) => {
                        info!(
                            "Retention cleanup done: {} deleted, {} bytes freed",
                            report.deleted, report.freed_bytes
                        );
                    }
                    Err(e) => error!("Retention cleanup failed: {}", e),
                }
            })
        })
        .map_err(|e| anyhow!("Invalid cron schedule: {}", e))?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn schedule_metrics_prune_job(&self, schedule: &str) -> Result<()> {
        self.validate_6_field_cron(schedule)?;
        let metrics_service = self.metrics_service.clone();
        let retention_days = self.config.metrics.retention_days;

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let metrics_service = metrics_service.clone();
            Box::pin(async move {
                if let Err(e) = metrics_service.prune(retention_days).await {
                    error!("Metrics pruning failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Invalid cron schedule: {}", e))?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn schedule_recurring_billing_job(&self, schedule: &str) -> Result<()> {
        self.validate_6_field_cron(schedule)?;
        let billing_service = self.billing_service.clone();

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let billing_service = billing_service.clone();
            Box::pin(async move {
                info!("Executing scheduled recurring billing");
                match billing_service
                    .run_recurring_billing(Utc::now().date_naive())
                    .await
                {
                    Ok(report) => {
                        if report.failed > 0 {
                            warn!(
                                "Recurring billing finished with failures: {}/{} failed",
                                report.failed, report.processed
                            );
                        }
                    }
                    Err(e) => error!("Recurring billing run failed: {}", e),
                }
            })
        })
        .map_err(|e| anyhow!("Invalid cron schedule: {}", e))?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn schedule_overdue_job(&self, schedule: &str) -> Result<()> {
        self.validate_6_field_cron(schedule)?;
        let billing_service = self.billing_service.clone();

        let job = Job::new_async(schedule, move |_uuid, _scheduler| {
            let billing_service = billing_service.clone();
            Box::pin(async move {
                info!("Executing scheduled overdue checks");
                if let Err(e) = billing_service
                    .run_overdue_checks(Utc::now().date_naive())
                    .await
                {
                    error!("Overdue check run failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow!("Invalid cron schedule: {}", e))?;

        self.scheduler.add(job).await?;
        Ok(())
    }
}
