//! Generic executor for long-running orchestration operations.
//!
//! Every operation runs on the background worker pool, never inline in a
//! request handler: the work calls slow external processes (container
//! runtime, DNS reload, proxy reload, object storage). Each operation is
//! recorded as an `operations` row; transient failures retry with backoff
//! up to a bound, and exhausting the bound notifies an operator instead of
//! disappearing.

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::retries::{BACKOFF_BASE_SECONDS, DEFAULT_MAX_ATTEMPTS};
use crate::database::{Database, OperationRecord};
use crate::operation_tracker::SubscriptionOperationTracker;
use crate::services::alert_service::AlertService;

type OperationFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Clone)]
pub struct OperationExecutor {
    database: Arc<Database>,
    alert_service: Arc<AlertService>,
    tracker: Arc<SubscriptionOperationTracker>,
}

impl OperationExecutor {
    pub fn new(
        database: Arc<Database>,
        alert_service: Arc<AlertService>,
        tracker: Arc<SubscriptionOperationTracker>,
    ) -> Self {
        Self {
            database,
            alert_service,
            tracker,
        }
    }

    pub fn tracker(&self) -> Arc<SubscriptionOperationTracker> {
        self.tracker.clone()
    }

    /// Run an operation in the background with retry and tracking.
    ///
    /// Returns the operation id immediately; progress lands in the
    /// `operations` table and, on final failure, at the operator webhook.
    /// `operation_fn` must be safe to call again after a failed attempt.
    pub async fn execute_async<F, Fut>(
        &self,
        operation_type: &str,
        target: &str,
        max_attempts: u32,
        operation_fn: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let operation_fn: OperationFn = Arc::new(move || Box::pin(operation_fn()));
        self.spawn_operation(operation_type, target, max_attempts, operation_fn, None)
            .await
    }

    /// Like [`Self::execute_async`], but holds the subscription's exclusive
    /// lock for the whole run, retries included. Rejects immediately when
    /// the subscription is busy.
    pub async fn execute_for_subscription<F, Fut>(
        &self,
        subscription_id: i64,
        operation_type: &str,
        operation_fn: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.tracker
            .try_start_operation(subscription_id, operation_type, None)
            .await?;

        let operation_fn: OperationFn = Arc::new(move || Box::pin(operation_fn()));
        let target = format!("subscription-{}", subscription_id);
        let result = self
            .spawn_operation(
                operation_type,
                &target,
                DEFAULT_MAX_ATTEMPTS,
                operation_fn,
                Some(subscription_id),
            )
            .await;

        if result.is_err() {
            // Never leave the lock behind when the spawn itself failed
            self.tracker.finish_operation(subscription_id).await;
        }
        result
    }

    async fn spawn_operation(
        &self,
        operation_type: &str,
        target: &str,
        max_attempts: u32,
        operation_fn: OperationFn,
        locked_subscription: Option<i64>,
    ) -> Result<String> {
        let operation_id = Uuid::new_v4().to_string();
        let max_attempts = max_attempts.max(1);
        info!(
            "Starting {} for {} (operation_id: {}, max attempts: {})",
            operation_type, target, operation_id, max_attempts
        );

        let record = OperationRecord {
            id: operation_id.clone(),
            operation_type: operation_type.to_string(),
            target: target.to_string(),
            status: "started".to_string(),
            attempts: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.database.store_operation(&record).await?;

        if let Err(e) = self
            .alert_service
            .alert_operation_started(operation_type, target)
            .await
        {
            error!("Failed to send start alert: {}", e);
        }

        let operation_id_clone = operation_id.clone();
        let operation_type_owned = operation_type.to_string();
        let target_owned = target.to_string();
        let database = self.database.clone();
        let alert_service = self.alert_service.clone();
        let tracker = self.tracker.clone();

        tokio::spawn(async move {
            let mut attempt = 0u32;
            let final_error: Option<String> = loop {
                attempt += 1;
                match operation_fn().await {
                    Ok(()) => break None,
                    Err(e) => {
                        if attempt >= max_attempts {
                            break Some(e.to_string());
                        }
                        let backoff = Duration::from_secs(BACKOFF_BASE_SECONDS * attempt as u64);
                        warn!(
                            "{} attempt {}/{} failed for {}: {} (retrying in {}s)",
                            operation_type_owned,
                            attempt,
                            max_attempts,
                            target_owned,
                            e,
                            backoff.as_secs()
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            };

            if let Some(subscription_id) = locked_subscription {
                tracker.finish_operation(subscription_id).await;
            }

            match final_error {
                None => {
                    if let Err(e) = database
                        .update_operation_status(
                            &operation_id_clone,
                            "completed",
                            attempt as i64,
                            None,
                        )
                        .await
                    {
                        error!("Failed to update operation status: {}", e);
                    }
                    if let Err(e) = alert_service
                        .alert_operation_completed(&operation_type_owned, &target_owned)
                        .await
                    {
                        error!("Failed to send completion alert: {}", e);
                    }
                    info!(
                        "{} completed for {} after {} attempt(s) (operation_id: {})",
                        operation_type_owned, target_owned, attempt, operation_id_clone
                    );
                }
                Some(err) => {
                    if let Err(update_err) = database
                        .update_operation_status(
                            &operation_id_clone,
                            "failed",
                            attempt as i64,
                            Some(err.clone()),
                        )
                        .await
                    {
                        error!("Failed to update operation status: {}", update_err);
                    }
                    if let Err(alert_err) = alert_service
                        .alert_operation_failed(&operation_type_owned, &target_owned, attempt, &err)
                        .await
                    {
                        error!("Failed to send failure alert: {}", alert_err);
                    }
                    error!(
                        "{} failed for {} after {} attempts (operation_id: {}): {}",
                        operation_type_owned, target_owned, attempt, operation_id_clone, err
                    );
                }
            }
        });

        Ok(operation_id)
    }
}
