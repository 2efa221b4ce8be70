//! Per-subscription serialization of container operations
//!
//! A subscription's container operations (provision/start/stop/terminate,
//! restore) race on the same container row, so they are mutually exclusive:
//! only one may run at a time per subscription. Different subscriptions are
//! fully independent and run in parallel.
//!
//! # Usage
//!
//! ```ignore
//! // Try to start operation (fails if the subscription is busy)
//! tracker.try_start_operation(42, "provision", None).await?;
//!
//! // Perform operation...
//!
//! // Mark as finished
//! tracker.finish_operation(42).await;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::errors::InvariantError;

#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub operation_type: String,
    pub subscription_id: i64,
    pub started_at: DateTime<Utc>,
    pub initiated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub busy_subscriptions: HashMap<i64, ActiveOperation>,
    pub total_active: usize,
}

pub struct SubscriptionOperationTracker {
    active_operations: Arc<RwLock<HashMap<i64, ActiveOperation>>>,
}

impl SubscriptionOperationTracker {
    pub fn new() -> Self {
        Self {
            active_operations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Try to start an exclusive operation on a subscription.
    /// Returns an error if the subscription is already busy.
    #[instrument(skip(self), fields(subscription = subscription_id, operation = %operation_type))]
    pub async fn try_start_operation(
        &self,
        subscription_id: i64,
        operation_type: &str,
        initiated_by: Option<String>,
    ) -> Result<(), InvariantError> {
        let mut active = self.active_operations.write().await;

        if let Some(current) = active.get(&subscription_id) {
            return Err(InvariantError::SubscriptionBusy {
                subscription_id,
                current_operation: current.operation_type.clone(),
            });
        }

        active.insert(
            subscription_id,
            ActiveOperation {
                operation_type: operation_type.to_string(),
                subscription_id,
                started_at: Utc::now(),
                initiated_by,
            },
        );
        info!(
            "Started operation '{}' on subscription {}",
            operation_type, subscription_id
        );
        Ok(())
    }

    /// Mark an operation as finished
    #[instrument(skip(self), fields(subscription = subscription_id))]
    pub async fn finish_operation(&self, subscription_id: i64) {
        let mut active = self.active_operations.write().await;
        if let Some(op) = active.remove(&subscription_id) {
            let duration = Utc::now().signed_duration_since(op.started_at);
            info!(
                "Finished operation '{}' on subscription {} (took {}s)",
                op.operation_type,
                subscription_id,
                duration.num_seconds()
            );
        }
    }

    /// Get current operation status
    pub async fn get_operation_status(&self) -> OperationStatus {
        let active = self.active_operations.read().await;
        OperationStatus {
            busy_subscriptions: active.clone(),
            total_active: active.len(),
        }
    }

    /// Check if a subscription is busy
    pub async fn is_busy(&self, subscription_id: i64) -> bool {
        let active = self.active_operations.read().await;
        active.contains_key(&subscription_id)
    }

    /// Cleanup operations older than the given age (stuck operations)
    pub async fn cleanup_old_operations(&self, max_hours: i64) -> u32 {
        let mut active = self.active_operations.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(max_hours);
        let initial_count = active.len();

        active.retain(|subscription_id, operation| {
            let should_keep = operation.started_at > cutoff;
            if !should_keep {
                warn!(
                    "Cleaned up stuck operation '{}' on subscription {} (was running for {}h)",
                    operation.operation_type,
                    subscription_id,
                    Utc::now()
                        .signed_duration_since(operation.started_at)
                        .num_hours()
                );
            }
            should_keep
        });

        (initial_count - active.len()) as u32
    }
}

impl Default for SubscriptionOperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SubscriptionOperationTracker {
    fn clone(&self) -> Self {
        Self {
            active_operations: self.active_operations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_per_subscription() {
        let tracker = SubscriptionOperationTracker::new();

        assert!(tracker
            .try_start_operation(1, "provision", None)
            .await
            .is_ok());
        assert!(tracker.is_busy(1).await);

        // Concurrent operation on the same subscription is rejected
        assert!(tracker.try_start_operation(1, "stop", None).await.is_err());

        tracker.finish_operation(1).await;
        assert!(!tracker.is_busy(1).await);

        assert!(tracker.try_start_operation(1, "stop", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscriptions_independent() {
        let tracker = SubscriptionOperationTracker::new();

        assert!(tracker
            .try_start_operation(1, "provision", None)
            .await
            .is_ok());
        assert!(tracker.try_start_operation(2, "backup", None).await.is_ok());
        assert!(tracker.try_start_operation(3, "reboot", None).await.is_ok());

        let status = tracker.get_operation_status().await;
        assert_eq!(status.total_active, 3);
        assert!(status.busy_subscriptions.contains_key(&1));
        assert!(status.busy_subscriptions.contains_key(&2));
        assert!(status.busy_subscriptions.contains_key(&3));
    }

    #[tokio::test]
    async fn test_cleanup_old_operations() {
        let tracker = SubscriptionOperationTracker::new();
        tracker
            .try_start_operation(1, "provision", None)
            .await
            .unwrap();

        // Nothing is older than 1 hour yet
        assert_eq!(tracker.cleanup_old_operations(1).await, 0);
        assert!(tracker.is_busy(1).await);
    }
}
