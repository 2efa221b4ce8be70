//! Operator notification webhook.
//!
//! This core emits lifecycle and failure events; message rendering and
//! delivery to humans is the notification subsystem's job downstream.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::constants::external::WEBHOOK_TIMEOUT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertType {
    Provisioning,
    ContainerLifecycle,
    ImageBuild,
    DnsSync,
    Backup,
    Billing,
    Operation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub timestamp: DateTime<Utc>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub target: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

pub struct AlertService {
    webhook_url: String,
    client: Client,
}

impl AlertService {
    pub fn new(webhook_url: String) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client for AlertService");

        Self {
            webhook_url,
            client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    pub fn get_webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Probe the webhook so a misconfigured URL shows up at startup
    pub async fn test_webhook(&self) -> Result<()> {
        self.send_immediate_alert(
            AlertType::Operation,
            AlertSeverity::Info,
            "orchestrator",
            "Orchestrator started, webhook connectivity test".to_string(),
            None,
        )
        .await
    }

    pub async fn send_immediate_alert(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        target: &str,
        message: String,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let payload = AlertPayload {
            timestamp: Utc::now(),
            alert_type,
            severity,
            target: target.to_string(),
            message,
            details,
        };
        self.send_webhook(&payload).await
    }

    pub async fn alert_operation_started(&self, operation_type: &str, target: &str) -> Result<()> {
        self.send_immediate_alert(
            AlertType::Operation,
            AlertSeverity::Info,
            target,
            format!("Operation '{}' started", operation_type),
            None,
        )
        .await
    }

    pub async fn alert_operation_completed(
        &self,
        operation_type: &str,
        target: &str,
    ) -> Result<()> {
        self.send_immediate_alert(
            AlertType::Operation,
            AlertSeverity::Info,
            target,
            format!("Operation '{}' completed", operation_type),
            None,
        )
        .await
    }

    /// Failure alert sent only after retries exhaust; failed operations may
    /// never disappear silently
    pub async fn alert_operation_failed(
        &self,
        operation_type: &str,
        target: &str,
        attempts: u32,
        error: &str,
    ) -> Result<()> {
        self.send_immediate_alert(
            AlertType::Operation,
            AlertSeverity::Critical,
            target,
            format!(
                "Operation '{}' failed after {} attempts: {}",
                operation_type, attempts, error
            ),
            Some(serde_json::json!({
                "operation_type": operation_type,
                "attempts": attempts,
                "error": error,
            })),
        )
        .await
    }

    async fn send_webhook(&self, payload: &AlertPayload) -> Result<()> {
        if self.webhook_url.is_empty() {
            debug!("No webhook URL configured, skipping alert");
            return Ok(());
        }

        match timeout(
            Duration::from_secs(10),
            self.client.post(&self.webhook_url).json(payload).send(),
        )
        .await
        {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    info!(
                        "Alert sent for {}: {:?}",
                        payload.target, payload.alert_type
                    );
                } else {
                    warn!(
                        "Alert webhook returned status {} for {}",
                        response.status(),
                        payload.target
                    );
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to send alert for {}: {}", payload.target, e);
            }
            Err(_) => {
                warn!("Alert webhook timeout for {}", payload.target);
            }
        }

        Ok(())
    }
}

impl Clone for AlertService {
    fn clone(&self) -> Self {
        Self {
            webhook_url: self.webhook_url.clone(),
            client: self.client.clone(),
        }
    }
}
