//! Reverse-proxy configuration generator.
//!
//! One config file per exposed domain in the proxy's sites directory.
//! Reload is guarded by a config test: a file that fails the test is
//! deleted again before it can ever reach the running proxy.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::errors::ExternalError;

#[async_trait]
pub trait ProxyControlPlane: Send + Sync {
    /// Validate the on-disk configuration without touching the running proxy
    async fn test_config(&self) -> Result<()>;

    /// Reload the running proxy process
    async fn reload(&self) -> Result<()>;
}

/// Drives the proxy binary (`nginx -t`, `nginx -s reload` by default)
pub struct ExecProxyControl {
    command: String,
    test_args: Vec<String>,
    reload_args: Vec<String>,
    timeout: Duration,
}

impl ExecProxyControl {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            command: config.command.clone(),
            test_args: config.test_args.clone(),
            reload_args: config.reload_args.clone(),
            timeout: Duration::from_secs(config.command_timeout_seconds),
        }
    }

    async fn run(&self, args: &[String], what: &str) -> Result<()> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.command).args(args).output(),
        )
        .await
        .map_err(|_| ExternalError::Timeout {
            operation: format!("proxy {}", what),
            seconds: self.timeout.as_secs(),
        })?
        .map_err(|e| ExternalError::ProxyControl {
            reason: format!("failed to run {} command: {}", what, e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExternalError::ProxyControl {
                reason: format!("{} failed ({}): {}", what, output.status, stderr.trim()),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyControlPlane for ExecProxyControl {
    async fn test_config(&self) -> Result<()> {
        self.run(&self.test_args, "config test").await
    }

    async fn reload(&self) -> Result<()> {
        self.run(&self.reload_args, "reload").await
    }
}

/// Server block proxying a domain to a container address.
///
/// Upgrade/Connection headers keep websockets and other bidirectional
/// streams working; buffering is off so long-lived responses flow through.
pub fn render_server_block(domain: &str, target_address: &str, port: u16) -> String {
    format!(
        r#"server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    location / {{
        proxy_pass http://{target_address}:{port};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_buffering off;
        proxy_read_timeout 300s;
    }}
}}
"#
    )
}

pub struct ProxyConfigGenerator {
    sites_dir: PathBuf,
    control: Arc<dyn ProxyControlPlane>,
}

impl ProxyConfigGenerator {
    pub fn new(config: &ProxyConfig, control: Arc<dyn ProxyControlPlane>) -> Self {
        Self {
            sites_dir: PathBuf::from(&config.sites_dir),
            control,
        }
    }

    fn site_file(&self, domain: &str) -> PathBuf {
        self.sites_dir.join(format!("{}.conf", domain))
    }

    /// Write a route, test the configuration, then reload.
    ///
    /// A failing test rolls the file write back: the proxy must never be
    /// reloaded with an unverified configuration.
    pub async fn add_service_route(
        &self,
        domain: &str,
        target_address: &str,
        port: u16,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.sites_dir).await?;
        let path = self.site_file(domain);
        let rendered = render_server_block(domain, target_address, port);
        tokio::fs::write(&path, rendered).await?;

        if let Err(test_err) = self.control.test_config().await {
            if let Err(rm_err) = tokio::fs::remove_file(&path).await {
                warn!(
                    "Failed to roll back proxy config {}: {}",
                    path.display(),
                    rm_err
                );
            }
            return Err(anyhow!(
                "Proxy config test failed for {}, file rolled back: {}",
                domain,
                test_err
            ));
        }

        self.control.reload().await?;
        info!(
            "Published proxy route {} -> {}:{}",
            domain, target_address, port
        );
        Ok(())
    }

    /// Delete a route and reload.
    ///
    /// The file is intent: once removed it stays removed, even if the
    /// reload afterwards fails.
    pub async fn remove_service_route(&self, domain: &str) -> Result<()> {
        let path = self.site_file(domain);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Proxy route {} already absent", domain);
                return Ok(());
            }
            Err(e) => return Err(anyhow!("Failed to remove proxy config {}: {}", domain, e)),
        }

        if let Err(e) = self.control.reload().await {
            warn!(
                "Proxy reload failed after removing {} (route stays removed): {}",
                domain, e
            );
            return Err(e);
        }
        info!("Removed proxy route {}", domain);
        Ok(())
    }

    /// Whether a route file currently exists
    pub async fn route_exists(&self, domain: &str) -> bool {
        tokio::fs::try_exists(self.site_file(domain))
            .await
            .unwrap_or(false)
    }
}
