use super::Config;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: String) -> Result<Self> {
        let config = Self::load_configuration(&config_dir).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &str) -> Result<Config> {
        let main_config_path = format!("{}/main.toml", config_dir);
        let main_config_content = fs::read_to_string(&main_config_path)
            .await
            .map_err(|e| anyhow!("Failed to read main config {}: {}", main_config_path, e))?;

        let config: Config = toml::from_str(&main_config_content)
            .map_err(|e| anyhow!("Failed to parse main config: {}", e))?;

        Self::validate(&config)?;

        info!(
            "Configuration loaded from {} (base domain: {}, ip pool {}.{}-{}, ssh ports {}-{})",
            main_config_path,
            config.base_domain,
            config.network.ip_prefix,
            config.network.ip_host_min,
            config.network.ip_host_max,
            config.network.ssh_port_min,
            config.network.ssh_port_max
        );

        Ok(config)
    }

    fn validate(config: &Config) -> Result<()> {
        if config.base_domain.is_empty() {
            return Err(anyhow!("base_domain must not be empty"));
        }
        if config.network.ip_host_min >= config.network.ip_host_max {
            return Err(anyhow!(
                "network.ip_host_min must be below network.ip_host_max"
            ));
        }
        if config.network.ssh_port_min >= config.network.ssh_port_max {
            return Err(anyhow!(
                "network.ssh_port_min must be below network.ssh_port_max"
            ));
        }
        if config.dns.nameservers.is_empty() {
            return Err(anyhow!("dns.nameservers must list at least one server"));
        }
        Ok(())
    }
}
