//! IP and SSH port allocation for new containers.
//!
//! Addresses come from a flat configured pool; what is already held by a
//! non-terminated container (the database is the source of truth) is
//! skipped. Allocation runs under the per-subscription operation lock, so
//! two provisions never race on the same free slot.

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::config::NetworkConfig;
use crate::database::Database;

pub struct AddressAllocator {
    config: NetworkConfig,
}

impl AddressAllocator {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    /// Pick the lowest free (IP, SSH port) pair
    pub async fn allocate(&self, database: &Database) -> Result<(String, u16)> {
        let allocated = database.list_allocated_addresses().await?;
        let used_ips: std::collections::HashSet<&str> =
            allocated.iter().map(|(ip, _)| ip.as_str()).collect();
        let used_ports: std::collections::HashSet<i64> =
            allocated.iter().map(|(_, port)| *port).collect();

        let ip = (self.config.ip_host_min..=self.config.ip_host_max)
            .map(|host| format!("{}.{}", self.config.ip_prefix, host))
            .find(|candidate| !used_ips.contains(candidate.as_str()))
            .ok_or_else(|| anyhow!("IP pool {}.x is exhausted", self.config.ip_prefix))?;

        let port = (self.config.ssh_port_min..=self.config.ssh_port_max)
            .find(|candidate| !used_ports.contains(&(*candidate as i64)))
            .ok_or_else(|| {
                anyhow!(
                    "SSH port range {}-{} is exhausted",
                    self.config.ssh_port_min,
                    self.config.ssh_port_max
                )
            })?;

        debug!("Allocated address {} with SSH port {}", ip, port);
        Ok((ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn small_pool() -> NetworkConfig {
        NetworkConfig {
            ip_prefix: "10.9.0".to_string(),
            ip_host_min: 2,
            ip_host_max: 4,
            ssh_port_min: 2200,
            ssh_port_max: 2202,
        }
    }

    #[tokio::test]
    async fn test_allocates_lowest_free_pair() {
        let database = Database::new(":memory:").await.unwrap();
        let allocator = AddressAllocator::new(small_pool());

        let (ip, port) = allocator.allocate(&database).await.unwrap();
        assert_eq!(ip, "10.9.0.2");
        assert_eq!(port, 2200);
    }

    #[tokio::test]
    async fn test_skips_held_addresses_and_exhausts() {
        let database = Database::new(":memory:").await.unwrap();
        let allocator = AddressAllocator::new(small_pool());

        // Subscriptions are irrelevant to the allocator; container rows hold
        // the addresses
        for i in 0..3 {
            let sub = database
                .create_subscription(&crate::database::NewSubscription {
                    customer_id: 1,
                    plan_id: 1,
                    billing_cycle: crate::state::BillingCycle::Monthly,
                    start_date: chrono::Utc::now().date_naive(),
                    is_trial: false,
                    auto_renew: true,
                    custom_image_id: None,
                })
                .await
                .unwrap();
            let (ip, port) = allocator.allocate(&database).await.unwrap();
            database
                .create_container(sub.id, &ip, port as i64, &format!("vps-{}", i), "/tmp/v")
                .await
                .unwrap();
        }

        // Pool of three is now gone
        assert!(allocator.allocate(&database).await.is_err());
    }
}
