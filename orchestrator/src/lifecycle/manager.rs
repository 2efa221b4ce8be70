//! Container lifecycle orchestration: provision, start/stop/reboot,
//! terminate.
//!
//! `provision` is idempotent per subscription and resumable after a failed
//! attempt: the ERROR container row keeps its allocated address and the
//! retry rebuilds the runtime container behind it. `terminate` is the only
//! irreversible transition and runs its de-provisioning steps even when the
//! container is already broken.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::billing;
use crate::config::Config;
use crate::constants::provisioning::WAIT_POLL_SECONDS;
use crate::database::{Container, Database, Plan, Subscription};
use crate::dns::DnsSyncService;
use crate::errors::InvariantError;
use crate::proxy::ProxyConfigGenerator;
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeStatus};
use crate::services::alert_service::{AlertService, AlertSeverity, AlertType};
use crate::state::{ContainerState, ImageState, SubscriptionState};

use super::allocator::AddressAllocator;

pub struct LifecycleManager {
    database: Arc<Database>,
    runtime: Arc<dyn ContainerRuntime>,
    dns_sync: Arc<DnsSyncService>,
    proxy: Arc<ProxyConfigGenerator>,
    alert_service: Arc<AlertService>,
    allocator: AddressAllocator,
    config: Arc<Config>,
}

impl LifecycleManager {
    pub fn new(
        database: Arc<Database>,
        runtime: Arc<dyn ContainerRuntime>,
        dns_sync: Arc<DnsSyncService>,
        proxy: Arc<ProxyConfigGenerator>,
        alert_service: Arc<AlertService>,
        config: Arc<Config>,
    ) -> Self {
        let allocator = AddressAllocator::new(config.network.clone());
        Self {
            database,
            runtime,
            dns_sync,
            proxy,
            alert_service,
            allocator,
            config,
        }
    }

    fn service_domain(&self, hostname: &str) -> String {
        format!("{}.{}", hostname, self.config.base_domain)
    }

    /// Resolve the image a subscription boots from, enforcing the custom
    /// image gates (completed, and approved where required)
    async fn resolve_boot_image(&self, subscription: &Subscription, plan: &Plan) -> Result<String> {
        let Some(image_id) = subscription.custom_image_id else {
            return Ok(plan.base_image.clone());
        };

        let image = self.database.get_image(image_id).await?;
        if image.deleted_at.is_some() {
            return Err(InvariantError::ImageNotEligible {
                image_id,
                reason: "image has been deleted".to_string(),
            }
            .into());
        }
        if image.state != ImageState::Completed {
            return Err(InvariantError::ImageNotEligible {
                image_id,
                reason: format!("image is in state {}", image.state),
            }
            .into());
        }
        if image.requires_approval && image.approved_at.is_none() {
            return Err(InvariantError::ImageNotEligible {
                image_id,
                reason: "image requires approval before use".to_string(),
            }
            .into());
        }
        image
            .image_tag
            .ok_or_else(|| anyhow!("Completed image {} has no tag", image_id))
    }

    /// Provision the container for a subscription.
    ///
    /// Safe to call again after a failure: an existing RUNNING/STOPPED
    /// container is returned as-is, a CREATING/ERROR row is resumed.
    pub async fn provision(&self, subscription_id: i64) -> Result<Container> {
        let subscription = self.database.get_subscription(subscription_id).await?;

        let subscription = match subscription.state {
            SubscriptionState::Pending => {
                self.database
                    .update_subscription_state(subscription_id, SubscriptionState::Provisioning)
                    .await?
            }
            SubscriptionState::Provisioning => subscription,
            other => {
                // Already past provisioning: idempotent success when the
                // container exists, otherwise a real inconsistency
                if let Some(container) = self.database.get_live_container(subscription_id).await? {
                    return Ok(container);
                }
                return Err(anyhow!(
                    "Subscription {} is {} but owns no container",
                    subscription_id,
                    other
                ));
            }
        };

        let plan = self.database.get_plan(subscription.plan_id).await?;
        let image = self.resolve_boot_image(&subscription, &plan).await?;

        let container = match self.database.get_live_container(subscription_id).await? {
            Some(existing) => match existing.state {
                ContainerState::Running | ContainerState::Stopped | ContainerState::Rebooting => {
                    return Ok(existing)
                }
                ContainerState::Creating | ContainerState::Error => existing,
                ContainerState::Terminated => unreachable!("live container cannot be terminated"),
            },
            None => {
                let (ip, ssh_port) = self.allocator.allocate(&self.database).await?;
                let hostname = format!("vps-{}", subscription_id);
                let volume_path = format!("{}/{}", self.config.runtime.volumes_dir, hostname);
                self.database
                    .create_container(subscription_id, &ip, ssh_port as i64, &hostname, &volume_path)
                    .await?
            }
        };

        match self
            .provision_steps(&subscription, &plan, &container, &image)
            .await
        {
            Ok(container) => {
                self.activate_subscription(&subscription, &plan).await?;
                if let Err(e) = self
                    .alert_service
                    .send_immediate_alert(
                        AlertType::Provisioning,
                        AlertSeverity::Info,
                        &container.hostname,
                        format!(
                            "Subscription {} provisioned as {} ({})",
                            subscription_id, container.hostname, container.ip_address
                        ),
                        None,
                    )
                    .await
                {
                    error!("Failed to send provisioning alert: {}", e);
                }
                Ok(container)
            }
            Err(e) => {
                // Leave the subscription in PROVISIONING and the container in
                // ERROR; the executor retries a bounded number of times
                if self.database.get_container(container.id).await?.state != ContainerState::Error {
                    if let Err(update_err) = self
                        .database
                        .update_container_state(container.id, ContainerState::Error)
                        .await
                    {
                        error!(
                            "Failed to mark container {} as ERROR: {}",
                            container.id, update_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn provision_steps(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        container: &Container,
        image: &str,
    ) -> Result<Container> {
        info!(
            "Provisioning container {} for subscription {} (image {})",
            container.hostname, subscription.id, image
        );

        // Step 1: make sure no half-created runtime container lingers
        if let Some(runtime_id) = &container.runtime_id {
            if let Err(e) = self.runtime.remove(runtime_id).await {
                warn!(
                    "Could not remove stale runtime container {}: {}",
                    runtime_id, e
                );
            }
        }

        // Step 2: data volume directory
        tokio::fs::create_dir_all(&container.volume_path).await?;

        // Step 3: create and start through the runtime API
        let spec = ContainerSpec {
            name: container.hostname.clone(),
            image: image.to_string(),
            hostname: container.hostname.clone(),
            ip_address: container.ip_address.clone(),
            ssh_port: container.ssh_port as u16,
            volume_path: container.volume_path.clone(),
            memory_mb: plan.memory_mb,
            cpu_cores: plan.cpu_cores,
            env: vec![format!("VPS_HOSTNAME={}", container.hostname)],
            labels: HashMap::from([
                ("orchestrator.subscription".to_string(), subscription.id.to_string()),
                ("orchestrator.customer".to_string(), subscription.customer_id.to_string()),
                ("orchestrator.plan".to_string(), plan.name.clone()),
            ]),
        };

        let runtime_id = self.runtime.create(&spec).await?;
        self.database
            .set_container_runtime_id(container.id, &runtime_id)
            .await?;
        self.runtime.start(&runtime_id).await?;

        // Step 4: wait bounded for the runtime to report running
        self.wait_for_running(&runtime_id, &container.hostname)
            .await?;

        // Step 5: publish the DNS record in the platform base zone
        self.publish_dns_record(&container.hostname, &container.ip_address)
            .await?;

        // Step 6: publish the proxy route
        self.proxy
            .add_service_route(
                &self.service_domain(&container.hostname),
                &container.ip_address,
                80,
            )
            .await?;

        // Step 7: the container row becomes RUNNING
        self.database.record_container_started(container.id).await?;
        let container = self
            .database
            .update_container_state(container.id, ContainerState::Running)
            .await?;

        info!(
            "Container {} is running at {} (ssh :{})",
            container.hostname, container.ip_address, container.ssh_port
        );
        Ok(container)
    }

    async fn wait_for_running(&self, runtime_id: &str, hostname: &str) -> Result<()> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.runtime.provision_wait_seconds);
        loop {
            match self.runtime.status(runtime_id).await? {
                RuntimeStatus::Running => return Ok(()),
                RuntimeStatus::Missing => {
                    return Err(anyhow!(
                        "Runtime lost container {} while waiting for start",
                        hostname
                    ))
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "Container {} did not reach running within {}s",
                    hostname,
                    self.config.runtime.provision_wait_seconds
                ));
            }
            tokio::time::sleep(Duration::from_secs(WAIT_POLL_SECONDS)).await;
        }
    }

    async fn publish_dns_record(&self, hostname: &str, ip_address: &str) -> Result<()> {
        let zone = self
            .database
            .get_zone_by_name(&self.config.base_domain)
            .await?
            .ok_or_else(|| anyhow!("Base zone '{}' is missing", self.config.base_domain))?;

        // Replace rather than duplicate on re-provisioning
        self.database
            .delete_system_record(zone.id, hostname, "A")
            .await?;
        self.database
            .create_dns_record(&crate::database::NewDnsRecord {
                zone_id: zone.id,
                name: hostname.to_string(),
                record_type: "A".to_string(),
                value: ip_address.to_string(),
                ttl: None,
                priority: None,
                weight: None,
                port: None,
                is_system: true,
            })
            .await?;

        self.dns_sync.sync_zone(zone.id).await
    }

    async fn remove_dns_record(&self, hostname: &str) -> Result<()> {
        let Some(zone) = self
            .database
            .get_zone_by_name(&self.config.base_domain)
            .await?
        else {
            return Ok(());
        };
        let removed = self
            .database
            .delete_system_record(zone.id, hostname, "A")
            .await?;
        if removed > 0 {
            self.dns_sync.sync_zone(zone.id).await?;
        }
        Ok(())
    }

    /// Activate the subscription and stamp its first billing period
    async fn activate_subscription(&self, subscription: &Subscription, plan: &Plan) -> Result<()> {
        let subscription = self.database.get_subscription(subscription.id).await?;
        if subscription.state == SubscriptionState::Active {
            return Ok(());
        }

        let today = Utc::now().date_naive();
        let next = billing::next_billing_date(today, subscription.billing_cycle);
        self.database
            .set_subscription_billing_dates(subscription.id, today, next)
            .await?;
        self.database
            .update_subscription_state(subscription.id, SubscriptionState::Active)
            .await?;

        if subscription.is_trial {
            info!(
                "Subscription {} activated on trial, no charges emitted",
                subscription.id
            );
            return Ok(());
        }

        let mut invoiced = BigDecimal::from(0);
        let zero = BigDecimal::from(0);
        if plan.setup_fee > zero {
            self.database
                .append_billing_event(
                    subscription.id,
                    "SETUP_FEE",
                    &plan.setup_fee,
                    &format!("Setup fee for plan '{}'", plan.name),
                    None,
                    None,
                )
                .await?;
            invoiced += &plan.setup_fee;
        }

        self.database
            .append_billing_event(
                subscription.id,
                "RECURRING",
                &plan.monthly_price,
                &format!("First billing period on plan '{}'", plan.name),
                Some(today),
                Some(next),
            )
            .await?;
        invoiced += &plan.monthly_price;

        self.database
            .add_subscription_invoiced(subscription.id, &invoiced)
            .await?;
        Ok(())
    }

    /// Start a stopped container
    pub async fn start(&self, container_id: i64) -> Result<()> {
        let container = self.database.get_container(container_id).await?;
        if container.state == ContainerState::Running {
            return Ok(());
        }
        crate::state::ensure_container_transition(container.state, ContainerState::Running)?;
        let runtime_id = container
            .runtime_id
            .as_deref()
            .ok_or_else(|| anyhow!("Container {} has no runtime id", container_id))?;

        self.runtime.start(runtime_id).await?;
        self.database.record_container_started(container_id).await?;
        self.database
            .update_container_state(container_id, ContainerState::Running)
            .await?;
        Ok(())
    }

    /// Stop a running container
    pub async fn stop(&self, container_id: i64) -> Result<()> {
        let container = self.database.get_container(container_id).await?;
        if container.state == ContainerState::Stopped {
            return Ok(());
        }
        crate::state::ensure_container_transition(container.state, ContainerState::Stopped)?;
        let runtime_id = container
            .runtime_id
            .as_deref()
            .ok_or_else(|| anyhow!("Container {} has no runtime id", container_id))?;

        self.runtime.stop(runtime_id).await?;
        self.database.record_container_stopped(container_id).await?;
        self.database
            .update_container_state(container_id, ContainerState::Stopped)
            .await?;
        Ok(())
    }

    /// Reboot a running container (REBOOTING is transient)
    pub async fn reboot(&self, container_id: i64) -> Result<()> {
        let container = self.database.get_container(container_id).await?;
        crate::state::ensure_container_transition(container.state, ContainerState::Rebooting)?;
        let runtime_id = container
            .runtime_id
            .clone()
            .ok_or_else(|| anyhow!("Container {} has no runtime id", container_id))?;

        self.database
            .update_container_state(container_id, ContainerState::Rebooting)
            .await?;

        match self.runtime.restart(&runtime_id).await {
            Ok(()) => {
                self.database.record_container_stopped(container_id).await?;
                self.database.record_container_started(container_id).await?;
                self.database
                    .update_container_state(container_id, ContainerState::Running)
                    .await?;
                Ok(())
            }
            Err(e) => {
                // A failed restart leaves the runtime state unknown
                if let Err(update_err) = self
                    .database
                    .update_container_state(container_id, ContainerState::Error)
                    .await
                {
                    error!(
                        "Failed to mark container {} as ERROR after reboot failure: {}",
                        container_id, update_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Terminate a container and its subscription: the only irreversible
    /// transition. De-provisions the proxy route and DNS record too, and is
    /// expected to succeed even when the container is already in ERROR.
    pub async fn terminate(&self, container_id: i64) -> Result<()> {
        let container = self.database.get_container(container_id).await?;
        if container.state == ContainerState::Terminated {
            return Ok(());
        }
        let subscription = self
            .database
            .get_subscription(container.subscription_id)
            .await?;

        info!(
            "Terminating container {} (subscription {})",
            container.hostname, subscription.id
        );

        // De-provisioning steps are best-effort: a broken runtime or proxy
        // must not leave the subscription stuck forever
        if let Err(e) = self
            .proxy
            .remove_service_route(&self.service_domain(&container.hostname))
            .await
        {
            warn!(
                "Proxy route removal failed for {} during terminate: {}",
                container.hostname, e
            );
        }

        if let Err(e) = self.remove_dns_record(&container.hostname).await {
            warn!(
                "DNS record removal failed for {} during terminate: {}",
                container.hostname, e
            );
        }

        if let Some(runtime_id) = &container.runtime_id {
            if let Err(e) = self.runtime.remove(runtime_id).await {
                warn!(
                    "Runtime removal failed for {} during terminate: {}",
                    container.hostname, e
                );
            }
        }

        if container.state == ContainerState::Running {
            self.database.record_container_stopped(container_id).await?;
        }
        self.database
            .update_container_state(container_id, ContainerState::Terminated)
            .await?;
        if !subscription.state.is_terminal() {
            self.database
                .update_subscription_state(subscription.id, SubscriptionState::Terminated)
                .await?;
        }

        if let Err(e) = self
            .alert_service
            .send_immediate_alert(
                AlertType::ContainerLifecycle,
                AlertSeverity::Info,
                &container.hostname,
                format!(
                    "Container {} terminated (subscription {})",
                    container.hostname, subscription.id
                ),
                None,
            )
            .await
        {
            error!("Failed to send termination alert: {}", e);
        }

        Ok(())
    }
}
