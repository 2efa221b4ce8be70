//! Shared fixtures: fake control planes, a fake container runtime, and
//! helpers to build a test configuration around temp directories.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use orchestrator::config::{
    BackupConfig, BillingConfig, Config, DnsConfig, ImageConfig, MetricsConfig, NetworkConfig,
    ProxyConfig, RuntimeConfig, ScheduleConfig,
};
use orchestrator::database::{Database, NewPlan, NewSubscription, Plan, Subscription};
use orchestrator::dns::DnsControlPlane;
use orchestrator::proxy::ProxyControlPlane;
use orchestrator::runtime::{ContainerRuntime, ContainerSpec, RuntimeStats, RuntimeStatus};
use orchestrator::state::BillingCycle;

/// Build a config whose writable paths all live under the given temp dir
pub fn test_config(root: &std::path::Path) -> Config {
    let p = |name: &str| root.join(name).to_string_lossy().to_string();
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        base_domain: "vps.example-host.net".to_string(),
        operator_webhook_url: String::new(),
        runtime: RuntimeConfig {
            volumes_dir: p("volumes"),
            request_timeout_seconds: 5,
            build_timeout_seconds: 30,
            provision_wait_seconds: 5,
        },
        network: NetworkConfig {
            ip_prefix: "10.66.0".to_string(),
            ip_host_min: 2,
            ip_host_max: 250,
            ssh_port_min: 2200,
            ssh_port_max: 2400,
        },
        dns: DnsConfig {
            zone_dir: p("zones"),
            config_dir: p("zones.d"),
            reload_url: "http://127.0.0.1:1/reload".to_string(),
            health_url: "http://127.0.0.1:1/health".to_string(),
            reload_timeout_seconds: 2,
            default_ttl: 3600,
            nameservers: vec![
                "ns1.example-host.net".to_string(),
                "ns2.example-host.net".to_string(),
            ],
            soa_rname: "hostmaster.example-host.net".to_string(),
        },
        proxy: ProxyConfig {
            sites_dir: p("sites-enabled"),
            command: "true".to_string(),
            test_args: vec![],
            reload_args: vec![],
            command_timeout_seconds: 5,
        },
        backup: BackupConfig {
            staging_dir: p("backups"),
            storage_dir: p("object-store"),
            upload_enabled: false,
            encrypt_uploads: true,
            daily_keep: 7,
            weekly_keep: 4,
            monthly_keep: 12,
        },
        billing: BillingConfig {
            minimum_charge: "0.01".to_string(),
            setup_fee_grace_days: 14,
            overdue_suspend_days: 7,
        },
        images: ImageConfig {
            max_archive_bytes: 1024 * 1024,
            scanner_command: None,
            scan_timeout_seconds: 10,
            worker_poll_seconds: 1,
        },
        metrics: MetricsConfig {
            sample_interval_seconds: 60,
            retention_days: 30,
        },
        schedules: ScheduleConfig::default(),
    }
}

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub async fn seed_plan(database: &Database, name: &str, monthly: &str, setup: &str) -> Plan {
    database
        .create_plan(&NewPlan {
            name: name.to_string(),
            cpu_cores: 2,
            memory_mb: 2048,
            storage_gb: 40,
            bandwidth_gb: 1000,
            monthly_price: dec(monthly),
            setup_fee: dec(setup),
            base_image: "debian:stable".to_string(),
        })
        .await
        .unwrap()
}

pub async fn seed_subscription(database: &Database, plan_id: i64) -> Subscription {
    database
        .create_subscription(&NewSubscription {
            customer_id: 7,
            plan_id,
            billing_cycle: BillingCycle::Monthly,
            start_date: Utc::now().date_naive(),
            is_trial: false,
            auto_renew: true,
            custom_image_id: None,
        })
        .await
        .unwrap()
}

// ============================================================================
// Fake container runtime
// ============================================================================

#[derive(Default)]
pub struct MockRuntimeState {
    pub containers: HashMap<String, RuntimeStatus>,
    pub created: Vec<ContainerSpec>,
    pub built_tags: Vec<String>,
}

pub struct MockRuntime {
    pub state: Mutex<MockRuntimeState>,
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_build: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockRuntimeState::default()),
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_build: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("runtime unavailable"));
        }
        let id = format!("rt-{}", uuid::Uuid::new_v4());
        let mut state = self.state.lock().await;
        state.containers.insert(id.clone(), RuntimeStatus::Stopped);
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start(&self, runtime_id: &str) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(anyhow!("start refused"));
        }
        let mut state = self.state.lock().await;
        match state.containers.get_mut(runtime_id) {
            Some(status) => {
                *status = RuntimeStatus::Running;
                Ok(())
            }
            None => Err(anyhow!("no such container")),
        }
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.containers.get_mut(runtime_id) {
            Some(status) => {
                *status = RuntimeStatus::Stopped;
                Ok(())
            }
            None => Err(anyhow!("no such container")),
        }
    }

    async fn restart(&self, runtime_id: &str) -> Result<()> {
        self.stop(runtime_id).await?;
        self.start(runtime_id).await
    }

    async fn remove(&self, runtime_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.containers.remove(runtime_id);
        Ok(())
    }

    async fn status(&self, runtime_id: &str) -> Result<RuntimeStatus> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .get(runtime_id)
            .copied()
            .unwrap_or(RuntimeStatus::Missing))
    }

    async fn stats(&self, runtime_id: &str) -> Result<RuntimeStats> {
        let state = self.state.lock().await;
        if !state.containers.contains_key(runtime_id) {
            return Err(anyhow!("no such container"));
        }
        Ok(RuntimeStats {
            cpu_percent: 12.5,
            memory_bytes: 256 * 1024 * 1024,
            net_rx_bytes: 1000,
            net_tx_bytes: 2000,
            block_read_bytes: 3000,
            block_write_bytes: 4000,
            process_count: 5,
        })
    }

    async fn build_image(
        &self,
        tag: &str,
        _context: Bytes,
        _build_args: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(anyhow!("build failed: base image unavailable"));
        }
        let mut state = self.state.lock().await;
        state.built_tags.push(tag.to_string());
        Ok(vec![
            "Step 1/3 : FROM debian:stable".to_string(),
            "Step 2/3 : USER app".to_string(),
            format!("Successfully tagged {}", tag),
        ])
    }
}

// ============================================================================
// Fake DNS / proxy control planes
// ============================================================================

pub struct FakeDnsControl {
    pub reloads: AtomicUsize,
    pub fail_reload: AtomicBool,
}

impl FakeDnsControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reloads: AtomicUsize::new(0),
            fail_reload: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl DnsControlPlane for FakeDnsControl {
    async fn reload(&self) -> Result<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(anyhow!("dns server refused reload"));
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

pub struct FakeProxyControl {
    pub tests: AtomicUsize,
    pub reloads: AtomicUsize,
    pub fail_test: AtomicBool,
    pub fail_reload: AtomicBool,
}

impl FakeProxyControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tests: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
            fail_test: AtomicBool::new(false),
            fail_reload: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ProxyControlPlane for FakeProxyControl {
    async fn test_config(&self) -> Result<()> {
        self.tests.fetch_add(1, Ordering::SeqCst);
        if self.fail_test.load(Ordering::SeqCst) {
            return Err(anyhow!("configuration test failed"));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(anyhow!("reload signal failed"));
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a gzipped tar archive in memory for upload tests
pub fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub const VALID_DOCKERFILE: &str =
    "FROM debian:stable\nRUN useradd -m app\nUSER app\nCMD [\"bash\"]\n";
