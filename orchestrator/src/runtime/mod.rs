//! Narrow interface over the container runtime's administrative API.
//!
//! The orchestration logic only ever talks to [`ContainerRuntime`]; tests
//! inject a fake implementation, production wires up [`DockerRuntime`].

pub mod docker;

pub use docker::DockerRuntime;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Everything the runtime needs to create one customer container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Runtime-side container name, unique per live container
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub ip_address: String,
    /// Host port published onto the container's SSH port
    pub ssh_port: u16,
    /// Host directory mounted as the container's data volume
    pub volume_path: String,
    pub memory_mb: i64,
    pub cpu_cores: i64,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Runtime-reported container state, reduced to what orchestration needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Running,
    Stopped,
    Restarting,
    /// The runtime has no container under this id
    Missing,
    Unknown,
}

/// One stats sample as reported by the runtime
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub process_count: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from the spec; returns the runtime-assigned id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, runtime_id: &str) -> Result<()>;

    async fn stop(&self, runtime_id: &str) -> Result<()>;

    async fn restart(&self, runtime_id: &str) -> Result<()>;

    /// Force-remove the container; callers treat a missing container as
    /// already removed
    async fn remove(&self, runtime_id: &str) -> Result<()>;

    async fn status(&self, runtime_id: &str) -> Result<RuntimeStatus>;

    async fn stats(&self, runtime_id: &str) -> Result<RuntimeStats>;

    /// Build an image from an uploaded build context (gzipped tar); returns
    /// the engine's output lines
    async fn build_image(
        &self,
        tag: &str,
        context: Bytes,
        build_args: &HashMap<String, String>,
    ) -> Result<Vec<String>>;
}
