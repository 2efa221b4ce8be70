//! Docker Engine implementation of [`ContainerRuntime`] via bollard.
//!
//! Every call is bounded by the configured request timeout; the engine is a
//! shared external process and must never hang an orchestration task.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    RestartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::provisioning::STOP_GRACE_SECONDS;
use crate::errors::ExternalError;

use super::{ContainerRuntime, ContainerSpec, RuntimeStats, RuntimeStatus};

pub struct DockerRuntime {
    docker: Docker,
    request_timeout: Duration,
    build_timeout: Duration,
}

impl DockerRuntime {
    pub fn new(request_timeout_seconds: u64, build_timeout_seconds: u64) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow!("Failed to connect to container runtime: {}", e))?;
        Ok(Self {
            docker,
            request_timeout: Duration::from_secs(request_timeout_seconds),
            build_timeout: Duration::from_secs(build_timeout_seconds),
        })
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                anyhow::Error::from(ExternalError::Timeout {
                    operation: format!("runtime {}", operation),
                    seconds: self.request_timeout.as_secs(),
                })
            })?
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    port_bindings.insert(
        "22/tcp".to_string(),
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(spec.ssh_port.to_string()),
        }]),
    );

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    exposed_ports.insert("22/tcp".to_string(), HashMap::new());
    exposed_ports.insert("80/tcp".to_string(), HashMap::new());

    Config {
        image: Some(spec.image.clone()),
        hostname: Some(spec.hostname.clone()),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            memory: Some(spec.memory_mb * 1024 * 1024),
            nano_cpus: Some(spec.cpu_cores * 1_000_000_000),
            binds: Some(vec![format!("{}:/data", spec.volume_path)]),
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = container_config(spec);

        let response = self
            .bounded("create", async {
                self.docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| {
                        anyhow::Error::from(ExternalError::Runtime {
                            operation: "create".to_string(),
                            reason: e.to_string(),
                        })
                    })
            })
            .await?;

        for warning in &response.warnings {
            warn!("Runtime warning creating {}: {}", spec.name, warning);
        }
        info!("Created runtime container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, runtime_id: &str) -> Result<()> {
        self.bounded("start", async {
            self.docker
                .start_container::<String>(runtime_id, None)
                .await
                .map_err(|e| {
                    anyhow::Error::from(ExternalError::Runtime {
                        operation: "start".to_string(),
                        reason: e.to_string(),
                    })
                })
        })
        .await
    }

    async fn stop(&self, runtime_id: &str) -> Result<()> {
        // The stop grace period is handled by the engine; bound the call a
        // little beyond it
        let fut = self.docker.stop_container(
            runtime_id,
            Some(StopContainerOptions {
                t: STOP_GRACE_SECONDS,
            }),
        );
        tokio::time::timeout(
            self.request_timeout + Duration::from_secs(STOP_GRACE_SECONDS as u64),
            fut,
        )
        .await
        .map_err(|_| anyhow!("Runtime 'stop' timed out"))?
        .map_err(|e| {
            anyhow::Error::from(ExternalError::Runtime {
                operation: "stop".to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn restart(&self, runtime_id: &str) -> Result<()> {
        let fut = self.docker.restart_container(
            runtime_id,
            Some(RestartContainerOptions {
                t: STOP_GRACE_SECONDS as isize,
            }),
        );
        tokio::time::timeout(
            self.request_timeout + Duration::from_secs(STOP_GRACE_SECONDS as u64),
            fut,
        )
        .await
        .map_err(|_| anyhow!("Runtime 'restart' timed out"))?
        .map_err(|e| {
            anyhow::Error::from(ExternalError::Runtime {
                operation: "restart".to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn remove(&self, runtime_id: &str) -> Result<()> {
        let result = self
            .bounded("remove", async {
                self.docker
                    .remove_container(
                        runtime_id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
                    .map_err(|e| {
                        anyhow::Error::from(ExternalError::Runtime {
                            operation: "remove".to_string(),
                            reason: e.to_string(),
                        })
                    })
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            // A 404 means the container is already gone, which is the goal
            Err(e) if e.to_string().contains("404") => {
                debug!("Container {} already absent from runtime", runtime_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn status(&self, runtime_id: &str) -> Result<RuntimeStatus> {
        let inspect = self
            .bounded("inspect", async {
                Ok(self
                    .docker
                    .inspect_container(runtime_id, None::<InspectContainerOptions>)
                    .await)
            })
            .await?;

        let inspect = match inspect {
            Ok(i) => i,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(RuntimeStatus::Missing),
            Err(e) => {
                return Err(ExternalError::Runtime {
                    operation: "inspect".to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };

        let status = inspect
            .state
            .and_then(|s| s.status)
            .unwrap_or(ContainerStateStatusEnum::EMPTY);

        Ok(match status {
            ContainerStateStatusEnum::RUNNING => RuntimeStatus::Running,
            ContainerStateStatusEnum::CREATED
            | ContainerStateStatusEnum::EXITED
            | ContainerStateStatusEnum::PAUSED => RuntimeStatus::Stopped,
            ContainerStateStatusEnum::RESTARTING => RuntimeStatus::Restarting,
            ContainerStateStatusEnum::REMOVING | ContainerStateStatusEnum::DEAD => {
                RuntimeStatus::Missing
            }
            _ => RuntimeStatus::Unknown,
        })
    }

    async fn stats(&self, runtime_id: &str) -> Result<RuntimeStats> {
        let stats = self
            .bounded("stats", async {
                let mut stream = self.docker.stats(
                    runtime_id,
                    Some(StatsOptions {
                        stream: false,
                        one_shot: true,
                    }),
                );
                stream
                    .next()
                    .await
                    .ok_or_else(|| anyhow!("stats stream returned nothing"))?
                    .map_err(|e| {
                        anyhow::Error::from(ExternalError::Runtime {
                            operation: "stats".to_string(),
                            reason: e.to_string(),
                        })
                    })
            })
            .await?;

        // CPU percentage from the usage delta, the way the engine CLI does it
        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
            - stats.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
        let cpu_percent = if system_delta > 0.0 && cpu_delta >= 0.0 {
            (cpu_delta / system_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        let (net_rx, net_tx) = stats
            .networks
            .as_ref()
            .map(|nets| {
                nets.values()
                    .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
            })
            .unwrap_or((0, 0));

        let (block_read, block_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|entries| {
                entries.iter().fold((0u64, 0u64), |(read, write), e| {
                    match e.op.to_ascii_lowercase().as_str() {
                        "read" => (read + e.value, write),
                        "write" => (read, write + e.value),
                        _ => (read, write),
                    }
                })
            })
            .unwrap_or((0, 0));

        Ok(RuntimeStats {
            cpu_percent,
            memory_bytes: stats.memory_stats.usage.unwrap_or(0),
            net_rx_bytes: net_rx,
            net_tx_bytes: net_tx,
            block_read_bytes: block_read,
            block_write_bytes: block_write,
            process_count: stats.pids_stats.current.unwrap_or(0),
        })
    }

    async fn build_image(
        &self,
        tag: &str,
        context: Bytes,
        build_args: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            buildargs: build_args.clone(),
            rm: true,
            ..Default::default()
        };

        let build = async {
            let mut stream = self.docker.build_image(options, None, Some(context));
            let mut lines = Vec::new();
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| anyhow!("build stream error: {}", e))?;
                if let Some(line) = info.stream {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                }
                if let Some(err) = info.error {
                    return Err(anyhow!("build failed: {}", err));
                }
            }
            Ok(lines)
        };

        tokio::time::timeout(self.build_timeout, build)
            .await
            .map_err(|_| {
                anyhow!(
                    "Image build for '{}' timed out after {}s",
                    tag,
                    self.build_timeout.as_secs()
                )
            })?
    }
}
