//! bollard-backed implementation of [`ContainerRuntime`].

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::error::{HostError, Result};
use crate::runtime::{ContainerRuntime, ResourceStats, RuntimeState};

/// Container runtime backed by the Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

fn is_docker_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn parse_time(s: Option<&String>) -> Option<DateTime<Utc>> {
    let s = s?;
    // Docker reports a zero time for never-finished containers.
    if s.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn create_and_start(
        &self,
        name: &str,
        image: &str,
        env: HashMap<String, String>,
        internal_port: u16,
        host_port: u16,
    ) -> Result<String> {
        let env_vec: Vec<String> = env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let port_key = format!("{}/tcp", internal_port);
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some("bridge".to_string()),
            ..Default::default()
        };

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env_vec),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), config).await?;
        let container_id = response.id;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(container_id)
    }

    async fn stop(&self, id: &str, timeout_secs: i64) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: timeout_secs }))
            .await?;
        Ok(())
    }

    async fn remove(&self, id_or_name: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id_or_name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<RuntimeState> {
        let info = self.docker.inspect_container(id, None).await.map_err(|e| {
            if is_docker_not_found(&e) {
                HostError::NotFound {
                    what: "container",
                    id: id.to_string(),
                }
            } else {
                HostError::Docker(e)
            }
        })?;

        let mut state = RuntimeState::default();
        if let Some(s) = info.state {
            state.running = s.running.unwrap_or(false);
            state.paused = s.paused.unwrap_or(false);
            state.restarting = s.restarting.unwrap_or(false);
            state.exit_code = s.exit_code;
            state.started_at = parse_time(s.started_at.as_ref());
            state.finished_at = parse_time(s.finished_at.as_ref());
        }

        // First published host port, if any mapping exists.
        if let Some(settings) = info.network_settings {
            if let Some(ports) = settings.ports {
                state.host_port = ports
                    .values()
                    .flatten()
                    .flatten()
                    .filter_map(|b| b.host_port.as_ref())
                    .filter_map(|p| p.parse::<u16>().ok())
                    .next();
            }
        }

        Ok(state)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut out = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    out.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Error reading container logs: {}", e);
                }
            }
        }

        Ok(out)
    }

    async fn stats(&self, id: &str) -> Result<ResourceStats> {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };

        let mut stream = self.docker.stats(id, Some(options));

        // The first sample carries zeroed precpu figures; the second sample
        // embeds the first as precpu_stats, which is what the delta needs.
        let _first = stream.next().await;
        let sample = match stream.next().await {
            Some(Ok(s)) => s,
            Some(Err(e)) => return Err(HostError::Docker(e)),
            None => {
                return Err(HostError::Runtime {
                    reason: "stats stream ended before a usable sample".to_string(),
                })
            }
        };

        let cpu_delta = sample
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(sample.precpu_stats.cpu_usage.total_usage);
        let system_delta = sample
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(sample.precpu_stats.system_cpu_usage.unwrap_or(0));
        let online_cpus = sample.cpu_stats.online_cpus.unwrap_or(1).max(1);

        let cpu_percent = if system_delta > 0 {
            (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0
        } else {
            0.0
        };

        Ok(ResourceStats {
            cpu_percent,
            memory_usage_bytes: sample.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: sample.memory_stats.limit.unwrap_or(0),
        })
    }
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults() {
        if docker.ping().await.is_ok() {
            return Ok(docker);
        }
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
            {
                if docker.ping().await.is_ok() {
                    return Ok(docker);
                }
            }
        }
    }

    Err(HostError::Config {
        reason: "Docker daemon not reachable (socket not found: /var/run/docker.sock)".to_string(),
    })
}
