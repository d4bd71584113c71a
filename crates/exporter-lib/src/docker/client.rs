//! [`DockerApi`] backed by the Docker Engine API through bollard

use super::du::VolumeWalks;
use super::error::{DockerError, Result};
use super::DockerApi;
use crate::labels::JOB_LABEL;
use crate::models::{
    DiscoveredContainer, DiscoveredVolume, PortBinding, ResourceSample, TargetRef,
};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, MemoryStatsStats, Stats, StatsOptions,
};
use bollard::models::{ContainerSummary, Port, PortTypeEnum};
use bollard::volume::ListVolumesOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for [`BollardClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Daemon endpoint (`unix://...`, `tcp://...`, `http://...`); local defaults when unset
    pub docker_host: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Prefix prepended to volume mount points before walking them
    pub volume_path_prefix: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            docker_host: None,
            timeout: Duration::from_secs(30),
            volume_path_prefix: None,
        }
    }
}

/// Docker daemon client
pub struct BollardClient {
    docker: Docker,
    volume_path_prefix: Option<PathBuf>,
    walks: VolumeWalks,
}

impl BollardClient {
    /// Connect to the daemon
    ///
    /// Connecting is lazy; an unreachable daemon only surfaces on the first request.
    pub fn connect(options: &ClientOptions) -> Result<Self> {
        let timeout = options.timeout.as_secs().max(1);

        let docker = match options.docker_host.as_deref() {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION)?
            }
            Some(host) => Docker::connect_with_socket(host, timeout, API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?.with_timeout(options.timeout),
        };

        info!(
            docker_host = options.docker_host.as_deref().unwrap_or("local defaults"),
            "Configured docker client"
        );

        Ok(Self {
            docker,
            volume_path_prefix: options.volume_path_prefix.clone(),
            walks: VolumeWalks::new(),
        })
    }

    /// Map a daemon-reported mount point into the local filesystem
    fn local_mount_path(&self, mountpoint: &str) -> PathBuf {
        match &self.volume_path_prefix {
            Some(prefix) => prefix.join(mountpoint.trim_start_matches('/')),
            None => PathBuf::from(mountpoint),
        }
    }

    async fn read_stats(&self, id: &str) -> Result<Stats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = std::pin::pin!(self.docker.stats(id, Some(options)));

        match stream.next().await {
            Some(stats) => Ok(stats?),
            None => Err(DockerError::Api(format!("empty stats stream for {id}"))),
        }
    }
}

/// Only registered objects are of interest; the label parser still has the final say
fn job_filter() -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![JOB_LABEL.to_string()])])
}

fn container_name(summary: &ContainerSummary) -> String {
    summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

fn port_binding(port: &Port) -> PortBinding {
    let protocol = match port.typ {
        Some(PortTypeEnum::UDP) => "udp",
        Some(PortTypeEnum::SCTP) => "sctp",
        _ => "tcp",
    };

    PortBinding {
        private_port: port.private_port,
        public_port: port.public_port,
        protocol: protocol.to_string(),
        host_ip: port.ip.clone().filter(|ip| !ip.is_empty()),
    }
}

/// Cache bytes from either cgroup flavour
fn memory_cache(stats: &Stats) -> u64 {
    match &stats.memory_stats.stats {
        Some(MemoryStatsStats::V1(v1)) => v1.cache,
        Some(MemoryStatsStats::V2(v2)) => v2.file,
        None => 0,
    }
}

/// Docker reports `0001-01-01T00:00:00Z` for containers that never started
fn parse_started_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw?).ok()?.with_timezone(&Utc);
    (parsed.timestamp() > 0).then_some(parsed)
}

fn non_negative(size: Option<i64>) -> Option<u64> {
    size.and_then(|s| u64::try_from(s).ok())
}

#[async_trait]
impl DockerApi for BollardClient {
    async fn list_containers(&self) -> Result<Vec<DiscoveredContainer>> {
        let options = ListContainersOptions {
            all: true,
            filters: job_filter(),
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;

        let containers = summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id.clone()?;
                let name = container_name(&summary);
                Some(DiscoveredContainer {
                    target: TargetRef::container(id, name),
                    image: summary.image.clone().unwrap_or_default(),
                    image_id: summary.image_id.clone().unwrap_or_default(),
                    ports: summary
                        .ports
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .map(port_binding)
                        .collect(),
                    labels: summary.labels.unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>();

        debug!(count = containers.len(), "Listed containers");
        Ok(containers)
    }

    async fn list_volumes(&self) -> Result<Vec<DiscoveredVolume>> {
        let options = ListVolumesOptions {
            filters: job_filter(),
        };

        let response = self.docker.list_volumes(Some(options)).await?;

        let volumes = response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| DiscoveredVolume {
                target: TargetRef::volume(volume.name),
                labels: volume.labels,
            })
            .collect::<Vec<_>>();

        debug!(count = volumes.len(), "Listed volumes");
        Ok(volumes)
    }

    async fn sample_container(&self, target: &TargetRef) -> Result<ResourceSample> {
        let inspect = self
            .docker
            .inspect_container(&target.id, Some(InspectContainerOptions { size: true }))
            .await?;
        let stats = self.read_stats(&target.id).await?;

        let state = inspect.state.as_ref();
        let running = state.and_then(|s| s.running).unwrap_or(false);
        let started_at = parse_started_at(state.and_then(|s| s.started_at.as_deref()));

        Ok(ResourceSample {
            taken_at: Utc::now(),
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage,
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_cache: memory_cache(&stats),
            running,
            started_at,
            size_root_fs: non_negative(inspect.size_root_fs),
            size_rw: non_negative(inspect.size_rw),
            mount_count: inspect.mounts.as_ref().map_or(0, Vec::len),
        })
    }

    async fn volume_disk_usage(&self, target: &TargetRef) -> Result<u64> {
        let volume = self.docker.inspect_volume(&target.name).await?;
        let path = self.local_mount_path(&volume.mountpoint);

        debug!(volume = %target.name, path = %path.display(), "Walking volume");

        self.walks.size(&target.name, path).await
    }

    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_started_at() {
        let parsed = parse_started_at(Some("2024-03-01T12:00:00.123456789Z")).unwrap();
        assert_eq!(parsed.timestamp(), 1_709_294_400);

        assert!(parse_started_at(Some("0001-01-01T00:00:00Z")).is_none());
        assert!(parse_started_at(Some("not a date")).is_none());
        assert!(parse_started_at(None).is_none());
    }

    #[test]
    fn test_container_name_strips_slash() {
        let summary = ContainerSummary {
            names: Some(vec!["/postgres".to_string(), "/alias".to_string()]),
            ..Default::default()
        };
        assert_eq!(container_name(&summary), "postgres");
        assert_eq!(container_name(&ContainerSummary::default()), "");
    }

    #[test]
    fn test_port_binding() {
        let port = Port {
            ip: Some("0.0.0.0".to_string()),
            private_port: 9100,
            public_port: Some(19100),
            typ: Some(PortTypeEnum::TCP),
        };
        let binding = port_binding(&port);
        assert_eq!(binding.protocol, "tcp");
        assert_eq!(binding.public_port, Some(19100));
        assert_eq!(binding.host_ip.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn test_non_negative_sizes() {
        assert_eq!(non_negative(Some(42)), Some(42));
        assert_eq!(non_negative(Some(-1)), None);
        assert_eq!(non_negative(None), None);
    }
}
