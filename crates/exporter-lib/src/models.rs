//! Core data models for the exporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of Docker object a target refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Container,
    Volume,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Container => "container",
            TargetKind::Volume => "volume",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a container or volume discovered in a collection cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    /// Docker object ID (volumes are identified by name)
    pub id: String,
    /// Human-readable name, without the leading slash Docker adds to containers
    pub name: String,
}

impl TargetRef {
    pub fn container(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Container,
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn volume(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: TargetKind::Volume,
            id: name.clone(),
            name,
        }
    }
}

/// Label name to label value mapping, iterated in lexicographic key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label, replacing any previous value under the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Copy every label of `other` that is not already present
    pub fn extend_missing(&mut self, other: &LabelSet) {
        for (name, value) in other.iter() {
            self.0
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Where Prometheus should scrape a target's own metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeHint {
    pub port: String,
    pub host: Option<String>,
}

/// Result of parsing a target's registration labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub job_name: String,
    pub extra_labels: LabelSet,
    pub scrape: Option<ScrapeHint>,
}

/// A published container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// A container as reported by the daemon's list endpoint
#[derive(Debug, Clone)]
pub struct DiscoveredContainer {
    pub target: TargetRef,
    pub labels: HashMap<String, String>,
    pub image: String,
    pub image_id: String,
    pub ports: Vec<PortBinding>,
}

/// A volume as reported by the daemon's list endpoint
#[derive(Debug, Clone)]
pub struct DiscoveredVolume {
    pub target: TargetRef,
    pub labels: HashMap<String, String>,
}

/// A single point-in-time reading of a container
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    /// When the reading was taken
    pub taken_at: DateTime<Utc>,
    /// Cumulative container CPU time in nanoseconds
    pub cpu_total: u64,
    /// Cumulative host CPU time in nanoseconds, if the daemon reported it
    pub system_cpu: Option<u64>,
    pub memory_usage: u64,
    pub memory_cache: u64,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub size_root_fs: Option<u64>,
    pub size_rw: Option<u64>,
    pub mount_count: usize,
}

/// Metrics derived by the exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    ContainerMemoryUsage,
    ContainerCpuUsage,
    ContainerUptime,
    ContainerRootfsSize,
    ContainerDiskSize,
    ContainerMountCount,
    VolumeSize,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::ContainerMemoryUsage,
        MetricKind::ContainerCpuUsage,
        MetricKind::ContainerUptime,
        MetricKind::ContainerRootfsSize,
        MetricKind::ContainerDiskSize,
        MetricKind::ContainerMountCount,
        MetricKind::VolumeSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::ContainerMemoryUsage => "docker_container_memory_usage_bytes",
            MetricKind::ContainerCpuUsage => "docker_container_cpu_usage_percent",
            MetricKind::ContainerUptime => "docker_container_uptime_seconds",
            MetricKind::ContainerRootfsSize => "docker_container_rootfs_size_bytes",
            MetricKind::ContainerDiskSize => "docker_container_disk_size_bytes",
            MetricKind::ContainerMountCount => "docker_container_mount_count",
            MetricKind::VolumeSize => "docker_volume_size_bytes",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            MetricKind::ContainerMemoryUsage => "Container memory usage (without caches)",
            MetricKind::ContainerCpuUsage => "Container CPU usage percent of total host CPU time",
            MetricKind::ContainerUptime => "Container uptime",
            MetricKind::ContainerRootfsSize => "Container rootfs size in bytes",
            MetricKind::ContainerDiskSize => "Container size on disk in bytes",
            MetricKind::ContainerMountCount => "Number of container mounts",
            MetricKind::VolumeSize => "Size of a volume in bytes",
        }
    }
}

/// One labeled metric value
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub metric: MetricKind,
    pub labels: LabelSet,
    pub value: f64,
}

/// Prometheus HTTP service discovery entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub targets: Vec<String>,
    pub labels: LabelSet,
}

/// Complete output of one collection cycle
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Cycle sequence number, 0 for the initial empty snapshot
    pub cycle: u64,
    pub taken_at: Option<DateTime<Utc>>,
    pub points: Vec<MetricPoint>,
    pub targets: Vec<ScrapeTarget>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points of one metric, in snapshot order
    pub fn points_for(&self, metric: MetricKind) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter().filter(move |p| p.metric == metric)
    }
}
