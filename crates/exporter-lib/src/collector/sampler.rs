//! Metric derivation
//!
//! Turns raw container readings and volume sizes into labeled metric points.
//! CPU usage is a rate, so the previous reading of each container is kept in
//! a [`SampleHistory`] between collection cycles.

use crate::labels::{base_labels, reserved};
use crate::models::{
    DiscoveredContainer, LabelSet, MetricKind, MetricPoint, RegistrationInfo, ResourceSample,
    TargetRef,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Last reading per container, kept only to compute the next CPU delta
#[derive(Debug, Default)]
pub struct SampleHistory {
    samples: HashMap<String, ResourceSample>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newest reading, returning the one it supersedes
    pub fn observe(&mut self, container_id: &str, sample: ResourceSample) -> Option<ResourceSample> {
        self.samples.insert(container_id.to_string(), sample)
    }

    /// Drop readings of containers that were not discovered in the latest cycle
    pub fn retain(&mut self, live_ids: &HashSet<String>) -> usize {
        let before = self.samples.len();
        self.samples.retain(|id, _| live_ids.contains(id));
        before - self.samples.len()
    }

    pub fn get(&self, container_id: &str) -> Option<&ResourceSample> {
        self.samples.get(container_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// CPU usage in percent of total host CPU time between two readings
///
/// Returns `None` whenever the readings cannot produce a meaningful rate.
pub fn cpu_usage_percent(prev: Option<&ResourceSample>, cur: &ResourceSample) -> Option<f64> {
    let prev = prev?;
    if cur.taken_at <= prev.taken_at {
        return None;
    }

    let system_delta = cur.system_cpu?.checked_sub(prev.system_cpu?)?;
    if system_delta == 0 {
        return None;
    }

    // A shrinking counter means the container restarted between readings
    let cpu_delta = cur.cpu_total.checked_sub(prev.cpu_total)?;

    Some(100.0 * cpu_delta as f64 / system_delta as f64)
}

/// Memory usage without reclaimable cache, never negative
pub fn memory_usage_bytes(sample: &ResourceSample) -> u64 {
    sample.memory_usage.saturating_sub(sample.memory_cache)
}

/// Seconds since the container started, 0 unless it is running
pub fn uptime_seconds(sample: &ResourceSample, now: DateTime<Utc>) -> f64 {
    match (sample.running, sample.started_at) {
        (true, Some(started_at)) => {
            let elapsed = now.signed_duration_since(started_at);
            (elapsed.num_milliseconds().max(0) as f64) / 1000.0
        }
        _ => 0.0,
    }
}

/// Labels shared by every metric of a container
pub fn container_labels(registration: &RegistrationInfo, container: &DiscoveredContainer) -> LabelSet {
    let mut labels = base_labels(registration);
    labels.insert(reserved::CONTAINER_NAME, container.target.name.clone());
    labels.insert(reserved::CONTAINER_ID, container.target.id.clone());
    labels.insert(reserved::IMAGE, container.image.clone());
    labels.insert(reserved::IMAGE_ID, container.image_id.clone());
    labels
}

/// Derive all container metrics from the current and previous readings
pub fn container_points(
    labels: &LabelSet,
    prev: Option<&ResourceSample>,
    cur: &ResourceSample,
    now: DateTime<Utc>,
) -> Vec<MetricPoint> {
    let mut points = Vec::with_capacity(6);
    let mut push = |metric: MetricKind, value: f64| {
        points.push(MetricPoint {
            metric,
            labels: labels.clone(),
            value,
        });
    };

    push(MetricKind::ContainerMemoryUsage, memory_usage_bytes(cur) as f64);

    if let Some(cpu) = cpu_usage_percent(prev, cur) {
        push(MetricKind::ContainerCpuUsage, cpu);
    }

    push(MetricKind::ContainerUptime, uptime_seconds(cur, now));

    if let Some(size) = cur.size_root_fs {
        push(MetricKind::ContainerRootfsSize, size as f64);
    }

    if let Some(size) = cur.size_rw {
        push(MetricKind::ContainerDiskSize, size as f64);
    }

    push(MetricKind::ContainerMountCount, cur.mount_count as f64);

    points
}

/// Derive the volume size metric
pub fn volume_point(labels: LabelSet, size_bytes: u64) -> MetricPoint {
    MetricPoint {
        metric: MetricKind::VolumeSize,
        labels,
        value: size_bytes as f64,
    }
}

/// Registered volume paired with its derived labels, before disambiguation
#[derive(Debug, Clone)]
pub struct VolumeLabels {
    pub target: TargetRef,
    pub labels: LabelSet,
}

/// Add `volume_name` to volumes whose labels would otherwise collide
pub fn disambiguate_volumes(volumes: &mut [VolumeLabels]) {
    let mut counts: HashMap<LabelSet, usize> = HashMap::new();
    for volume in volumes.iter() {
        *counts.entry(volume.labels.clone()).or_default() += 1;
    }

    for volume in volumes.iter_mut() {
        if counts.get(&volume.labels).copied().unwrap_or(0) > 1 {
            volume
                .labels
                .insert(reserved::VOLUME_NAME, volume.target.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(cpu: u64, system: u64, at: DateTime<Utc>) -> ResourceSample {
        ResourceSample {
            taken_at: at,
            cpu_total: cpu,
            system_cpu: Some(system),
            memory_usage: 0,
            memory_cache: 0,
            running: true,
            started_at: None,
            size_root_fs: None,
            size_rw: None,
            mount_count: 0,
        }
    }

    fn job_labels(job: &str) -> LabelSet {
        [("job", job)].into_iter().collect()
    }

    #[test]
    fn test_cpu_percent_from_two_samples() {
        let t0 = Utc::now();
        let prev = sample(100, 1000, t0);
        let cur = sample(150, 1500, t0 + Duration::seconds(15));

        assert_eq!(cpu_usage_percent(Some(&prev), &cur), Some(10.0));
    }

    #[test]
    fn test_cpu_percent_omitted_on_first_observation() {
        let cur = sample(150, 1500, Utc::now());
        assert_eq!(cpu_usage_percent(None, &cur), None);

        let points = container_points(&job_labels("db"), None, &cur, Utc::now());
        assert!(points.iter().all(|p| p.metric != MetricKind::ContainerCpuUsage));
    }

    #[test]
    fn test_cpu_percent_omitted_for_degenerate_samples() {
        let t0 = Utc::now();
        let later = t0 + Duration::seconds(10);

        // zero system delta
        assert_eq!(
            cpu_usage_percent(Some(&sample(100, 1000, t0)), &sample(150, 1000, later)),
            None
        );
        // no elapsed time
        assert_eq!(
            cpu_usage_percent(Some(&sample(100, 1000, t0)), &sample(150, 1500, t0)),
            None
        );
        // counter reset after restart
        assert_eq!(
            cpu_usage_percent(Some(&sample(500, 1000, t0)), &sample(10, 1500, later)),
            None
        );
        // system counter missing
        let mut cur = sample(150, 1500, later);
        cur.system_cpu = None;
        assert_eq!(cpu_usage_percent(Some(&sample(100, 1000, t0)), &cur), None);
    }

    #[test]
    fn test_memory_clamps_to_zero() {
        let mut s = sample(0, 0, Utc::now());
        s.memory_usage = 500;
        s.memory_cache = 600;
        assert_eq!(memory_usage_bytes(&s), 0);

        s.memory_usage = 1000;
        s.memory_cache = 250;
        assert_eq!(memory_usage_bytes(&s), 750);
    }

    #[test]
    fn test_uptime() {
        let now = Utc::now();
        let mut s = sample(0, 0, now);
        s.started_at = Some(now - Duration::seconds(90));
        assert_eq!(uptime_seconds(&s, now), 90.0);

        s.running = false;
        assert_eq!(uptime_seconds(&s, now), 0.0);

        s.running = true;
        s.started_at = None;
        assert_eq!(uptime_seconds(&s, now), 0.0);
    }

    #[test]
    fn test_container_points_include_sizes_when_reported() {
        let now = Utc::now();
        let mut cur = sample(0, 0, now);
        cur.size_root_fs = Some(2048);
        cur.mount_count = 3;

        let points = container_points(&job_labels("db"), None, &cur, now);
        let kinds: Vec<_> = points.iter().map(|p| p.metric).collect();

        assert_eq!(
            kinds,
            vec![
                MetricKind::ContainerMemoryUsage,
                MetricKind::ContainerUptime,
                MetricKind::ContainerRootfsSize,
                MetricKind::ContainerMountCount,
            ]
        );
        assert!(points.iter().all(|p| p.labels.get("job") == Some("db")));
        assert_eq!(points[3].value, 3.0);
    }

    #[test]
    fn test_sample_history_prunes_vanished_containers() {
        let mut history = SampleHistory::new();
        let now = Utc::now();

        assert!(history.observe("a", sample(1, 1, now)).is_none());
        assert!(history.observe("b", sample(1, 1, now)).is_none());
        let prev = history.observe("a", sample(2, 2, now)).unwrap();
        assert_eq!(prev.cpu_total, 1);

        let live: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(history.retain(&live), 1);
        assert_eq!(history.len(), 1);
        assert!(history.get("b").is_none());
    }

    #[test]
    fn test_volume_disambiguation_only_on_collision() {
        let mut volumes = vec![
            VolumeLabels {
                target: TargetRef::volume("pg-data"),
                labels: job_labels("backups"),
            },
            VolumeLabels {
                target: TargetRef::volume("redis-data"),
                labels: job_labels("backups"),
            },
            VolumeLabels {
                target: TargetRef::volume("logs"),
                labels: job_labels("logs"),
            },
        ];

        disambiguate_volumes(&mut volumes);

        assert_eq!(volumes[0].labels.get("volume_name"), Some("pg-data"));
        assert_eq!(volumes[1].labels.get("volume_name"), Some("redis-data"));
        assert!(!volumes[2].labels.contains("volume_name"));
    }
}
