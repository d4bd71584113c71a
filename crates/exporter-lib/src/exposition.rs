//! Prometheus text exposition of a snapshot
//!
//! Every target carries its own extra labels, so points are converted into
//! metric families directly instead of going through fixed-label vectors.

use crate::models::{MetricKind, MetricPoint, Snapshot};
use anyhow::{Context, Result};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn to_metric(point: &MetricPoint) -> Metric {
    let mut metric = Metric::default();
    for (name, value) in &point.labels {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.clone());
        metric.mut_label().push(pair);
    }

    let mut gauge = Gauge::default();
    gauge.set_value(point.value);
    metric.set_gauge(gauge);
    metric
}

/// Group snapshot points into one gauge family per metric
///
/// Metrics without points are left out.
pub fn snapshot_families(snapshot: &Snapshot) -> Vec<MetricFamily> {
    MetricKind::ALL
        .iter()
        .filter_map(|kind| {
            let metrics: Vec<Metric> = snapshot.points_for(*kind).map(to_metric).collect();
            if metrics.is_empty() {
                return None;
            }

            let mut family = MetricFamily::default();
            family.set_name(kind.name().to_string());
            family.set_help(kind.help().to_string());
            family.set_field_type(MetricType::GAUGE);
            for metric in metrics {
                family.mut_metric().push(metric);
            }
            Some(family)
        })
        .collect()
}

/// Render a snapshot followed by any additional families
pub fn render(snapshot: &Snapshot, extra: &[MetricFamily]) -> Result<String> {
    let mut families = snapshot_families(snapshot);
    families.extend(extra.iter().filter(|f| !f.get_metric().is_empty()).cloned());

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .context("Failed to encode metric families")?;

    String::from_utf8(buffer).context("Encoded metrics are not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LabelSet;

    fn point(metric: MetricKind, labels: &[(&str, &str)], value: f64) -> MetricPoint {
        MetricPoint {
            metric,
            labels: labels.iter().copied().collect(),
            value,
        }
    }

    #[test]
    fn test_empty_snapshot_renders_nothing() {
        let text = render(&Snapshot::empty(), &[]).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_volume_line_format() {
        let snapshot = Snapshot {
            cycle: 1,
            points: vec![point(
                MetricKind::VolumeSize,
                &[("job", "backups")],
                1_073_741_824.0,
            )],
            ..Default::default()
        };

        let text = render(&snapshot, &[]).unwrap();
        assert!(text.contains("# TYPE docker_volume_size_bytes gauge"));
        assert!(text
            .lines()
            .any(|l| l == "docker_volume_size_bytes{job=\"backups\"} 1073741824"));
    }

    #[test]
    fn test_targets_with_different_label_names_share_a_family() {
        let snapshot = Snapshot {
            cycle: 1,
            points: vec![
                point(
                    MetricKind::ContainerMountCount,
                    &[("job", "db"), ("env", "production")],
                    2.0,
                ),
                point(
                    MetricKind::ContainerMountCount,
                    &[("job", "db"), ("shard", "a")],
                    1.0,
                ),
                point(MetricKind::ContainerUptime, &[("job", "db")], 12.5),
            ],
            ..Default::default()
        };

        let families = snapshot_families(&snapshot);
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].get_name(), "docker_container_uptime_seconds");
        assert_eq!(families[1].get_metric().len(), 2);

        let text = render(&snapshot, &[]).unwrap();
        assert!(text.contains("docker_container_mount_count{env=\"production\",job=\"db\"} 2"));
        assert!(text.contains("docker_container_mount_count{job=\"db\",shard=\"a\"} 1"));
        assert!(text.contains("docker_container_uptime_seconds{job=\"db\"} 12.5"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let labels: LabelSet = [("job", "say \"hi\"")].into_iter().collect();
        let snapshot = Snapshot {
            cycle: 1,
            points: vec![MetricPoint {
                metric: MetricKind::VolumeSize,
                labels,
                value: 1.0,
            }],
            ..Default::default()
        };

        let text = render(&snapshot, &[]).unwrap();
        assert!(text.contains(r#"job="say \"hi\"""#));
    }
}
