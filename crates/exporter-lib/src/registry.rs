//! Latest-snapshot store shared by the collection loop and HTTP handlers

use crate::models::Snapshot;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Holds the most recently published [`Snapshot`]
///
/// One writer (the collection loop) replaces the whole snapshot; readers get
/// an `Arc` to whichever complete snapshot was current when they asked.
#[derive(Clone)]
pub struct MetricRegistry {
    current: Arc<ArcSwap<Snapshot>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Create a registry holding an empty snapshot
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(Snapshot::empty())),
        }
    }

    /// Replace the current snapshot
    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Whether any collection cycle has published yet
    pub fn has_published(&self) -> bool {
        self.current.load().cycle > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabelSet, MetricKind, MetricPoint};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn snapshot(cycle: u64, points: usize) -> Snapshot {
        let labels: LabelSet = [("job", "test"), ("cycle", &cycle.to_string()[..])]
            .into_iter()
            .collect();
        Snapshot {
            cycle,
            taken_at: Some(chrono::Utc::now()),
            points: (0..points)
                .map(|i| MetricPoint {
                    metric: MetricKind::ContainerMountCount,
                    labels: labels.clone(),
                    value: i as f64,
                })
                .collect(),
            targets: Vec::new(),
        }
    }

    #[test]
    fn test_empty_before_first_publish() {
        let registry = MetricRegistry::new();
        let current = registry.current();
        assert!(current.is_empty());
        assert_eq!(current.cycle, 0);
        assert!(!registry.has_published());
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let registry = MetricRegistry::new();
        registry.publish(snapshot(1, 3));
        let first = registry.current();

        registry.publish(snapshot(2, 5));

        // Readers holding the old snapshot keep a valid, unchanged view
        assert_eq!(first.cycle, 1);
        assert_eq!(first.points.len(), 3);
        assert_eq!(registry.current().cycle, 2);
        assert_eq!(registry.current().points.len(), 5);
        assert!(registry.has_published());
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_snapshot() {
        let registry = MetricRegistry::new();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let snap = registry.current();
                        // Cycle n always carries exactly n * 10 points, all tagged with n
                        assert_eq!(snap.points.len() as u64, snap.cycle * 10);
                        let tag = snap.cycle.to_string();
                        assert!(snap
                            .points
                            .iter()
                            .all(|p| p.labels.get("cycle") == Some(tag.as_str())));
                    }
                })
            })
            .collect();

        for cycle in 1..=200u64 {
            registry.publish(snapshot(cycle, (cycle * 10) as usize));
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
