//! Metrics collection loop
//!
//! Every tick the loop discovers registered containers and volumes, samples
//! each target in its own task, and publishes the assembled snapshot. A cycle
//! is either published whole or not at all; a cycle whose discovery fails is
//! published without targets.

use super::sampler::{self, SampleHistory, VolumeLabels};
use super::targets::scrape_target;
use crate::docker::{DockerApi, DockerError};
use crate::health::{components, HealthRegistry};
use crate::labels::{base_labels, parse_registration};
use crate::models::{
    DiscoveredContainer, RegistrationInfo, ResourceSample, Snapshot, TargetKind, TargetRef,
};
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::registry::MetricRegistry;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the metrics collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Time between cycle starts (default: 15 seconds)
    pub interval: Duration,
    /// Upper bound for sampling a single target (default: 10 seconds)
    pub target_timeout: Duration,
    /// Maximum number of targets sampled at once (default: 64)
    pub max_concurrency: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            target_timeout: Duration::from_secs(10),
            max_concurrency: 64,
        }
    }
}

/// Summary of a published cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub containers: usize,
    pub volumes: usize,
    pub failed: usize,
    pub points: usize,
}

/// Why a target contributed nothing to a cycle
#[derive(Debug)]
enum SampleFailure {
    Docker(DockerError),
    Timeout(Duration),
    Aborted(String),
}

impl SampleFailure {
    fn kind(&self) -> &'static str {
        match self {
            SampleFailure::Docker(e) => e.kind(),
            SampleFailure::Timeout(_) => "timeout",
            SampleFailure::Aborted(_) => "task_aborted",
        }
    }

    fn is_vanished(&self) -> bool {
        matches!(self, SampleFailure::Docker(e) if e.is_vanished())
    }

    fn describe(&self) -> String {
        match self {
            SampleFailure::Docker(e) => e.to_string(),
            SampleFailure::Timeout(limit) => format!("timed out after {}ms", limit.as_millis()),
            SampleFailure::Aborted(reason) => reason.clone(),
        }
    }
}

/// Raw result of one target's sampling task
enum SampleValue {
    Container(ResourceSample),
    Volume(u64),
}

struct TaskOutcome {
    index: usize,
    target: TargetRef,
    result: std::result::Result<SampleValue, SampleFailure>,
}

struct RegisteredContainer {
    container: DiscoveredContainer,
    registration: RegistrationInfo,
}

/// Metrics collection loop that periodically samples every registered target
pub struct CollectionLoop {
    docker: Arc<dyn DockerApi>,
    registry: MetricRegistry,
    config: CollectionConfig,
    history: SampleHistory,
    cycle: u64,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl CollectionLoop {
    pub fn new(
        docker: Arc<dyn DockerApi>,
        registry: MetricRegistry,
        config: CollectionConfig,
    ) -> Self {
        Self {
            docker,
            registry,
            config,
            history: SampleHistory::new(),
            cycle: 0,
            metrics: ExporterMetrics::new(),
            logger: StructuredLogger::new("docker-exporter"),
            health: None,
        }
    }

    /// Run cycles until a shutdown signal arrives
    ///
    /// A cycle interrupted by shutdown is dropped, which aborts its sampling
    /// tasks and leaves the published snapshot untouched.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrency = self.config.max_concurrency,
            "Starting metrics collection loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        result = self.run_cycle() => {
                            if let Err(e) = result {
                                debug!(error = %e, "Collection cycle published without targets");
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("Shutdown during collection cycle, discarding partial results");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        info!("Metrics collection loop stopped");
    }

    /// Run one full cycle: discover, sample, derive, publish
    ///
    /// A discovery error is returned after an empty snapshot has been published.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, DockerError> {
        let start = Instant::now();

        let (containers, volumes) = match tokio::try_join!(
            self.docker.list_containers(),
            self.docker.list_volumes()
        ) {
            Ok(discovered) => discovered,
            Err(e) => {
                self.logger.log_discovery_failure(&e.to_string());
                self.metrics.inc_discovery_errors();
                self.publish_empty(start);
                if let Some(health) = &self.health {
                    health.set_degraded(components::DOCKER, e.to_string()).await;
                }
                return Err(e);
            }
        };

        let containers: Vec<RegisteredContainer> = containers
            .into_iter()
            .filter_map(|container| {
                let registration = parse_registration(&container.labels)?;
                Some(RegisteredContainer {
                    container,
                    registration,
                })
            })
            .collect();

        let mut volumes: Vec<VolumeLabels> = volumes
            .into_iter()
            .filter_map(|volume| {
                let registration = parse_registration(&volume.labels)?;
                Some(VolumeLabels {
                    target: volume.target,
                    labels: base_labels(&registration),
                })
            })
            .collect();
        sampler::disambiguate_volumes(&mut volumes);

        self.metrics
            .set_targets(TargetKind::Container.as_str(), containers.len() as i64);
        self.metrics
            .set_targets(TargetKind::Volume.as_str(), volumes.len() as i64);

        let targets = containers
            .iter()
            .map(|c| c.container.target.clone())
            .chain(volumes.iter().map(|v| v.target.clone()))
            .collect();
        let mut outcomes = self.sample_all(targets).await;

        let now = Utc::now();
        let mut points = Vec::new();
        let mut failed = 0usize;

        for (index, registered) in containers.iter().enumerate() {
            match outcomes[index].take() {
                Some(Ok(SampleValue::Container(sample))) => {
                    let id = &registered.container.target.id;
                    let labels =
                        sampler::container_labels(&registered.registration, &registered.container);
                    let prev = self.history.observe(id, sample.clone());
                    points.extend(sampler::container_points(&labels, prev.as_ref(), &sample, now));
                }
                Some(Err(failure)) => {
                    self.record_failure(&registered.container.target, &failure);
                    failed += 1;
                }
                Some(Ok(SampleValue::Volume(_))) | None => failed += 1,
            }
        }

        let offset = containers.len();
        for (index, volume) in volumes.iter().enumerate() {
            match outcomes[offset + index].take() {
                Some(Ok(SampleValue::Volume(bytes))) => {
                    points.push(sampler::volume_point(volume.labels.clone(), bytes));
                }
                Some(Err(failure)) => {
                    self.record_failure(&volume.target, &failure);
                    failed += 1;
                }
                Some(Ok(SampleValue::Container(_))) | None => failed += 1,
            }
        }

        let live: HashSet<String> = containers
            .iter()
            .map(|c| c.container.target.id.clone())
            .collect();
        let pruned = self.history.retain(&live);
        if pruned > 0 {
            debug!(pruned = pruned, "Dropped CPU history of vanished containers");
        }

        let scrape_targets = containers
            .iter()
            .filter_map(|c| scrape_target(&c.container, &c.registration))
            .collect();

        self.cycle += 1;
        let report = CycleReport {
            cycle: self.cycle,
            containers: containers.len(),
            volumes: volumes.len(),
            failed,
            points: points.len(),
        };

        self.registry.publish(Snapshot {
            cycle: self.cycle,
            taken_at: Some(now),
            points,
            targets: scrape_targets,
        });

        let elapsed = start.elapsed();
        self.metrics
            .observe_cycle(elapsed.as_secs_f64(), now.timestamp() as f64);
        self.logger.log_cycle(
            report.cycle,
            report.containers,
            report.volumes,
            report.failed,
            report.points,
            elapsed.as_millis(),
        );

        if let Some(health) = &self.health {
            health.set_healthy(components::DOCKER).await;
            health.set_healthy(components::COLLECTOR).await;
            health.set_ready(true).await;
        }

        Ok(report)
    }

    /// Sample every target concurrently and wait for all of them
    ///
    /// The result is indexed like the input; each slot is filled by its task.
    async fn sample_all(
        &self,
        targets: Vec<TargetRef>,
    ) -> Vec<Option<std::result::Result<SampleValue, SampleFailure>>> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let timeout = self.config.target_timeout;
        let mut tasks = JoinSet::new();
        let count = targets.len();

        for (index, target) in targets.into_iter().enumerate() {
            let docker = Arc::clone(&self.docker);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => sample_target(docker.as_ref(), &target, timeout).await,
                    Err(e) => Err(SampleFailure::Aborted(e.to_string())),
                };
                TaskOutcome {
                    index,
                    target,
                    result,
                }
            });
        }

        let mut outcomes: Vec<_> = (0..count).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    debug!(
                        kind = %outcome.target.kind,
                        target = %outcome.target.name,
                        ok = outcome.result.is_ok(),
                        "Target sampled"
                    );
                    outcomes[outcome.index] = Some(outcome.result);
                }
                Err(e) => warn!(error = %e, "Sampling task failed"),
            }
        }

        outcomes
    }

    /// Publish a cycle without targets
    ///
    /// Used when discovery fails, so that no stale readings outlive the daemon.
    fn publish_empty(&mut self, start: Instant) {
        let now = Utc::now();
        let pruned = self.history.retain(&HashSet::new());
        if pruned > 0 {
            debug!(pruned = pruned, "Dropped CPU history after failed discovery");
        }

        self.metrics.set_targets(TargetKind::Container.as_str(), 0);
        self.metrics.set_targets(TargetKind::Volume.as_str(), 0);

        self.cycle += 1;
        self.registry.publish(Snapshot {
            cycle: self.cycle,
            taken_at: Some(now),
            points: Vec::new(),
            targets: Vec::new(),
        });

        self.metrics
            .observe_cycle(start.elapsed().as_secs_f64(), now.timestamp() as f64);
    }

    fn record_failure(&self, target: &TargetRef, failure: &SampleFailure) {
        self.metrics
            .inc_target_errors(target.kind.as_str(), failure.kind());
        self.logger.log_target_failure(
            target.kind.as_str(),
            &target.name,
            &failure.describe(),
            failure.is_vanished(),
        );
    }

    /// Number of containers with a retained CPU reading
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

async fn sample_target(
    docker: &dyn DockerApi,
    target: &TargetRef,
    timeout: Duration,
) -> std::result::Result<SampleValue, SampleFailure> {
    let sampling = async {
        match target.kind {
            TargetKind::Container => docker
                .sample_container(target)
                .await
                .map(SampleValue::Container),
            TargetKind::Volume => docker
                .volume_disk_usage(target)
                .await
                .map(SampleValue::Volume),
        }
    };

    match tokio::time::timeout(timeout, sampling).await {
        Ok(result) => result.map_err(SampleFailure::Docker),
        Err(_) => Err(SampleFailure::Timeout(timeout)),
    }
}

/// Builder for creating the collection loop
pub struct CollectionLoopBuilder {
    docker: Option<Arc<dyn DockerApi>>,
    registry: Option<MetricRegistry>,
    config: CollectionConfig,
    logger: Option<StructuredLogger>,
    health: Option<HealthRegistry>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            docker: None,
            registry: None,
            config: CollectionConfig::default(),
            logger: None,
            health: None,
        }
    }

    pub fn docker(mut self, docker: Arc<dyn DockerApi>) -> Self {
        self.docker = Some(docker);
        self
    }

    pub fn registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn target_timeout(mut self, timeout: Duration) -> Self {
        self.config.target_timeout = timeout;
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let docker = self
            .docker
            .ok_or_else(|| anyhow::anyhow!("Docker client is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("Registry is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be positive");
        }

        let mut collection_loop = CollectionLoop::new(docker, registry, self.config);
        if let Some(logger) = self.logger {
            collection_loop.logger = logger;
        }
        collection_loop.health = self.health;
        Ok(collection_loop)
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
