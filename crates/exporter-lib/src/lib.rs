//! Docker discovery exporter library
//!
//! This crate provides the core functionality for:
//! - Discovering containers and volumes registered through Docker labels
//! - Deriving resource-usage metrics from daemon readings
//! - Publishing complete metric snapshots for concurrent readers
//! - Rendering snapshots in the Prometheus text format
//! - Health checks, start-up checks and observability

pub mod collector;
pub mod docker;
pub mod exposition;
pub mod health;
pub mod labels;
pub mod models;
pub mod observability;
pub mod registry;
pub mod supervisor;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use registry::MetricRegistry;
