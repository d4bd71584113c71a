//! Metric collection from the Docker daemon
//!
//! The collection loop discovers registered containers and volumes, samples
//! them concurrently through a [`DockerApi`](crate::docker::DockerApi), and
//! publishes each cycle's result to the [`MetricRegistry`](crate::registry::MetricRegistry).

mod r#loop;
pub mod sampler;
pub mod targets;


pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder, CycleReport};
pub use sampler::SampleHistory;
pub use targets::scrape_target;
