//! Docker daemon access
//!
//! The collection pipeline only talks to the daemon through [`DockerApi`],
//! which keeps the scheduler testable without a running daemon.

mod client;
mod du;
mod error;

pub use client::{BollardClient, ClientOptions};
pub use du::{directory_size, directory_size_until, VolumeWalks};
pub use error::{DockerError, Result};

use crate::models::{DiscoveredContainer, DiscoveredVolume, ResourceSample, TargetRef};

pub use async_trait::async_trait;

/// Read-only view of the Docker daemon
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// List containers in every state
    async fn list_containers(&self) -> Result<Vec<DiscoveredContainer>>;

    /// List volumes
    async fn list_volumes(&self) -> Result<Vec<DiscoveredVolume>>;

    /// Take one resource-usage reading of a container
    async fn sample_container(&self, target: &TargetRef) -> Result<ResourceSample>;

    /// Compute the on-disk size of a volume in bytes
    async fn volume_disk_usage(&self, target: &TargetRef) -> Result<u64>;

    /// Check that the daemon answers
    async fn ping(&self) -> Result<()>;
}
