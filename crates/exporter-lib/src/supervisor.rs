//! Start-up checks and supervision of the collection task

use crate::docker::{DockerApi, DockerError};
use crate::health::{components, HealthRegistry};
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Ping the daemon once before collection starts
///
/// A permission error is returned to the caller as fatal. Any other failure
/// marks `docker` degraded and leaves retrying to the collection loop.
pub async fn check_daemon(
    docker: &dyn DockerApi,
    health: &HealthRegistry,
) -> Result<(), DockerError> {
    match docker.ping().await {
        Ok(()) => {
            info!("Connected to docker daemon");
            Ok(())
        }
        Err(e @ DockerError::PermissionDenied(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, "Docker daemon not reachable yet, will retry every cycle");
            health.set_degraded(components::DOCKER, e.to_string()).await;
            Ok(())
        }
    }
}

/// Record that the collection task ended while the exporter keeps serving
pub async fn collector_stopped(health: &HealthRegistry, joined: Result<(), JoinError>) {
    let reason = match joined {
        Ok(()) => "Collection loop exited".to_string(),
        Err(e) if e.is_panic() => format!("Collection loop panicked: {e}"),
        Err(e) => format!("Collection loop ended: {e}"),
    };

    error!(reason = %reason, "Collection stopped before shutdown");
    health.set_unhealthy(components::COLLECTOR, reason).await;
}
