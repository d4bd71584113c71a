use std::io;

/// Errors from the Docker daemon adapter.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("docker daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("docker object not found: {0}")]
    NotFound(String),

    #[error("permission denied talking to docker: {0}")]
    PermissionDenied(String),

    #[error("docker API error: {0}")]
    Api(String),
}

impl DockerError {
    /// Whether the object went away between discovery and sampling
    pub fn is_vanished(&self) -> bool {
        matches!(self, DockerError::NotFound(_))
    }

    /// Short stable name, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            DockerError::DaemonUnreachable(_) => "daemon_unreachable",
            DockerError::NotFound(_) => "target_vanished",
            DockerError::PermissionDenied(_) => "permission_denied",
            DockerError::Api(_) => "api",
        }
    }

    /// Classify a filesystem error hit while walking `path`
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => DockerError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => {
                DockerError::PermissionDenied(format!("{path}: {err}"))
            }
            _ => DockerError::Api(format!("{path}: {err}")),
        }
    }
}

impl From<bollard::errors::Error> for DockerError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                404 => DockerError::NotFound(message),
                401 | 403 => DockerError::PermissionDenied(message),
                _ => DockerError::Api(format!("{status_code}: {message}")),
            },
            Error::IOError { err } => match err.kind() {
                io::ErrorKind::PermissionDenied => DockerError::PermissionDenied(err.to_string()),
                _ => DockerError::DaemonUnreachable(err.to_string()),
            },
            Error::SocketNotFoundError(path) => {
                DockerError::DaemonUnreachable(format!("socket not found: {path}"))
            }
            Error::RequestTimeoutError => {
                DockerError::DaemonUnreachable("request timed out".to_string())
            }
            err @ Error::HyperResponseError { .. } => {
                DockerError::DaemonUnreachable(err.to_string())
            }
            other => DockerError::Api(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DockerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_taxonomy() {
        let not_found: DockerError = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        }
        .into();
        assert!(not_found.is_vanished());
        assert_eq!(not_found.kind(), "target_vanished");

        let forbidden: DockerError = bollard::errors::Error::DockerResponseServerError {
            status_code: 403,
            message: "forbidden".to_string(),
        }
        .into();
        assert!(matches!(forbidden, DockerError::PermissionDenied(_)));

        let server: DockerError = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(server, DockerError::Api(_)));
    }

    #[test]
    fn test_io_errors_map_to_taxonomy() {
        let refused: DockerError = bollard::errors::Error::IOError {
            err: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        }
        .into();
        assert!(matches!(refused, DockerError::DaemonUnreachable(_)));

        let denied: DockerError = bollard::errors::Error::IOError {
            err: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(denied, DockerError::PermissionDenied(_)));
    }

    #[test]
    fn test_walk_errors() {
        let err = DockerError::from_io("/data", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_vanished());

        let err = DockerError::from_io("/data", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), "permission_denied");
    }
}
