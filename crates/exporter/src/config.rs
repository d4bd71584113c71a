//! Exporter configuration
//!
//! Values are layered: built-in defaults, an optional config file,
//! `EXPORTER_*` environment variables, then command-line flags.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::collector::CollectionConfig;
use exporter_lib::docker::ClientOptions;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Docker discovery exporter
#[derive(Debug, Default, Parser)]
#[command(name = "docker-exporter")]
#[command(author, version, about = "Exports resource metrics of labeled Docker containers and volumes", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "EXPORTER_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Port for the metrics and discovery endpoints
    #[arg(long, short, env = "EXPORTER_LISTEN_PORT")]
    pub port: Option<u16>,

    /// Seconds between collection cycles
    #[arg(long, env = "EXPORTER_POLL_INTERVAL_SECS")]
    pub poll_interval: Option<u64>,

    /// Docker endpoint, e.g. unix:///var/run/docker.sock or tcp://host:2375
    #[arg(long, env = "EXPORTER_DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Prefix under which the host's volume mount points are visible
    #[arg(long, env = "EXPORTER_VOLUME_PATH_PREFIX")]
    pub volume_path_prefix: Option<PathBuf>,
}

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Address to bind the HTTP server to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port for metrics, discovery and health endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Collection interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Docker endpoint; `DOCKER_HOST` or the local socket when unset
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Timeout of a single daemon request in seconds
    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_secs: u64,

    /// Upper bound for sampling one target in seconds
    #[serde(default = "default_target_timeout")]
    pub target_timeout_secs: u64,

    /// Maximum number of targets sampled concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Prefix prepended to volume mount points before walking them
    #[serde(default)]
    pub volume_path_prefix: Option<PathBuf>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "docker-exporter".to_string())
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_poll_interval() -> u64 {
    15
}

fn default_docker_timeout() -> u64 {
    30
}

fn default_target_timeout() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    64
}

impl ExporterConfig {
    /// Load configuration from file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("EXPORTER").try_parsing(true))
            .set_override_option("listen_port", cli.port.map(i64::from))?
            .set_override_option(
                "poll_interval_secs",
                cli.poll_interval.map(|secs| secs as i64),
            )?
            .set_override_option("docker_host", cli.docker_host.clone())?
            .set_override_option(
                "volume_path_prefix",
                cli.volume_path_prefix
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )?
            .build()
            .context("Failed to assemble configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid exporter configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.target_timeout_secs == 0 {
            anyhow::bail!("target_timeout_secs must be greater than zero");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be greater than zero");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn collection(&self) -> CollectionConfig {
        CollectionConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            target_timeout: Duration::from_secs(self.target_timeout_secs),
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            docker_host: self.docker_host.clone(),
            timeout: Duration::from_secs(self.docker_timeout_secs),
            volume_path_prefix: self.volume_path_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli {
            port: Some(9999),
            poll_interval: Some(5),
            docker_host: Some("tcp://docker:2375".to_string()),
            ..Default::default()
        };

        let config = ExporterConfig::load(&cli).unwrap();
        assert_eq!(config.listen_port, 9999);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.docker_host.as_deref(), Some("tcp://docker:2375"));
        assert_eq!(config.collection().interval, Duration::from_secs(5));
        assert_eq!(config.client_options().timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_file_is_read() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "listen_port = 8123\nmax_concurrency = 4").unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = ExporterConfig::load(&cli).unwrap();
        assert_eq!(config.listen_port, 8123);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.listen_addr(), "0.0.0.0:8123");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cli = Cli {
            poll_interval: Some(0),
            ..Default::default()
        };
        assert!(ExporterConfig::load(&cli).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/exporter.toml")),
            ..Default::default()
        };
        assert!(ExporterConfig::load(&cli).is_err());
    }

    #[test]
    fn test_flags_fall_back_to_environment_names() {
        use clap::CommandFactory;

        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };

        assert_eq!(env_of("port").as_deref(), Some("EXPORTER_LISTEN_PORT"));
        assert_eq!(
            env_of("poll_interval").as_deref(),
            Some("EXPORTER_POLL_INTERVAL_SECS")
        );
        assert_eq!(env_of("docker_host").as_deref(), Some("EXPORTER_DOCKER_HOST"));
        assert_eq!(
            env_of("volume_path_prefix").as_deref(),
            Some("EXPORTER_VOLUME_PATH_PREFIX")
        );
        assert_eq!(env_of("config").as_deref(), Some("EXPORTER_CONFIG_FILE"));
    }
}
