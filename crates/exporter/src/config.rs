//! Exporter configuration

use anyhow::{ensure, Context, Result};
use exporter_lib::reconcile::AddressSource;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// File read when present, any extension the config crate understands
const CONFIG_FILE: &str = "power-exporter";

/// Prefix of environment overrides, e.g. `POWER_EXPORTER_EXPORTER_PORT`
const ENV_PREFIX: &str = "POWER_EXPORTER";

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Seconds between estimation cycles
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Port serving `/metrics`, `/healthz`, `/readyz` and `/models`
    #[serde(default = "default_exporter_port")]
    pub exporter_port: u16,

    /// Name of the exported power gauge
    #[serde(default = "default_metric_name")]
    pub metric_name: String,

    /// Metrics backend as `host:port` or a full URL
    #[serde(default = "default_prometheus_host")]
    pub prometheus_host: String,

    #[serde(default = "default_calibration_path")]
    pub calibration_path: PathBuf,

    /// Backend probes at startup before giving up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_connect_retry_interval")]
    pub connect_retry_interval_secs: u64,

    /// Bound on every backend query and node listing
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// `job` label of the node-exporter scrape
    #[serde(default = "default_node_exporter_job")]
    pub node_exporter_job: String,

    /// Where node addresses come from: `name` or `status`
    #[serde(default)]
    pub address_source: AddressSource,
}

fn default_polling_interval() -> u64 {
    30
}

fn default_exporter_port() -> u16 {
    9877
}

fn default_metric_name() -> String {
    exporter_lib::export::DEFAULT_METRIC_NAME.to_string()
}

fn default_prometheus_host() -> String {
    "localhost:9090".to_string()
}

fn default_calibration_path() -> PathBuf {
    PathBuf::from("AWS_EC2_Carbon_Footprint_Dataset.csv")
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_retry_interval() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    10
}

fn default_node_exporter_job() -> String {
    exporter_lib::collector::DEFAULT_JOB.to_string()
}

impl ExporterConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX));
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.polling_interval_secs > 0,
            "polling_interval_secs must be positive"
        );
        ensure!(self.connect_retries > 0, "connect_retries must be at least 1");
        ensure!(!self.metric_name.is_empty(), "metric_name must not be empty");
        Ok(())
    }

    /// Base URL of the metrics backend
    pub fn prometheus_url(&self) -> String {
        let host = self.prometheus_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/", host)
        } else {
            format!("http://{}/", host)
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_secs(self.connect_retry_interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> Result<ExporterConfig> {
        ExporterConfig::from_builder(
            config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();

        assert_eq!(config.polling_interval_secs, 30);
        assert_eq!(config.exporter_port, 9877);
        assert_eq!(config.metric_name, "node_power_usage");
        assert_eq!(config.prometheus_url(), "http://localhost:9090/");
        assert_eq!(
            config.calibration_path,
            PathBuf::from("AWS_EC2_Carbon_Footprint_Dataset.csv")
        );
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_retry_interval(), Duration::from_secs(5));
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.node_exporter_job, "node-exporter");
        assert_eq!(config.address_source, AddressSource::Name);
    }

    #[test]
    fn test_file_overrides() {
        let config = from_toml(
            r#"
            polling_interval_secs = 15
            prometheus_host = "https://prometheus.monitoring:9090/"
            address_source = "status"
            "#,
        )
        .unwrap();

        assert_eq!(config.polling_interval(), Duration::from_secs(15));
        assert_eq!(config.prometheus_url(), "https://prometheus.monitoring:9090/");
        assert_eq!(config.address_source, AddressSource::Status);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_toml("polling_interval_secs = 0").is_err());
        assert!(from_toml("connect_retries = 0").is_err());
        assert!(from_toml("address_source = \"dns\"").is_err());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("POWER_EXPORTER_EXPORTER_PORT", "9988");
        let config = ExporterConfig::load().unwrap();
        std::env::remove_var("POWER_EXPORTER_EXPORTER_PORT");

        assert_eq!(config.exporter_port, 9988);
    }
}
