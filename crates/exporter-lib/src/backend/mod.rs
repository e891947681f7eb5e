//! Metrics backend access
//!
//! The exporter only needs instant queries and a health probe from the
//! time-series store. [`PrometheusClient`] implements both over the
//! Prometheus HTTP API.

mod http;

pub use http::PrometheusClient;

use crate::error::{ExporterError, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

pub use async_trait::async_trait;

/// One series from an instant query
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Trait for time-series backends
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Address used in log lines and errors
    fn endpoint(&self) -> &str;

    /// Run an instant query expression
    async fn query(&self, expr: &str) -> Result<Vec<Sample>>;

    /// Connectivity probe
    async fn is_healthy(&self) -> bool;
}

/// Startup connection attempts against the backend
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of probes before giving up
    pub attempts: u32,
    /// Fixed wait between probes
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

/// Probe the backend until it answers or the attempts run out
pub async fn connect_with_retry(backend: &dyn MetricsBackend, policy: &RetryPolicy) -> Result<()> {
    for attempt in 1..=policy.attempts {
        if backend.is_healthy().await {
            info!(
                endpoint = %backend.endpoint(),
                attempt = attempt,
                "Connected to metrics backend"
            );
            return Ok(());
        }

        warn!(
            endpoint = %backend.endpoint(),
            attempt = attempt,
            max_attempts = policy.attempts,
            "Metrics backend not reachable"
        );

        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ExporterError::Connection {
        endpoint: backend.endpoint().to_string(),
        attempts: policy.attempts,
    })
}
