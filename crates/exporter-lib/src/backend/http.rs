//! Prometheus HTTP API client

use super::{async_trait, MetricsBackend, Sample};
use crate::error::{ExporterError, Result};
use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Instant query response envelope
#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorResult>),
    Scalar((f64, String)),
    Matrix(serde_json::Value),
    #[serde(rename = "string")]
    Text(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct VectorResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Client for the Prometheus instant query API
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    /// Create a client; `timeout` bounds every request
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid metrics backend URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ExporterError::Query(format!("invalid path {}: {}", path, e)))
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    fn endpoint(&self) -> &str {
        self.base_url.as_str()
    }

    async fn query(&self, expr: &str) -> Result<Vec<Sample>> {
        let url = self.url("api/v1/query")?;
        debug!(query = %expr, "Running metrics query");

        let response = self
            .client
            .get(url)
            .query(&[("query", expr)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Prometheus reports bad queries as 4xx with a JSON error envelope
        let parsed: QueryResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ExporterError::Query(format!("HTTP {}: {}", status, body)));
            }
            Err(e) => {
                return Err(ExporterError::Query(format!("malformed response: {}", e)));
            }
        };

        if parsed.status != "success" {
            return Err(ExporterError::Query(format!(
                "{}: {}",
                parsed.error_type.unwrap_or_else(|| parsed.status.clone()),
                parsed.error.unwrap_or_default()
            )));
        }

        match parsed.data {
            Some(QueryData::Vector(results)) => results
                .into_iter()
                .map(|r| {
                    Ok(Sample {
                        labels: r.metric,
                        value: parse_value(&r.value.1)?,
                    })
                })
                .collect(),
            Some(QueryData::Scalar((_, value))) => Ok(vec![Sample {
                labels: BTreeMap::new(),
                value: parse_value(&value)?,
            }]),
            Some(QueryData::Matrix(_)) | Some(QueryData::Text(_)) => Err(ExporterError::Query(
                "unsupported result type for instant query".to_string(),
            )),
            None => Ok(vec![]),
        }
    }

    async fn is_healthy(&self) -> bool {
        let url = match self.url("-/healthy") {
            Ok(url) => url,
            Err(_) => return false,
        };

        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

fn parse_value(raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| ExporterError::Query(format!("invalid sample value '{}'", raw)))
}
