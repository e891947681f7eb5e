//! Per-node load collection from the metrics backend
//!
//! For every instance reporting node-exporter series, reads the 1-minute
//! load average relative to core count and the share of memory in use.
//! A reading whose query fails or returns nothing stays unset, which
//! excludes the instance from estimation for that cycle only.

mod queries;

pub use queries::{LoadQueries, DEFAULT_JOB, DISCOVERY_QUERY};

use crate::backend::{MetricsBackend, Sample};
use crate::error::{ExporterError, Result};
use crate::models::NodeLoad;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Label carrying the scrape target address
pub const INSTANCE_LABEL: &str = "instance";

/// Collects node loads through a [`MetricsBackend`]
pub struct LoadCollector {
    backend: Arc<dyn MetricsBackend>,
    queries: LoadQueries,
}

impl LoadCollector {
    pub fn new(backend: Arc<dyn MetricsBackend>, queries: LoadQueries) -> Self {
        Self { backend, queries }
    }

    /// Distinct instance identifiers currently reporting load
    pub async fn discover_instances(&self) -> Result<BTreeSet<String>> {
        let samples = self.backend.query(DISCOVERY_QUERY).await?;
        let instances: BTreeSet<String> = samples
            .iter()
            .filter_map(|s| s.label(INSTANCE_LABEL))
            .map(str::to_string)
            .collect();

        debug!(count = instances.len(), "Discovered instances");
        Ok(instances)
    }

    /// Read loads for the given instances, discovering them when `None`
    pub async fn collect(
        &self,
        known_instances: Option<&BTreeSet<String>>,
    ) -> Result<BTreeMap<String, NodeLoad>> {
        let discovered;
        let instances = match known_instances {
            Some(instances) => instances,
            None => {
                discovered = self.discover_instances().await?;
                &discovered
            }
        };

        let mut loads = BTreeMap::new();
        for instance in instances {
            loads.insert(instance.clone(), self.collect_instance(instance).await);
        }
        Ok(loads)
    }

    async fn collect_instance(&self, instance: &str) -> NodeLoad {
        let cpu_query = self.queries.cpu_load(instance);
        let mem_query = self.queries.mem_load(instance);
        let (cpu, mem) = tokio::join!(
            self.backend.query(&cpu_query),
            self.backend.query(&mem_query)
        );

        NodeLoad {
            cpu_load: reading(instance, "cpu_load", cpu),
            mem_load: reading(instance, "mem_load", mem),
        }
    }
}

fn reading(instance: &str, metric: &str, result: Result<Vec<Sample>>) -> Option<f64> {
    match result.and_then(|samples| single_value(&samples)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                instance = %instance,
                metric = %metric,
                reason = %e,
                "Load reading unavailable, instance excluded this cycle"
            );
            None
        }
    }
}

/// The value of an aggregate query's single series
fn single_value(samples: &[Sample]) -> Result<f64> {
    let sample = samples
        .first()
        .ok_or_else(|| ExporterError::Query("no series returned".to_string()))?;

    if !sample.value.is_finite() {
        return Err(ExporterError::Query(format!(
            "non-finite value {}",
            sample.value
        )));
    }
    Ok(sample.value)
}
