//! Estimation and export loop
//!
//! Each cycle discovers the reporting instances, then collects their loads
//! and resolves their hardware identity concurrently. Instances with both
//! halves present are estimated and published; the rest are left out until
//! a later cycle sees them whole.

use crate::collector::LoadCollector;
use crate::error::ExporterError;
use crate::export::PowerGauge;
use crate::health::{components, ExporterState, HealthRegistry};
use crate::model::PowerModel;
use crate::models::{instance_address, NodeLoad, PowerEstimate};
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::reconcile::{IdentityReconciler, Reconciliation};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default polling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one estimation cycle
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    /// Instances discovered in the metrics backend
    pub instances: usize,
    /// Published estimates keyed by node address
    pub published: BTreeMap<String, PowerEstimate>,
    /// Nodes excluded by a reconciliation or estimation error
    pub skipped: usize,
}

/// Periodically estimates node power and updates the exported gauge
pub struct PowerEstimator {
    collector: LoadCollector,
    reconciler: IdentityReconciler,
    model: Arc<PowerModel>,
    gauge: PowerGauge,
    health: HealthRegistry,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
    interval: Duration,
    /// Node labels published by the previous cycle
    exported: BTreeSet<String>,
}

impl PowerEstimator {
    pub fn builder() -> EstimatorBuilder {
        EstimatorBuilder::new()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles on the configured interval until shutdown is signalled
    ///
    /// A cycle in progress when the signal arrives runs to completion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting power estimation loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Run a single collection, reconciliation and estimation pass
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        self.transition(ExporterState::Polling).await;

        let report = match self.collector.discover_instances().await {
            Ok(instances) => self.estimate_instances(&instances).await,
            Err(e) => {
                warn!(error = %e, "Instance discovery failed, nothing published this cycle");
                self.metrics.inc_query_errors(1);
                self.health
                    .set_degraded(components::METRICS_BACKEND, e.to_string())
                    .await;
                CycleReport::default()
            }
        };

        let current: BTreeSet<String> = report.published.keys().cloned().collect();
        self.gauge.retain(&self.exported, &current);
        self.exported = current;

        let elapsed = start.elapsed();
        self.metrics
            .observe_cycle(elapsed.as_secs_f64(), report.published.len());
        self.logger.log_cycle(
            report.instances,
            report.published.len(),
            report.skipped,
            elapsed.as_millis(),
        );
        self.health.set_healthy(components::ESTIMATOR).await;
        self.transition(ExporterState::Idle).await;

        report
    }

    async fn estimate_instances(&self, instances: &BTreeSet<String>) -> CycleReport {
        let (loads, reconciliation) = tokio::join!(
            self.collector.collect(Some(instances)),
            self.reconciler.reconcile(instances)
        );

        let loads = match loads {
            Ok(loads) => loads,
            Err(e) => {
                warn!(error = %e, "Load collection failed");
                BTreeMap::new()
            }
        };
        self.record_backend_health(instances, &loads).await;

        let reconciliation = match reconciliation {
            Ok(reconciliation) => {
                self.health.set_healthy(components::INVENTORY).await;
                reconciliation
            }
            Err(e) => {
                warn!(error = %e, "Node inventory unavailable, nothing published this cycle");
                self.health
                    .set_degraded(components::INVENTORY, e.to_string())
                    .await;
                Reconciliation::default()
            }
        };

        let mut report = CycleReport {
            instances: instances.len(),
            ..Default::default()
        };

        for error in &reconciliation.skipped {
            self.metrics.inc_skipped(error.code());
            report.skipped += 1;
        }

        for (instance, load) in &loads {
            let Some((cpu_load, mem_load)) = load.complete() else {
                debug!(instance = %instance, "Incomplete load readings, skipping this cycle");
                continue;
            };
            let Some(identity) = reconciliation.identities.get(instance) else {
                debug!(instance = %instance, "No matching cluster node, skipping this cycle");
                continue;
            };

            match self
                .model
                .estimate_power(&identity.instance_type, cpu_load, mem_load)
            {
                Ok(estimate) => {
                    let node = instance_address(instance);
                    self.gauge.publish(node, &estimate);
                    self.logger.log_estimate(
                        instance,
                        &identity.node_name,
                        &identity.instance_type,
                        &identity.region,
                        cpu_load,
                        mem_load,
                        &estimate,
                    );
                    report.published.insert(node.to_string(), estimate);
                }
                Err(e) => self.skip(instance, &identity.instance_type, &e, &mut report),
            }
        }

        report
    }

    fn skip(&self, instance: &str, instance_type: &str, error: &ExporterError, report: &mut CycleReport) {
        self.logger
            .log_node_skipped(instance, Some(instance_type), error);
        self.metrics.inc_skipped(error.code());
        report.skipped += 1;
    }

    async fn record_backend_health(&self, instances: &BTreeSet<String>, loads: &BTreeMap<String, NodeLoad>) {
        let missing: usize = loads
            .values()
            .map(|l| usize::from(l.cpu_load.is_none()) + usize::from(l.mem_load.is_none()))
            .sum();
        self.metrics.inc_query_errors(missing);

        let usable = loads.values().any(|l| l.complete().is_some());
        if instances.is_empty() || usable {
            self.health.set_healthy(components::METRICS_BACKEND).await;
        } else {
            self.health
                .set_degraded(
                    components::METRICS_BACKEND,
                    format!("no usable load readings for {} instances", instances.len()),
                )
                .await;
        }
    }

    async fn transition(&self, state: ExporterState) {
        let previous = self.health.set_state(state).await;
        self.metrics.set_state(state);
        if previous != state {
            self.logger.log_state(previous, state);
        }
    }
}

/// Builder for [`PowerEstimator`]
pub struct EstimatorBuilder {
    collector: Option<LoadCollector>,
    reconciler: Option<IdentityReconciler>,
    model: Option<Arc<PowerModel>>,
    gauge: Option<PowerGauge>,
    health: HealthRegistry,
    logger: Option<StructuredLogger>,
    interval: Duration,
}

impl EstimatorBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            reconciler: None,
            model: None,
            gauge: None,
            health: HealthRegistry::new(),
            logger: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn collector(mut self, collector: LoadCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn reconciler(mut self, reconciler: IdentityReconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn model(mut self, model: Arc<PowerModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn gauge(mut self, gauge: PowerGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Share a health registry with the HTTP surface
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> Result<PowerEstimator> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Load collector is required"))?;
        let reconciler = self
            .reconciler
            .ok_or_else(|| anyhow::anyhow!("Identity reconciler is required"))?;
        let model = self
            .model
            .ok_or_else(|| anyhow::anyhow!("Power model is required"))?;
        let gauge = self
            .gauge
            .ok_or_else(|| anyhow::anyhow!("Power gauge is required"))?;
        if self.interval.is_zero() {
            anyhow::bail!("Polling interval must be positive");
        }

        Ok(PowerEstimator {
            collector,
            reconciler,
            model,
            gauge,
            health: self.health,
            metrics: ExporterMetrics::new(),
            logger: self.logger.unwrap_or_else(|| StructuredLogger::new("unknown")),
            interval: self.interval,
            exported: BTreeSet::new(),
        })
    }
}

impl Default for EstimatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
