//! Node Power Exporter
//!
//! Estimates the power draw of each cluster node from its processor and
//! memory utilization and exports it as a Prometheus gauge.

use anyhow::{Context, Result};
use exporter_lib::{
    backend::{connect_with_retry, PrometheusClient, RetryPolicy},
    calibration::CalibrationTable,
    collector::{LoadCollector, LoadQueries},
    health::{components, ExporterState, HealthRegistry},
    observability::{ExporterMetrics, StructuredLogger},
    reconcile::{IdentityReconciler, KubeInventory},
    PowerEstimator, PowerGauge, PowerModel,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting node-power-exporter");

    let config = config::ExporterConfig::load()?;
    info!(
        prometheus = %config.prometheus_url(),
        calibration = %config.calibration_path.display(),
        port = config.exporter_port,
        "Exporter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_BACKEND).await;
    health_registry.register(components::INVENTORY).await;
    health_registry.register(components::ESTIMATOR).await;

    let metrics = ExporterMetrics::new();
    metrics.set_state(ExporterState::Unconnected);

    let table = CalibrationTable::load(&config.calibration_path)
        .with_context(|| format!("Failed to load {}", config.calibration_path.display()))?;
    let model = Arc::new(PowerModel::from_table(&table));

    // Probes and readiness are served while the backend is still being reached
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), model.clone()));
    let api_handle = tokio::spawn(api::serve(config.exporter_port, app_state));

    let backend = Arc::new(PrometheusClient::new(
        &config.prometheus_url(),
        config.query_timeout(),
    )?);
    let logger = StructuredLogger::new(config.prometheus_url());

    let retry = RetryPolicy {
        attempts: config.connect_retries,
        interval: config.connect_retry_interval(),
    };
    if let Err(e) = connect_with_retry(backend.as_ref(), &retry).await {
        error!(error = %e, "Giving up on metrics backend");
        health_registry
            .set_unhealthy(components::METRICS_BACKEND, e.to_string())
            .await;
        health_registry.set_state(ExporterState::Fatal).await;
        metrics.set_state(ExporterState::Fatal);
        return Err(e).context("Metrics backend unreachable");
    }
    health_registry.set_state(ExporterState::Connected).await;
    metrics.set_state(ExporterState::Connected);

    let inventory = KubeInventory::connect(config.query_timeout())
        .await
        .context("Failed to create Kubernetes client")?;

    let gauge = PowerGauge::register(&config.metric_name, prometheus::default_registry())
        .with_context(|| format!("Failed to register gauge {}", config.metric_name))?;

    logger.log_startup(
        EXPORTER_VERSION,
        model.instance_types().count(),
        config.polling_interval_secs,
    );

    let estimator = PowerEstimator::builder()
        .collector(LoadCollector::new(
            backend,
            LoadQueries::new(config.node_exporter_job.clone()),
        ))
        .reconciler(IdentityReconciler::new(
            Arc::new(inventory),
            config.address_source.deriver(),
        ))
        .model(model)
        .gauge(gauge)
        .health(health_registry)
        .logger(logger)
        .interval(config.polling_interval())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let estimator_handle = tokio::spawn(estimator.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    estimator_handle.await?;
    api_handle.abort();

    Ok(())
}
