//! Node power estimation library
//!
//! This crate provides the core functionality for:
//! - Calibration table loading and quadratic curve fitting
//! - Per-node load collection from a Prometheus-compatible backend
//! - Reconciling metrics instances with cluster node identity
//! - The periodic estimation loop and the exported power gauge
//! - Health checks and observability

pub mod backend;
pub mod calibration;
pub mod collector;
pub mod error;
pub mod estimator;
pub mod export;
pub mod health;
pub mod model;
pub mod models;
pub mod observability;
pub mod reconcile;

pub use error::{ExporterError, Result};
pub use estimator::{CycleReport, EstimatorBuilder, PowerEstimator};
pub use export::PowerGauge;
pub use health::{
    ComponentHealth, ComponentStatus, ExporterState, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use model::PowerModel;
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
