//! Health tracking for the power exporter
//!
//! Components report their own health; readiness follows the exporter
//! lifecycle state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing this cycle but expected to recover
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Lifecycle of the exporter
///
/// Discriminants are exported as the value of the state gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterState {
    /// Metrics backend not reached yet
    Unconnected = 0,
    Connected = 1,
    /// A cycle is running
    Polling = 2,
    /// Waiting for the next tick
    Idle = 3,
    /// Startup failed and the process is exiting
    Fatal = 4,
}

impl ExporterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterState::Unconnected => "unconnected",
            ExporterState::Connected => "connected",
            ExporterState::Polling => "polling",
            ExporterState::Idle => "idle",
            ExporterState::Fatal => "fatal",
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, ExporterState::Unconnected | ExporterState::Fatal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub state: ExporterState,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub state: ExporterState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const METRICS_BACKEND: &str = "metrics_backend";
    pub const INVENTORY: &str = "inventory";
    pub const ESTIMATOR: &str = "estimator";
}

/// Shared component health and exporter state
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    state: Arc<RwLock<ExporterState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
            state: Arc::new(RwLock::new(ExporterState::Unconnected)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Move to `state`, returning the previous one
    pub async fn set_state(&self, state: ExporterState) -> ExporterState {
        let mut current = self.state.write().await;
        std::mem::replace(&mut *current, state)
    }

    pub async fn state(&self) -> ExporterState {
        *self.state.read().await
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse {
            status,
            state: self.state().await,
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state().await;
        let reason = match state {
            ExporterState::Unconnected => Some("Metrics backend not connected yet".to_string()),
            ExporterState::Fatal => Some("Exporter failed to start".to_string()),
            _ => None,
        };

        ReadinessResponse {
            ready: state.is_ready(),
            state,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.state, ExporterState::Unconnected);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_then_recovered() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_BACKEND).await;
        registry.register(components::INVENTORY).await;

        registry
            .set_degraded(components::INVENTORY, "node list timed out")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::INVENTORY].message.as_deref(),
            Some("node list timed out")
        );

        registry.set_healthy(components::INVENTORY).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_unhealthy_dominates() {
        let registry = HealthRegistry::new();
        registry.set_degraded(components::INVENTORY, "slow").await;
        registry
            .set_unhealthy(components::METRICS_BACKEND, "connection refused")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        assert_eq!(
            registry.set_state(ExporterState::Connected).await,
            ExporterState::Unconnected
        );
        assert!(registry.readiness().await.ready);

        registry.set_state(ExporterState::Polling).await;
        assert!(registry.readiness().await.ready);

        registry.set_state(ExporterState::Fatal).await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.state, ExporterState::Fatal);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExporterState::Idle).unwrap(),
            "\"idle\""
        );
        assert_eq!(ExporterState::Polling as i64, 2);
        assert!(ComponentStatus::Degraded.is_operational());
        assert!(!ComponentStatus::Unhealthy.is_operational());
    }
}
