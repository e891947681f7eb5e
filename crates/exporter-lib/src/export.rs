//! Exported node power gauge

use crate::models::{PowerEstimate, Resource};
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::BTreeSet;
use tracing::debug;

pub const DEFAULT_METRIC_NAME: &str = "node_power_usage";

const HELP: &str = "latest node power usage in watts";

/// Gauge family labeled by node address and resource
///
/// Values are stored per series as atomics by the prometheus crate, so a
/// scrape can read while a cycle writes.
#[derive(Clone)]
pub struct PowerGauge {
    gauge: GaugeVec,
}

impl PowerGauge {
    pub const LABELS: [&'static str; 2] = ["node", "resource"];

    /// Create the gauge family and register it
    pub fn register(metric_name: &str, registry: &Registry) -> prometheus::Result<Self> {
        let gauge = GaugeVec::new(Opts::new(metric_name, HELP), &Self::LABELS)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(Self { gauge })
    }

    /// Set the cpu and mem series for a node
    pub fn publish(&self, node: &str, estimate: &PowerEstimate) {
        for resource in Resource::ALL {
            self.gauge
                .with_label_values(&[node, resource.as_label()])
                .set(estimate.watts(resource));
        }
    }

    /// Drop the series of a node that is no longer estimated
    pub fn remove(&self, node: &str) {
        for resource in Resource::ALL {
            // Absent series are not an error worth surfacing
            if self
                .gauge
                .remove_label_values(&[node, resource.as_label()])
                .is_ok()
            {
                debug!(node = %node, resource = %resource, "Removed stale power series");
            }
        }
    }

    /// Remove every node in `previous` that is missing from `current`
    pub fn retain(&self, previous: &BTreeSet<String>, current: &BTreeSet<String>) {
        for node in previous.difference(current) {
            self.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(registry: &Registry, node: &str, resource: &str) -> Option<f64> {
        registry
            .gather()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|m| {
                let labels = m.get_label();
                labels.iter().any(|l| l.get_name() == "node" && l.get_value() == node)
                    && labels
                        .iter()
                        .any(|l| l.get_name() == "resource" && l.get_value() == resource)
            })
            .map(|m| m.get_gauge().get_value())
    }

    #[test]
    fn test_publish_sets_both_series() {
        let registry = Registry::new();
        let gauge = PowerGauge::register("test_node_power", &registry).unwrap();

        gauge.publish("10.0.1.5", &PowerEstimate::new(75.0, 8.5));

        assert_eq!(value(&registry, "10.0.1.5", "cpu"), Some(75.0));
        assert_eq!(value(&registry, "10.0.1.5", "mem"), Some(8.5));
        assert_eq!(registry.gather()[0].get_name(), "test_node_power");
    }

    #[test]
    fn test_publish_overwrites() {
        let registry = Registry::new();
        let gauge = PowerGauge::register("test_node_power", &registry).unwrap();

        gauge.publish("10.0.1.5", &PowerEstimate::new(75.0, 8.5));
        gauge.publish("10.0.1.5", &PowerEstimate::new(-1.5, 9.0));

        assert_eq!(value(&registry, "10.0.1.5", "cpu"), Some(-1.5));
    }

    #[test]
    fn test_retain_removes_departed_nodes() {
        let registry = Registry::new();
        let gauge = PowerGauge::register("test_node_power", &registry).unwrap();

        gauge.publish("10.0.1.5", &PowerEstimate::new(1.0, 1.0));
        gauge.publish("10.0.1.6", &PowerEstimate::new(2.0, 2.0));

        let previous: BTreeSet<String> = ["10.0.1.5".to_string(), "10.0.1.6".to_string()].into();
        let current: BTreeSet<String> = ["10.0.1.6".to_string()].into();
        gauge.retain(&previous, &current);

        assert_eq!(value(&registry, "10.0.1.5", "cpu"), None);
        assert_eq!(value(&registry, "10.0.1.6", "mem"), Some(2.0));

        // removing an unknown node is a no-op
        gauge.remove("10.9.9.9");
    }

    #[test]
    fn test_invalid_metric_name() {
        let registry = Registry::new();
        assert!(PowerGauge::register("node power", &registry).is_err());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        PowerGauge::register("test_node_power", &registry).unwrap();
        assert!(PowerGauge::register("test_node_power", &registry).is_err());
    }
}
