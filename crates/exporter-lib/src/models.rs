//! Core data models for the power exporter

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource whose power draw is modeled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    /// Processor package
    Cpu,
    /// Memory
    Mem,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Mem];

    /// Value of the `resource` label on exported series
    pub fn as_label(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Mem => "mem",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Load levels at which every calibration curve is measured
pub const CALIBRATION_LOADS: [f64; 4] = [0.0, 10.0, 50.0, 100.0];

/// A (load-percent, watts) measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub load_percent: f64,
    pub watts: f64,
}

/// Per-instance load readings from the metrics backend
///
/// A reading left at `None` means the query returned no usable series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub cpu_load: Option<f64>,
    pub mem_load: Option<f64>,
}

impl NodeLoad {
    /// Both readings present
    pub fn complete(&self) -> Option<(f64, f64)> {
        Some((self.cpu_load?, self.mem_load?))
    }
}

/// Hardware identity of a node resolved from the orchestration API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_name: String,
    pub instance_type: String,
    pub region: String,
}

/// Power estimate for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerEstimate {
    pub cpu_watts: f64,
    pub mem_watts: f64,
    pub total_watts: f64,
}

impl PowerEstimate {
    pub fn new(cpu_watts: f64, mem_watts: f64) -> Self {
        Self {
            cpu_watts,
            mem_watts,
            total_watts: cpu_watts + mem_watts,
        }
    }

    pub fn watts(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_watts,
            Resource::Mem => self.mem_watts,
        }
    }
}

/// Strip the port from a time-series instance identifier
///
/// `10.0.1.5:9100` becomes `10.0.1.5`, `[fd00::1]:9100` becomes `fd00::1`.
pub fn instance_address(instance: &str) -> &str {
    if let Some(rest) = instance.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match instance.split_once(':') {
        Some((host, _)) => host,
        None => instance,
    }
}
