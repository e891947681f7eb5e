//! Per-instance-type calibration table
//!
//! Reads the tabular dataset of measured power at 0%, 10%, 50% and 100%
//! load for the processor package and memory of each instance type.
//! Values may use a decimal comma (`"12,5"`).

use crate::error::{ExporterError, Result};
use crate::models::{CalibrationPoint, Resource, CALIBRATION_LOADS};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Column holding the instance type identifier
pub const INDEX_COLUMN: &str = "Instance type";

/// Processor package columns, ordered by load level
pub const CPU_COLUMNS: [&str; 4] = [
    "PkgWatt @ Idle",
    "PkgWatt @ 10%",
    "PkgWatt @ 50%",
    "PkgWatt @ 100%",
];

/// Memory columns, ordered by load level
pub const MEM_COLUMNS: [&str; 4] = [
    "RAMWatt @ Idle",
    "RAMWatt @ 10%",
    "RAMWatt @ 50%",
    "RAMWatt @ 100%",
];

/// Calibration curves for one instance type
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurves {
    pub cpu: [CalibrationPoint; 4],
    pub mem: [CalibrationPoint; 4],
}

impl CalibrationCurves {
    /// Build curves from watts measured at the four calibration loads
    pub fn from_watts(cpu: [f64; 4], mem: [f64; 4]) -> Self {
        Self {
            cpu: to_points(cpu),
            mem: to_points(mem),
        }
    }

    pub fn points(&self, resource: Resource) -> &[CalibrationPoint; 4] {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Mem => &self.mem,
        }
    }
}

fn to_points(watts: [f64; 4]) -> [CalibrationPoint; 4] {
    let mut points = [CalibrationPoint {
        load_percent: 0.0,
        watts: 0.0,
    }; 4];
    for (i, point) in points.iter_mut().enumerate() {
        point.load_percent = CALIBRATION_LOADS[i];
        point.watts = watts[i];
    }
    points
}

/// Immutable mapping from instance type to calibration curves
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    curves: BTreeMap<String, CalibrationCurves>,
}

impl CalibrationTable {
    /// Load the table from a CSV file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            ExporterError::DataLoad(format!("cannot open {}: {}", path.display(), e))
        })?;
        let table = Self::from_reader(file)?;

        info!(
            path = %path.display(),
            instance_types = table.len(),
            "Loaded calibration table"
        );
        Ok(table)
    }

    /// Parse the table from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ExporterError::DataLoad(format!("missing column '{}'", name)))
        };

        let index = column(INDEX_COLUMN)?;
        let cpu_idx = CPU_COLUMNS
            .iter()
            .map(|c| column(*c))
            .collect::<Result<Vec<_>>>()?;
        let mem_idx = MEM_COLUMNS
            .iter()
            .map(|c| column(*c))
            .collect::<Result<Vec<_>>>()?;

        let mut curves = BTreeMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let instance_type = record.get(index).unwrap_or_default();
            if instance_type.is_empty() {
                return Err(ExporterError::DataLoad(format!(
                    "row {} has no '{}'",
                    row + 1,
                    INDEX_COLUMN
                )));
            }

            let read_watts = |columns: &[usize], names: &[&str; 4]| -> Result<[f64; 4]> {
                let mut watts = [0.0; 4];
                for (i, &col) in columns.iter().enumerate() {
                    let raw = record.get(col).unwrap_or_default();
                    watts[i] = parse_watts(raw).ok_or_else(|| {
                        ExporterError::DataLoad(format!(
                            "invalid value '{}' in column '{}' for {}",
                            raw, names[i], instance_type
                        ))
                    })?;
                }
                Ok(watts)
            };

            let entry = CalibrationCurves::from_watts(
                read_watts(&cpu_idx, &CPU_COLUMNS)?,
                read_watts(&mem_idx, &MEM_COLUMNS)?,
            );

            if curves.contains_key(instance_type) {
                warn!(
                    instance_type = %instance_type,
                    "Duplicate calibration row, keeping the first"
                );
                continue;
            }
            curves.insert(instance_type.to_string(), entry);
        }

        if curves.is_empty() {
            return Err(ExporterError::DataLoad("calibration table is empty".into()));
        }

        Ok(Self { curves })
    }

    pub fn get(&self, instance_type: &str) -> Option<&CalibrationCurves> {
        self.curves.get(instance_type)
    }

    pub fn contains(&self, instance_type: &str) -> bool {
        self.curves.contains_key(instance_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CalibrationCurves)> {
        self.curves.iter()
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

impl FromIterator<(String, CalibrationCurves)> for CalibrationTable {
    fn from_iter<I: IntoIterator<Item = (String, CalibrationCurves)>>(iter: I) -> Self {
        Self {
            curves: iter.into_iter().collect(),
        }
    }
}

/// Parse a watt value, accepting a decimal comma
fn parse_watts(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().replace(',', ".").parse().ok()?;
    value.is_finite().then_some(value)
}
