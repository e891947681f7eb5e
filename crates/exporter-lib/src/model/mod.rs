//! Power estimation model
//!
//! Each instance type's processor and memory calibration curves are fitted
//! once, when the model is built from the calibration table. Lookups then
//! evaluate the fitted quadratic at the clamped load.
//!
//! Fitted values are not floored: a curve that extrapolates below zero at
//! low load returns a negative wattage.

mod fit;

pub use fit::{fit_quadratic, FittedCurve};

use crate::calibration::{CalibrationCurves, CalibrationTable};
use crate::error::{ExporterError, Result};
use crate::models::{CalibrationPoint, PowerEstimate, Resource};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Step between sampled points in a curve report, in load percent
pub const SAMPLE_STEP: usize = 1;

/// Clamp a load reading to the calibrated range
///
/// The value is truncated to a whole percent to match calibration
/// granularity, then bounded to [0, 100]. NaN maps to 0.
pub fn clamp_load(load_percent: f64) -> f64 {
    if load_percent.is_nan() {
        return 0.0;
    }
    load_percent.trunc().clamp(0.0, 100.0)
}

#[derive(Debug, Clone)]
struct FittedModel {
    calibration: CalibrationCurves,
    cpu: std::result::Result<FittedCurve, ExporterError>,
    mem: std::result::Result<FittedCurve, ExporterError>,
}

impl FittedModel {
    fn curve(&self, resource: Resource) -> Result<&FittedCurve> {
        let fitted = match resource {
            Resource::Cpu => &self.cpu,
            Resource::Mem => &self.mem,
        };
        fitted.as_ref().map_err(Clone::clone)
    }
}

/// Fitted curve with its source points, for inspection
#[derive(Debug, Clone, Serialize)]
pub struct CurveReport {
    pub instance_type: String,
    pub resource: Resource,
    pub coefficients: FittedCurve,
    pub calibration: Vec<CalibrationPoint>,
    pub samples: Vec<CalibrationPoint>,
}

/// Immutable map from instance type to fitted curves
#[derive(Debug, Clone, Default)]
pub struct PowerModel {
    models: BTreeMap<String, FittedModel>,
}

impl PowerModel {
    /// Fit every curve in the table
    ///
    /// A curve that cannot be fitted only disables lookups for that
    /// instance type and resource.
    pub fn from_table(table: &CalibrationTable) -> Self {
        let models = table
            .iter()
            .map(|(instance_type, curves)| {
                let fit = |resource: Resource| {
                    fit_quadratic(curves.points(resource)).map_err(|reason| {
                        warn!(
                            instance_type = %instance_type,
                            resource = %resource,
                            reason = %reason,
                            "Could not fit calibration curve"
                        );
                        ExporterError::Fit {
                            model: instance_type.clone(),
                            reason,
                        }
                    })
                };

                let model = FittedModel {
                    calibration: curves.clone(),
                    cpu: fit(Resource::Cpu),
                    mem: fit(Resource::Mem),
                };
                (instance_type.clone(), model)
            })
            .collect::<BTreeMap<_, _>>();

        debug!(instance_types = models.len(), "Fitted power model");
        Self { models }
    }

    pub fn contains(&self, instance_type: &str) -> bool {
        self.models.contains_key(instance_type)
    }

    pub fn instance_types(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    fn model(&self, instance_type: &str) -> Result<&FittedModel> {
        self.models
            .get(instance_type)
            .ok_or_else(|| ExporterError::UnknownModel(instance_type.to_string()))
    }

    /// Watts drawn by one resource at the given load percent
    pub fn estimate(&self, instance_type: &str, resource: Resource, load_percent: f64) -> Result<f64> {
        let curve = self.model(instance_type)?.curve(resource)?;
        Ok(curve.watts_at(clamp_load(load_percent)))
    }

    /// Processor, memory and total watts for a node
    pub fn estimate_power(&self, instance_type: &str, cpu_load: f64, mem_load: f64) -> Result<PowerEstimate> {
        let cpu_watts = self.estimate(instance_type, Resource::Cpu, cpu_load)?;
        let mem_watts = self.estimate(instance_type, Resource::Mem, mem_load)?;
        Ok(PowerEstimate::new(cpu_watts, mem_watts))
    }

    /// Coefficients, calibration points and fitted samples over [0, 100)
    pub fn curve(&self, instance_type: &str, resource: Resource) -> Result<CurveReport> {
        let model = self.model(instance_type)?;
        let curve = *model.curve(resource)?;

        let samples = (0..100)
            .step_by(SAMPLE_STEP)
            .map(|x| {
                let load_percent = x as f64;
                CalibrationPoint {
                    load_percent,
                    watts: curve.watts_at(load_percent),
                }
            })
            .collect();

        Ok(CurveReport {
            instance_type: instance_type.to_string(),
            resource,
            coefficients: curve,
            calibration: model.calibration.points(resource).to_vec(),
            samples,
        })
    }
}
