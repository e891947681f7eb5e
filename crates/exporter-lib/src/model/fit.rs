//! Least-squares quadratic fit of calibration points

use crate::models::CalibrationPoint;
use serde::Serialize;

/// Pivots smaller than this make the normal equations singular
const SINGULAR_EPSILON: f64 = 1e-12;

/// Loads are divided by this before fitting to keep the normal equations well conditioned
const LOAD_SCALE: f64 = 100.0;

/// Fitted curve `watts = a*x + b*x^2 + c` over load percent `x`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FittedCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl FittedCurve {
    pub fn watts_at(&self, load_percent: f64) -> f64 {
        self.a * load_percent + self.b * load_percent * load_percent + self.c
    }

    /// Sum of squared residuals against the given points
    pub fn residual_sum_of_squares(&self, points: &[CalibrationPoint]) -> f64 {
        points
            .iter()
            .map(|p| (self.watts_at(p.load_percent) - p.watts).powi(2))
            .sum()
    }
}

/// Fit a degree-2 polynomial to the points by ordinary least squares
///
/// With four points this is overdetermined, so the curve generally does
/// not pass through every point. Fails on non-finite input or when fewer
/// than three distinct loads are given.
pub fn fit_quadratic(points: &[CalibrationPoint]) -> Result<FittedCurve, String> {
    if points.len() < 3 {
        return Err(format!("need at least 3 points, got {}", points.len()));
    }
    if let Some(p) = points
        .iter()
        .find(|p| !p.load_percent.is_finite() || !p.watts.is_finite())
    {
        return Err(format!(
            "non-finite calibration point ({}, {})",
            p.load_percent, p.watts
        ));
    }

    // Normal equations (X^T X) beta = X^T y over the basis [1, u, u^2]
    let mut ata = [[0.0f64; 3]; 3];
    let mut aty = [0.0f64; 3];
    for p in points {
        let u = p.load_percent / LOAD_SCALE;
        let basis = [1.0, u, u * u];
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += basis[i] * basis[j];
            }
            aty[i] += basis[i] * p.watts;
        }
    }

    let [c0, c1, c2] = solve3(ata, aty).ok_or_else(|| {
        "calibration loads do not determine a quadratic (singular system)".to_string()
    })?;

    let curve = FittedCurve {
        a: c1 / LOAD_SCALE,
        b: c2 / (LOAD_SCALE * LOAD_SCALE),
        c: c0,
    };
    if !(curve.a.is_finite() && curve.b.is_finite() && curve.c.is_finite()) {
        return Err("fit produced non-finite coefficients".to_string());
    }
    Ok(curve)
}

/// Gaussian elimination with partial pivoting
fn solve3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&x, &y| m[x][col].abs().total_cmp(&m[y][col].abs()))?;
        if m[pivot][col].abs() < SINGULAR_EPSILON {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let tail: f64 = ((row + 1)..3).map(|k| m[row][k] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[row][row];
    }
    Some(x)
}
