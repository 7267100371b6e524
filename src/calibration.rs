//! Piecewise-linear calibration curves.
//!
//! A curve maps a measured distance (cm from the sensor to the powder
//! surface) to an estimated remaining quantity. Probes outside the curve
//! clamp to the nearest end point.

use serde::{Deserialize, Serialize};

/// Errors raised when building a [`CalibrationCurve`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    /// The curve has no points.
    #[error("calibration curve has no points")]
    Empty,
    /// A coordinate is NaN or infinite.
    #[error("calibration point ({x}, {y}) is not finite")]
    NonFinite {
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },
}

/// An ordered set of `(x, y)` calibration points, ascending by `x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct CalibrationCurve {
    points: Vec<(f64, f64)>,
}

impl CalibrationCurve {
    /// Build a curve, sorting the points by `x`.
    ///
    /// # Errors
    ///
    /// Returns [`CurveError`] if `points` is empty or holds a non-finite
    /// coordinate.
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self, CurveError> {
        if points.is_empty() {
            return Err(CurveError::Empty);
        }
        if let Some(&(x, y)) = points.iter().find(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(CurveError::NonFinite { x, y });
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { points })
    }

    /// Default powder hopper curve: cm from sensor → grams remaining.
    pub fn default_powder() -> Self {
        Self {
            points: vec![(0.0, 20_000.0), (5.0, 15_000.0), (10.0, 10_000.0), (25.0, 0.0)],
        }
    }

    /// The calibration points in ascending `x` order.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Interpolate `y` for the probe `x`.
    pub fn interpolate(&self, x: f64) -> f64 {
        interpolate(&self.points, x)
    }
}

impl TryFrom<Vec<(f64, f64)>> for CalibrationCurve {
    type Error = CurveError;

    fn try_from(points: Vec<(f64, f64)>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<CalibrationCurve> for Vec<(f64, f64)> {
    fn from(curve: CalibrationCurve) -> Self {
        curve.points
    }
}

/// Linear interpolation over points sorted ascending by `x`.
///
/// Equal-`x` neighbours return the lower point's `y`. An empty slice
/// yields `0.0`.
pub fn interpolate(points: &[(f64, f64)], x: f64) -> f64 {
    let (Some(&(first_x, first_y)), Some(&(last_x, last_y))) = (points.first(), points.last())
    else {
        return 0.0;
    };

    if x <= first_x {
        return first_y;
    }
    if x >= last_x {
        return last_y;
    }

    for pair in points.windows(2) {
        let [(x1, y1), (x2, y2)] = [pair[0], pair[1]];
        if x1 <= x && x <= x2 {
            if x2 == x1 {
                return y1;
            }
            let ratio = (x - x1) / (x2 - x1);
            return y1 + (y2 - y1) * ratio;
        }
    }

    0.0
}
