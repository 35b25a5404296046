//! Piecewise-linear interpolation over a 1-D grid.
//!
//! The node coordinates are sorted on construction; duplicates and non-finite
//! values are rejected because they make the interpolant ambiguous. Outside the
//! grid the first/last segment is extended linearly.

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearSpline {
    /// Build the spline, sorting `(x, y)` pairs by `x`.
    pub fn new(name: &str, xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.is_empty() || ys.is_empty() {
            return Err(ModelError::data_shape(name, "grid is empty"));
        }
        if xs.len() != ys.len() {
            return Err(ModelError::data_shape(
                name,
                format!("{} coordinates for {} values", xs.len(), ys.len()),
            ));
        }
        if xs.len() < 2 {
            return Err(ModelError::data_shape(name, "a 1-D grid needs at least 2 points"));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::data_shape(name, "non-finite grid entry"));
        }

        let mut pairs: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(ModelError::data_shape(name, "duplicate grid coordinate"));
        }

        let (xs, ys) = pairs.into_iter().unzip();
        Ok(Self { xs, ys })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.xs
    }

    pub fn values(&self) -> &[f64] {
        &self.ys
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        // Index of the segment [xs[i], xs[i+1]] used for x (clamped to the end segments).
        let i = match self.xs.partition_point(|&node| node <= x) {
            0 => 0,
            k if k >= n => n - 2,
            k => k - 1,
        };
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let t = (x - x0) / (x1 - x0);
        y0 + t * (y1 - y0)
    }
}
