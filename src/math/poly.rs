//! Polynomial functions of one or two coordinates.
//!
//! These are the "already fitted" smooth parameter functions: instead of
//! interpolating a parameter grid exactly, a low-order polynomial (`pol1`,
//! `pol2`, ...) is fit to the per-mass-point values with weights `1/err²`.
//! Coordinates are centered and scaled before fitting to keep the normal
//! equations well conditioned.

use serde::{Deserialize, Serialize};

use crate::domain::{Grid, GridAxes};
use crate::error::{ModelError, Result};
use crate::math::solve_weighted;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    /// `(i, j)` exponents of each term; `j` is always 0 in 1-D.
    terms: Vec<(u32, u32)>,
    coeffs: Vec<f64>,
    center: [f64; 2],
    scale: [f64; 2],
}

fn exponents(dim: usize, order: usize) -> Vec<(u32, u32)> {
    let order = order as u32;
    let mut out = Vec::new();
    for total in 0..=order {
        if dim == 1 {
            out.push((total, 0));
        } else {
            for j in 0..=total {
                out.push((total - j, j));
            }
        }
    }
    out
}

impl Polynomial {
    /// A 1-D polynomial `Σ c_k x^k` in the raw coordinate.
    pub fn from_coefficients(coeffs: Vec<f64>) -> Self {
        let terms = (0..coeffs.len() as u32).map(|k| (k, 0)).collect();
        Self {
            terms,
            coeffs,
            center: [0.0, 0.0],
            scale: [1.0, 1.0],
        }
    }

    /// Weighted least-squares fit of `grid` with a polynomial of total degree `order`.
    pub fn fit(name: &str, grid: &Grid, order: usize) -> Result<Self> {
        grid.validate(name)?;
        let dim = grid.axes.dim();
        let terms = exponents(dim, order);
        let n = grid.len();
        if n < terms.len() {
            return Err(ModelError::data_shape(
                name,
                format!("{n} points cannot determine a degree-{order} polynomial ({} terms)", terms.len()),
            ));
        }

        let (center, scale) = match &grid.axes {
            GridAxes::One(c) => {
                let (m, s) = center_scale(c);
                ([m, 0.0], [s, 1.0])
            }
            GridAxes::Two(c1, c2) => {
                let (m1, s1) = center_scale(c1);
                let (m2, s2) = center_scale(c2);
                ([m1, m2], [s1, s2])
            }
        };

        let mut poly = Self {
            terms,
            coeffs: Vec::new(),
            center,
            scale,
        };

        let p = poly.terms.len();
        let mut rows = Vec::with_capacity(n * p);
        for point in grid.points() {
            rows.extend(poly.basis(point.coords[0], point.coords[1]));
        }
        let weights: Vec<f64> = grid
            .points()
            .iter()
            .map(|pt| if pt.error > 0.0 { 1.0 / (pt.error * pt.error) } else { 1.0 })
            .collect();

        poly.coeffs = solve_weighted(&rows, p, &grid.values, &weights)
            .ok_or_else(|| ModelError::data_shape(name, "polynomial fit is ill-conditioned"))?;
        Ok(poly)
    }

    pub fn order(&self) -> u32 {
        self.terms.iter().map(|(i, j)| i + j).max().unwrap_or(0)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    fn basis(&self, x1: f64, x2: f64) -> Vec<f64> {
        let u = (x1 - self.center[0]) / self.scale[0];
        let v = (x2 - self.center[1]) / self.scale[1];
        self.terms
            .iter()
            .map(|&(i, j)| u.powi(i as i32) * v.powi(j as i32))
            .collect()
    }

    pub fn eval(&self, x1: f64, x2: f64) -> f64 {
        self.basis(x1, x2)
            .iter()
            .zip(&self.coeffs)
            .map(|(b, c)| b * c)
            .sum()
    }
}

fn center_scale(c: &[f64]) -> (f64, f64) {
    let lo = c.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = c.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let half = 0.5 * (hi - lo);
    (0.5 * (hi + lo), if half > 0.0 { half } else { 1.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exact_quadratic() {
        let xs = vec![4.0, 6.0, 8.0, 10.0, 15.0, 21.0];
        let ys: Vec<f64> = xs.iter().map(|x| 1.0 - 0.5 * x + 0.02 * x * x).collect();
        let poly = Polynomial::fit("sigma", &Grid::one_d(xs, ys), 2).unwrap();
        assert_eq!(poly.order(), 2);
        for x in [5.0, 12.0, 20.0] {
            let expect = 1.0 - 0.5 * x + 0.02 * x * x;
            assert!((poly.eval(x, 0.0) - expect).abs() < 1e-9);
        }
    }

    #[test]
    fn fits_two_dimensional_plane() {
        let c1 = vec![125.0, 250.0, 500.0, 125.0, 500.0];
        let c2 = vec![4.0, 7.0, 15.0, 15.0, 4.0];
        let v: Vec<f64> = c1.iter().zip(&c2).map(|(a, b)| 0.01 * a + b).collect();
        let poly = Polynomial::fit("mean", &Grid::two_d(c1, c2, v), 1).unwrap();
        assert!((poly.eval(300.0, 10.0) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_points_is_a_data_shape_error() {
        let grid = Grid::one_d(vec![1.0, 2.0], vec![1.0, 2.0]);
        assert!(matches!(
            Polynomial::fit("p", &grid, 2),
            Err(ModelError::DataShape { .. })
        ));
    }

    #[test]
    fn explicit_coefficients() {
        let poly = Polynomial::from_coefficients(vec![1.0, 2.0, 3.0]);
        assert_eq!(poly.eval(2.0, 0.0), 1.0 + 4.0 + 12.0);
    }
}
