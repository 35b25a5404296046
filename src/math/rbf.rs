//! Thin-plate radial-basis interpolation over a 2-D grid.
//!
//! ```text
//! f(u, v) = a0 + a1 u + a2 v + Σ_i w_i φ(|(u, v) - (u_i, v_i)|),   φ(r) = r² ln r
//! ```
//!
//! Coordinates are rescaled to the unit square per axis before solving so the two
//! masses (which can differ by orders of magnitude) weigh equally. The interpolant
//! is exact at the nodes and needs at least three non-collinear points.

use nalgebra::{DMatrix, DVector};

use crate::error::{ModelError, Result};
use crate::math::solve_least_squares;

#[derive(Debug, Clone, PartialEq)]
pub struct ThinPlateSpline {
    nodes: Vec<[f64; 2]>,
    weights: Vec<f64>,
    affine: [f64; 3],
    offset: [f64; 2],
    scale: [f64; 2],
}

fn phi(r2: f64) -> f64 {
    if r2 <= 0.0 { 0.0 } else { 0.5 * r2 * r2.ln() }
}

impl ThinPlateSpline {
    pub fn new(name: &str, c1: &[f64], c2: &[f64], values: &[f64]) -> Result<Self> {
        let n = values.len();
        if n == 0 {
            return Err(ModelError::data_shape(name, "grid is empty"));
        }
        if c1.len() != n || c2.len() != n {
            return Err(ModelError::data_shape(
                name,
                format!("coordinate arrays ({}, {}) do not match {n} values", c1.len(), c2.len()),
            ));
        }
        if n < 3 {
            return Err(ModelError::data_shape(name, "a 2-D grid needs at least 3 points"));
        }
        if c1.iter().chain(c2).chain(values).any(|v| !v.is_finite()) {
            return Err(ModelError::data_shape(name, "non-finite grid entry"));
        }

        let bounds = |c: &[f64]| {
            let lo = c.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = c.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let span = if hi > lo { hi - lo } else { 1.0 };
            (lo, span)
        };
        let (lo1, span1) = bounds(c1);
        let (lo2, span2) = bounds(c2);
        let offset = [lo1, lo2];
        let scale = [span1, span2];

        let nodes: Vec<[f64; 2]> = c1
            .iter()
            .zip(c2)
            .map(|(&a, &b)| [(a - lo1) / span1, (b - lo2) / span2])
            .collect();

        check_nodes(name, &nodes)?;

        let m = n + 3;
        let mut a = DMatrix::<f64>::zeros(m, m);
        let mut rhs = DVector::<f64>::zeros(m);
        for i in 0..n {
            for j in 0..n {
                a[(i, j)] = phi(dist2(nodes[i], nodes[j]));
            }
            let p = [1.0, nodes[i][0], nodes[i][1]];
            for k in 0..3 {
                a[(i, n + k)] = p[k];
                a[(n + k, i)] = p[k];
            }
            rhs[i] = values[i];
        }

        let sol = solve_least_squares(&a, &rhs)
            .ok_or_else(|| ModelError::data_shape(name, "interpolation system is singular"))?;

        Ok(Self {
            nodes,
            weights: sol.iter().take(n).copied().collect(),
            affine: [sol[n], sol[n + 1], sol[n + 2]],
            offset,
            scale,
        })
    }

    pub fn eval(&self, x1: f64, x2: f64) -> f64 {
        let u = [
            (x1 - self.offset[0]) / self.scale[0],
            (x2 - self.offset[1]) / self.scale[1],
        ];
        let radial: f64 = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(node, w)| w * phi(dist2(u, *node)))
            .sum();
        self.affine[0] + self.affine[1] * u[0] + self.affine[2] * u[1] + radial
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let du = a[0] - b[0];
    let dv = a[1] - b[1];
    du * du + dv * dv
}

fn check_nodes(name: &str, nodes: &[[f64; 2]]) -> Result<()> {
    const EPS: f64 = 1e-12;
    for i in 0..nodes.len() {
        for j in (i + 1)..nodes.len() {
            if dist2(nodes[i], nodes[j]) < EPS {
                return Err(ModelError::data_shape(name, "duplicate grid coordinate"));
            }
        }
    }

    // Collinear nodes leave the affine part undetermined.
    let p0 = nodes[0];
    let far = nodes
        .iter()
        .copied()
        .max_by(|a, b| dist2(*a, p0).total_cmp(&dist2(*b, p0)))
        .unwrap_or(p0);
    let d = [far[0] - p0[0], far[1] - p0[1]];
    let spread = nodes
        .iter()
        .map(|p| (d[0] * (p[1] - p0[1]) - d[1] * (p[0] - p0[0])).abs())
        .fold(0.0, f64::max);
    if spread < 1e-9 {
        return Err(ModelError::data_shape(name, "2-D grid points are collinear"));
    }
    Ok(())
}
