//! Weighted least squares solver.
//!
//! Two small linear problems show up while building a model:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! - polynomial fits of a shape parameter against the mass hypothesis
//!   (weights `1/err²` from the per-point fit errors)
//! - the square interpolation system of the 2-D radial-basis interpolant
//!
//! Rows are scaled by `sqrt(w_i)` and the resulting ordinary problem is solved by
//! SVD, which also handles square and tall systems uniformly.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Progressively looser tolerances for nearly collinear design columns.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve `Σ w_i (y_i - x_i^T β)^2` for row-major design rows.
///
/// `rows` holds `y.len()` rows of `p` columns each. Non-positive or non-finite
/// weights fall back to 1.
pub fn solve_weighted(rows: &[f64], p: usize, y: &[f64], w: &[f64]) -> Option<Vec<f64>> {
    let n = y.len();
    if p == 0 || rows.len() != n * p || n < p {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    for i in 0..n {
        let wi = w.get(i).copied().filter(|v| v.is_finite() && *v > 0.0).unwrap_or(1.0);
        let sw = wi.sqrt();
        for j in 0..p {
            xw[(i, j)] = rows[i * p + j] * sw;
        }
        yw[i] = y[i] * sw;
    }

    solve_least_squares(&xw, &yw).map(|beta| beta.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_linear_width_trend() {
        // sigma = 0.05 + 0.01 * MA at MA = 5, 10, 15
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 5.0, 1.0, 10.0, 1.0, 15.0]);
        let y = DVector::from_row_slice(&[0.1, 0.15, 0.2]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 0.05).abs() < 1e-10);
        assert!((beta[1] - 0.01).abs() < 1e-10);
    }

    #[test]
    fn weighted_fit_prefers_heavy_points() {
        // Constant fit: the heavily weighted point dominates the mean.
        let rows = [1.0, 1.0];
        let beta = solve_weighted(&rows, 1, &[0.0, 10.0], &[1.0, 99.0]).unwrap();
        assert!((beta[0] - 9.9).abs() < 1e-9);
    }

    #[test]
    fn weighted_fit_rejects_underdetermined() {
        assert!(solve_weighted(&[1.0, 0.0], 2, &[1.0], &[1.0]).is_none());
    }
}
