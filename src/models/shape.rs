//! Density shapes.
//!
//! Each [`ShapeKind`] maps to one implementation of [`Shape`]. The morphing
//! machinery never looks inside a shape: it only needs the ordered parameter
//! names (to know which grids to morph) and a way to evaluate the density once
//! the parameter values are known.
//!
//! Invalid parameter values (e.g. a non-positive width) evaluate to NaN.

use std::f64::consts::PI;

use crate::domain::{Observable, ShapeKind};

pub trait Shape: Send + Sync {
    /// Parameter names, in the order `density` expects them.
    fn param_names(&self) -> &'static [&'static str];

    /// Density at `x`. `range` is the observable's fit range.
    fn density(&self, x: f64, params: &[f64], range: &Observable) -> f64;
}

/// Normal density `N(mean, sigma)` (normalized on the real line).
#[derive(Debug, Clone, Copy)]
pub struct Gaussian;

/// Non-relativistic Breit-Wigner (Cauchy) with full width `width`.
#[derive(Debug, Clone, Copy)]
pub struct BreitWigner;

/// `exp(lambda * x)` normalized on the observable range.
#[derive(Debug, Clone, Copy)]
pub struct Exponential;

/// Flat density on the observable range.
#[derive(Debug, Clone, Copy)]
pub struct Uniform;

impl Shape for Gaussian {
    fn param_names(&self) -> &'static [&'static str] {
        ShapeKind::Gaussian.param_names()
    }

    fn density(&self, x: f64, params: &[f64], _range: &Observable) -> f64 {
        let [mean, sigma] = params else {
            return f64::NAN;
        };
        if !(sigma.is_finite() && *sigma > 0.0) {
            return f64::NAN;
        }
        let z = (x - mean) / sigma;
        (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
    }
}

impl Shape for BreitWigner {
    fn param_names(&self) -> &'static [&'static str] {
        ShapeKind::BreitWigner.param_names()
    }

    fn density(&self, x: f64, params: &[f64], _range: &Observable) -> f64 {
        let [mean, width] = params else {
            return f64::NAN;
        };
        if !(width.is_finite() && *width > 0.0) {
            return f64::NAN;
        }
        let half = 0.5 * width;
        half / (PI * ((x - mean) * (x - mean) + half * half))
    }
}

impl Shape for Exponential {
    fn param_names(&self) -> &'static [&'static str] {
        ShapeKind::Exponential.param_names()
    }

    fn density(&self, x: f64, params: &[f64], range: &Observable) -> f64 {
        let [lambda] = params else {
            return f64::NAN;
        };
        let lambda = *lambda;
        if !lambda.is_finite() {
            return f64::NAN;
        }
        if !range.contains(x) {
            return 0.0;
        }
        let (lo, hi) = (range.min, range.max);
        if lambda.abs() < 1e-12 {
            return 1.0 / (hi - lo);
        }
        // Reference the exponent at the end where it is largest to avoid overflow.
        if lambda > 0.0 {
            lambda * (lambda * (x - hi)).exp() / -(lambda * (lo - hi)).exp_m1()
        } else {
            lambda * (lambda * (x - lo)).exp() / (lambda * (hi - lo)).exp_m1()
        }
    }
}

impl Shape for Uniform {
    fn param_names(&self) -> &'static [&'static str] {
        ShapeKind::Uniform.param_names()
    }

    fn density(&self, x: f64, _params: &[f64], range: &Observable) -> f64 {
        if range.contains(x) {
            1.0 / (range.max - range.min)
        } else {
            0.0
        }
    }
}

impl ShapeKind {
    pub fn shape(self) -> &'static dyn Shape {
        match self {
            ShapeKind::Gaussian => &Gaussian,
            ShapeKind::BreitWigner => &BreitWigner,
            ShapeKind::Exponential => &Exponential,
            ShapeKind::Uniform => &Uniform,
        }
    }
}

/// Evaluate the density of `kind` at `x`.
pub fn density(kind: ShapeKind, x: f64, params: &[f64], range: &Observable) -> f64 {
    kind.shape().density(x, params, range)
}
