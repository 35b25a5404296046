//! Template morphing of shape parameters.
//!
//! Given the central grid of a parameter and, per systematic source, an up and
//! a down grid over the same coordinates, the morpher registers
//!
//! ```text
//! value(m, ν) = central(m)
//!             + Σ_s max(0, ν_s) * (up_s(m) - central(m))
//!             + Σ_s min(0, ν_s) * (central(m) - down_s(m))
//! ```
//!
//! which equals the central interpolant at `ν = 0` and the up/down interpolant
//! at `ν = ±1`. The nuisance `ν_s` is the workspace parameter named after the
//! shift and is shared by every function morphed with that shift.
//!
//! Shifts whose relative deviation from the central values stays below the
//! tolerance at every grid point create no nuisance parameter at all.

use tracing::{debug, info};

use crate::domain::{Grid, ParamFit, SystematicVariation};
use crate::error::{ModelError, Result};
use crate::morph::grid_node;
use crate::workspace::{FuncHandle, MorphShift, Node, ParamHandle, Symbol, Workspace};

/// Start value and bounds of nuisance parameters.
pub const NUISANCE_RANGE: [f64; 3] = [0.0, -10.0, 10.0];

/// Result of morphing one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Morphed {
    pub handle: FuncHandle,
    /// Nuisance parameters the function depends on (kept shifts, in input order).
    pub nuisances: Vec<ParamHandle>,
    /// Shifts dropped as negligible.
    pub dropped: Vec<String>,
}

/// The nodes of a morphed function, built but not registered yet.
///
/// Every interpolant is constructed when the morph is prepared, so callers
/// preparing several functions can fail before touching the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMorph {
    label: String,
    central: Node,
    templates: Vec<(String, Node, Node)>,
    dropped: Vec<String>,
}

impl PreparedMorph {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// Functions registered by this morph, in registration order.
    pub fn function_names(&self) -> Vec<String> {
        if self.templates.is_empty() {
            return vec![self.label.clone()];
        }
        let mut names = vec![format!("{}_central", self.label)];
        for (shift, ..) in &self.templates {
            names.push(format!("{}_{shift}Up", self.label));
            names.push(format!("{}_{shift}Down", self.label));
        }
        names.push(self.label.clone());
        names
    }

    /// Fail with [`ModelError::DuplicateName`] if registering would clash with `ws`.
    ///
    /// A nuisance may already exist as a parameter, never as a function.
    pub fn check_names(&self, ws: &Workspace) -> Result<()> {
        let names = self.function_names();
        if let Some(name) = names.iter().find(|n| ws.contains(n)) {
            return Err(ModelError::DuplicateName(name.clone()));
        }
        for (shift, ..) in &self.templates {
            if names.contains(shift) || matches!(ws.symbol(shift), Ok(Symbol::Func(_))) {
                return Err(ModelError::DuplicateName(shift.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMorpher {
    tolerance: f64,
    fit: ParamFit,
}

impl Default for TemplateMorpher {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl TemplateMorpher {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            fit: ParamFit::Interpolate,
        }
    }

    /// Use a polynomial fit instead of exact interpolation for every template.
    pub fn with_fit(mut self, fit: ParamFit) -> Self {
        self.fit = fit;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Morph a grid of fitted values with its systematic variations.
    ///
    /// Up and down values follow the point order of `grid`.
    pub fn build(
        &self,
        ws: &mut Workspace,
        label: &str,
        grid: &Grid,
        shifts: &[SystematicVariation],
    ) -> Result<Morphed> {
        let prepared = self.prepare(ws, label, grid, shifts)?;
        self.register(ws, prepared)
    }

    /// Morph a single value (no mass dependence), e.g. a region's total integral.
    pub fn build_scalar(
        &self,
        ws: &mut Workspace,
        label: &str,
        central: f64,
        shifts: &[SystematicVariation],
    ) -> Result<Morphed> {
        let prepared = self.prepare_scalar(label, central, shifts)?;
        self.register(ws, prepared)
    }

    /// Build every interpolant of a gridded morph without registering anything.
    pub fn prepare(
        &self,
        ws: &Workspace,
        label: &str,
        grid: &Grid,
        shifts: &[SystematicVariation],
    ) -> Result<PreparedMorph> {
        grid.validate(label)?;
        for s in shifts {
            check_variation(label, grid.len(), s)?;
        }

        let central = grid_node(label, grid, self.fit, ws)?;
        let mut templates = Vec::new();
        let mut dropped = Vec::new();
        for s in shifts {
            if self.is_negligible(&grid.values, s) {
                dropped.push(s.name.clone());
                continue;
            }
            let template = |suffix: &str, values: &[f64]| {
                grid_node(
                    &format!("{label}_{}{suffix}", s.name),
                    &grid.with_values(values.to_vec()),
                    self.fit,
                    ws,
                )
            };
            templates.push((
                s.name.clone(),
                template("Up", s.up.as_slice())?,
                template("Down", s.down.as_slice())?,
            ));
        }

        Ok(PreparedMorph {
            label: label.to_string(),
            central,
            templates,
            dropped,
        })
    }

    pub fn prepare_scalar(
        &self,
        label: &str,
        central: f64,
        shifts: &[SystematicVariation],
    ) -> Result<PreparedMorph> {
        if !central.is_finite() {
            return Err(ModelError::data_shape(label, "non-finite central value"));
        }
        for s in shifts {
            check_variation(label, 1, s)?;
        }

        let mut templates = Vec::new();
        let mut dropped = Vec::new();
        for s in shifts {
            if self.is_negligible(&[central], s) {
                dropped.push(s.name.clone());
                continue;
            }
            templates.push((s.name.clone(), Node::Constant(s.up[0]), Node::Constant(s.down[0])));
        }

        Ok(PreparedMorph {
            label: label.to_string(),
            central: Node::Constant(central),
            templates,
            dropped,
        })
    }

    /// Register a prepared morph. Names are checked before the first registration.
    pub fn register(&self, ws: &mut Workspace, prepared: PreparedMorph) -> Result<Morphed> {
        prepared.check_names(ws)?;
        let PreparedMorph {
            label,
            central,
            templates,
            dropped,
        } = prepared;
        for name in &dropped {
            info!(function = %label, shift = %name, tolerance = self.tolerance, "dropping negligible shift");
        }

        if templates.is_empty() {
            let handle = ws.add_function(&label, central)?;
            return Ok(Morphed {
                handle,
                nuisances: Vec::new(),
                dropped,
            });
        }

        let central = ws.add_function(&format!("{label}_central"), central)?;
        let [init, lo, hi] = NUISANCE_RANGE;
        let mut morph_shifts = Vec::with_capacity(templates.len());
        for (shift, up, down) in templates {
            let nuisance = ws.ensure_param(&shift, init, lo, hi)?;
            let up = ws.add_function(&format!("{label}_{shift}Up"), up)?;
            let down = ws.add_function(&format!("{label}_{shift}Down"), down)?;
            morph_shifts.push(MorphShift { nuisance, up, down });
        }

        let nuisances = morph_shifts.iter().map(|s| s.nuisance).collect();
        debug!(function = %label, n_shifts = morph_shifts.len(), "morphed parameter");
        let handle = ws.add_function(
            &label,
            Node::Morph {
                central,
                shifts: morph_shifts,
            },
        )?;
        Ok(Morphed {
            handle,
            nuisances,
            dropped,
        })
    }

    fn is_negligible(&self, central: &[f64], s: &SystematicVariation) -> bool {
        let rel = |shifted: f64, c: f64| {
            let d = (shifted - c).abs();
            if c == 0.0 { d } else { d / c.abs() }
        };
        central
            .iter()
            .zip(s.up.iter().zip(&s.down))
            .all(|(&c, (&u, &d))| rel(u, c) <= self.tolerance && rel(d, c) <= self.tolerance)
    }
}

fn check_variation(label: &str, n: usize, s: &SystematicVariation) -> Result<()> {
    if s.up.len() != n || s.down.len() != n {
        return Err(ModelError::data_shape(
            label,
            format!(
                "shift '{}' has {} up / {} down values for {n} grid points",
                s.name,
                s.up.len(),
                s.down.len()
            ),
        ));
    }
    if s.up.iter().chain(&s.down).any(|v| !v.is_finite()) {
        return Err(ModelError::data_shape(
            label,
            format!("shift '{}' has non-finite values", s.name),
        ));
    }
    Ok(())
}
