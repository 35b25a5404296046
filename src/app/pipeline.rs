//! The model-building pass shared by every `morph` subcommand.
//!
//! Regions are built in config order, each in one top-to-bottom pass:
//!
//! 1. cross-region links (the source region must already be built)
//! 2. shapes, with every parameter morphed from the fit table
//! 3. products of shapes
//! 4. mixtures, their fitted fractions, the region integral and its split
//!    over the mixture's leaves (fractions and integral are morphed across
//!    the mass grid when the mixture was fitted per mass point)
//!
//! A shape (or product) that cannot be built is logged and skipped; the other
//! shapes of the region are independent. Link and mixture errors abort the
//! build, since a mixture with missing components is unusable downstream.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    ComponentIntegrals, FitKey, FitTable, LinkConfig, MixtureConfig, ModelConfig, ParamFit,
    RegionConfig, ScaleLink, Settings, SystematicVariation, WeightSpec,
};
use crate::error::{ModelError, Result};
use crate::link::{Measured, build_component_integrals, derive_link, link_component};
use crate::mixture::{MixtureSpec, compose};
use crate::models::{add_product, build_morphed_shape, param_label};
use crate::morph::{TemplateMorpher, grid_node};
use crate::workspace::{Node, ParamHandle, Workspace};

/// `{region: {component: value}}`.
pub type RegionTable = BTreeMap<String, BTreeMap<String, f64>>;

/// A systematic shift dropped from one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedShift {
    pub function: String,
    pub shift: String,
}

/// A shape left out of the model, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedShape {
    pub region: String,
    pub shape: String,
    pub reason: String,
}

/// All outputs of one model build.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub workspace: Workspace,
    pub integrals: RegionTable,
    pub uncertainties: RegionTable,
    pub links: Vec<ScaleLink>,
    pub dropped_shifts: Vec<DroppedShift>,
    pub skipped_shapes: Vec<SkippedShape>,
}

/// Name of a region's total-integral function for `mixture`.
pub fn integral_label(mixture: &str, region: &str) -> String {
    format!("integral_{mixture}_{region}")
}

/// Build every region of `config` from the fit results in `table`.
pub fn build_model(config: &ModelConfig, table: &FitTable, settings: &Settings) -> Result<ModelOutput> {
    let workspace = Workspace::new(config.axes.clone(), config.observables.clone())?;
    let mut out = ModelOutput {
        workspace,
        integrals: RegionTable::new(),
        uncertainties: RegionTable::new(),
        links: Vec::new(),
        dropped_shifts: Vec::new(),
        skipped_shapes: Vec::new(),
    };
    let morpher = TemplateMorpher::new(settings.shift_tolerance);

    for region in &config.regions {
        info!(region = %region.name, shapes = region.shapes.len(), "building region");
        build_region(&mut out, region, table, settings, &morpher)?;
    }

    info!(
        params = out.workspace.n_params(),
        functions = out.workspace.n_functions(),
        skipped = out.skipped_shapes.len(),
        "model built"
    );
    Ok(out)
}

fn build_region(
    out: &mut ModelOutput,
    region: &RegionConfig,
    table: &FitTable,
    settings: &Settings,
    morpher: &TemplateMorpher,
) -> Result<()> {
    for link in &region.links {
        let scale = build_link(&mut out.workspace, region, link, table, settings)?;
        out.links.push(scale);
    }

    for shape in &region.shapes {
        match build_morphed_shape(&mut out.workspace, morpher, table, shape, &region.name, &region.shifts) {
            Ok(built) => out.dropped_shifts.extend(
                built
                    .dropped
                    .into_iter()
                    .map(|(function, shift)| DroppedShift { function, shift }),
            ),
            Err(err) => {
                warn!(region = %region.name, shape = %shape.name, error = %err, "skipping shape");
                out.skipped_shapes.push(SkippedShape {
                    region: region.name.clone(),
                    shape: shape.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    for product in &region.products {
        let name = format!("{}_{}", product.name, region.name);
        let factors = product
            .factors
            .iter()
            .map(|f| out.workspace.func(&format!("{f}_{}", region.name)))
            .collect::<Result<Vec<_>>>();
        if let Err(err) = factors.and_then(|f| add_product(&mut out.workspace, &name, &f)) {
            warn!(region = %region.name, product = %product.name, error = %err, "skipping product");
            out.skipped_shapes.push(SkippedShape {
                region: region.name.clone(),
                shape: product.name.clone(),
                reason: err.to_string(),
            });
        }
    }

    for mixture in &region.mixtures {
        let yields = build_mixture(&mut out.workspace, region, mixture, table, settings)?;
        if let Some(yields) = yields {
            out.integrals
                .entry(region.name.clone())
                .or_default()
                .extend(yields.integrals);
            out.uncertainties
                .entry(region.name.clone())
                .or_default()
                .extend(yields.rel_uncertainty);
        }
    }
    Ok(())
}

/// Register `{param}_{shape}_{region}` as scale times the source region's function.
fn build_link(
    ws: &mut Workspace,
    region: &RegionConfig,
    link: &LinkConfig,
    table: &FitTable,
    settings: &Settings,
) -> Result<ScaleLink> {
    let target_label = param_label(&link.param, &link.shape, &region.name);
    let source_label = param_label(&link.param, &link.shape, &link.source_region);
    let source = ws.func(&source_label)?;

    let target_fit = table.scalar(&FitKey::central(&link.shape, &region.name), &link.param)?;
    let source_fit = table.scalar(&FitKey::central(&link.shape, &link.source_region), &link.param)?;
    let scale = derive_link(
        &target_label,
        &link.source_region,
        &region.name,
        Measured::from(target_fit),
        Measured::from(source_fit),
        settings.degenerate_policy,
    )?;
    link_component(ws, &target_label, scale.scale, source)?;
    info!(
        component = %target_label,
        source = %source_label,
        scale = scale.scale,
        uncertainty = scale.uncertainty,
        "linked component"
    );
    Ok(scale)
}

/// Compose `{mixture}_{region}` and, when the mixture was fitted, its integrals.
///
/// A fit without mass coordinates sets the literal fractions as free
/// parameters and gives a scalar integral. A fit across the mass grid turns
/// each literal weight into a morphed function of the mass and morphs the
/// integral over the same grid. Either way the integral is split at
/// [`reference_coords`].
fn build_mixture(
    ws: &mut Workspace,
    region: &RegionConfig,
    mixture: &MixtureConfig,
    table: &FitTable,
    settings: &Settings,
) -> Result<Option<ComponentIntegrals>> {
    let name = format!("{}_{}", mixture.name, region.name);
    let key = FitKey::central(&mixture.name, &region.name);
    let morpher = TemplateMorpher::new(settings.shift_tolerance);
    let gridded = table
        .get(&key)
        .is_some_and(|records| records.iter().any(|r| !r.coords.is_empty()));

    let mut spec = MixtureSpec::from_config(mixture, |c| {
        let regional = format!("{c}_{}", region.name);
        if ws.contains(&regional) { regional } else { c.to_string() }
    });
    if gridded {
        spec = morph_weights(ws, &morpher, table, region, &key, spec)?;
    }
    let composed = compose(ws, &name, mixture.mode, spec)?;

    if table.get(&key).is_none() {
        info!(mixture = %name, "mixture not fitted, no integrals");
        return Ok(None);
    }

    let label = integral_label(&mixture.name, &region.name);
    let integral = match table.integral_grid(&key)? {
        Some(grid) => {
            let mut shifts = Vec::with_capacity(region.shifts.len());
            for shift in &region.shifts {
                let up = table.aligned_integrals(&FitKey::up(&mixture.name, &region.name, shift), &grid)?;
                let down = table.aligned_integrals(&FitKey::down(&mixture.name, &region.name, shift), &grid)?;
                shifts.push(SystematicVariation::new(shift.as_str(), up, down));
            }
            morpher.build(ws, &label, &grid, &shifts)?
        }
        None => {
            apply_fit(ws, table, &key, &composed.created)?;
            let central = table.single(&key)?.integral;
            let mut shifts = Vec::with_capacity(region.shifts.len());
            for shift in &region.shifts {
                let up = table.single(&FitKey::up(&mixture.name, &region.name, shift))?.integral;
                let down = table.single(&FitKey::down(&mixture.name, &region.name, shift))?.integral;
                shifts.push(SystematicVariation::new(shift.as_str(), vec![up], vec![down]));
            }
            morpher.build_scalar(ws, &label, central, &shifts)?
        }
    };

    let ctx = ws.context(&reference_coords(ws));
    let total = ws.eval(integral.handle, &ctx);
    let yields = build_component_integrals(ws, composed.handle, total, &ctx)?;
    info!(mixture = %name, total, components = yields.integrals.len(), "component integrals");
    Ok(Some(yields))
}

/// Replace every literal weight of `spec` by a function of the mass fitted in `key`.
///
/// `{component}_frac` becomes a bounded function of the morphed fit values
/// (`{component}_frac_fit`), held inside the literal's `[lo, hi]`. Its
/// uncertainty is the interpolated fit error (`{component}_frac_error`).
fn morph_weights(
    ws: &mut Workspace,
    morpher: &TemplateMorpher,
    table: &FitTable,
    region: &RegionConfig,
    key: &FitKey,
    spec: MixtureSpec,
) -> Result<MixtureSpec> {
    let mut prepared = Vec::new();
    for (component, weight) in spec.components() {
        let Some(WeightSpec::Range([_, lo, hi])) = weight else {
            continue;
        };
        let frac = format!("{component}_frac");
        let error_label = format!("{frac}_error");
        for taken in [&frac, &error_label] {
            if ws.contains(taken) {
                return Err(ModelError::DuplicateName(taken.clone()));
            }
        }
        let grid = table
            .grid(key, &frac)?
            .ok_or_else(|| ModelError::data_shape(key.to_string(), "fit has no mass coordinates"))?;
        grid.validate(&frac)?;

        let mut shifts = Vec::with_capacity(region.shifts.len());
        for shift in &region.shifts {
            let up = table.aligned_values(&FitKey::up(&key.shape, &key.region, shift), &frac, &grid)?;
            let down = table.aligned_values(&FitKey::down(&key.shape, &key.region, shift), &frac, &grid)?;
            shifts.push(SystematicVariation::new(shift.as_str(), up, down));
        }
        let value = morpher.prepare(ws, &format!("{frac}_fit"), &grid, &shifts)?;
        value.check_names(ws)?;
        let error = if grid.errors.iter().any(|e| *e != 0.0) {
            let errors = grid.with_values(grid.errors.clone());
            Some(grid_node(&error_label, &errors, ParamFit::Interpolate, ws)?)
        } else {
            None
        };
        prepared.push((frac, error_label, value, error, *lo, *hi));
    }

    let mut fitted = Vec::with_capacity(prepared.len());
    for (frac, error_label, value, error, lo, hi) in prepared {
        let value = morpher.register(ws, value)?.handle;
        let error = match error {
            Some(node) => Some(ws.add_function(&error_label, node)?),
            None => None,
        };
        ws.add_function(&frac, Node::Bounded { value, error, lo, hi })?;
        info!(fraction = %frac, "fraction morphed across the mass grid");
        fitted.push(frac);
    }

    let mut fitted = fitted.into_iter();
    let mut out = MixtureSpec::new();
    for (component, weight) in spec.components() {
        let weight = match weight {
            Some(WeightSpec::Range(_)) => fitted.next().map(WeightSpec::reference),
            other => other.clone(),
        };
        out.push(component.as_str(), weight);
    }
    Ok(out)
}

/// Set fitted values and errors of the mixture's fraction parameters.
fn apply_fit(ws: &mut Workspace, table: &FitTable, key: &FitKey, params: &[ParamHandle]) -> Result<()> {
    let record = table.single(key)?;
    for &p in params {
        let name = ws.param_name(p).to_string();
        let Some(&value) = record.values.get(&name) else {
            return Err(ModelError::MissingReference(format!("{name} in fit {key}")));
        };
        ws.set_value(p, value)?;
        if let Some(&err) = record.errors.get(&name) {
            ws.set_error(p, err)?;
        }
    }
    Ok(())
}

/// Midpoint of every morphing axis, where region integrals are split.
pub fn reference_coords(ws: &Workspace) -> Vec<f64> {
    ws.axes().iter().map(|a| 0.5 * (a.min + a.max)).collect()
}
