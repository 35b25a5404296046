//! Cross-region scale factors.
//!
//! A component measured in a control region is reused in a related region as
//! `scale * source`, where the scale is the ratio of the two independent
//! central fits.

use tracing::warn;

use crate::domain::{DegeneratePolicy, ScaleLink};
use crate::error::{ModelError, Result};
use crate::workspace::{Arg, FuncHandle, Node, ParamHandle, Workspace};

/// `target / source`. A zero source is a [`ModelError::DegenerateScale`].
pub fn derive_scale(name: &str, target: f64, source: f64) -> Result<f64> {
    if !(target.is_finite() && source.is_finite()) {
        return Err(ModelError::invalid_range(
            name,
            format!("non-finite scale inputs target={target} source={source}"),
        ));
    }
    if source == 0.0 {
        return Err(ModelError::DegenerateScale {
            name: name.to_string(),
            target,
        });
    }
    Ok(target / source)
}

/// `|s| * sqrt((σt/t)² + (σs/s)²)` for independent fits.
pub fn scale_uncertainty(
    scale: f64,
    (target, target_err): (f64, f64),
    (source, source_err): (f64, f64),
) -> f64 {
    let rel = |v: f64, e: f64| if v == 0.0 { 0.0 } else { e / v };
    scale.abs() * rel(target, target_err).hypot(rel(source, source_err))
}

/// A value measured in one region with its symmetric error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measured {
    pub value: f64,
    pub error: f64,
}

impl From<(f64, f64)> for Measured {
    fn from((value, error): (f64, f64)) -> Self {
        Self { value, error }
    }
}

/// Derive the link from the target-region and source-region central fits.
///
/// With [`DegeneratePolicy::UseTarget`] a zero source falls back to
/// `scale = target` (uncertainty = the target error) and logs a warning.
pub fn derive_link(
    component: &str,
    source_region: &str,
    target_region: &str,
    target: Measured,
    source: Measured,
    policy: DegeneratePolicy,
) -> Result<ScaleLink> {
    let (scale, uncertainty) = match derive_scale(component, target.value, source.value) {
        Ok(scale) => (
            scale,
            scale_uncertainty(scale, (target.value, target.error), (source.value, source.error)),
        ),
        Err(ModelError::DegenerateScale { .. }) if policy == DegeneratePolicy::UseTarget => {
            warn!(
                component,
                source_region,
                target_region,
                target = target.value,
                "source value is zero, using the target value as scale"
            );
            (target.value, target.error.abs())
        }
        Err(err) => return Err(err),
    };
    Ok(ScaleLink {
        source_region: source_region.to_string(),
        target_region: target_region.to_string(),
        component: component.to_string(),
        scale,
        uncertainty,
    })
}

/// Register `name = scale * source`.
pub fn link_component(
    ws: &mut Workspace,
    name: &str,
    scale: impl Into<Arg>,
    source: FuncHandle,
) -> Result<FuncHandle> {
    ws.add_function(
        name,
        Node::Scaled {
            scale: scale.into(),
            source,
        },
    )
}

/// Register the scale as a bounded parameter `{name}_scale` starting at the
/// derived value, `n_sigma` uncertainties wide on each side.
pub fn scale_param(
    ws: &mut Workspace,
    name: &str,
    link: &ScaleLink,
    n_sigma: f64,
) -> Result<ParamHandle> {
    let half = n_sigma.abs() * link.uncertainty;
    let h = ws.add_param(
        &format!("{name}_scale"),
        link.scale,
        link.scale - half,
        link.scale + half,
    )?;
    ws.set_error(h, link.uncertainty)?;
    Ok(h)
}
