//! Attribution of a region's total yield to the leaves of a mixture.
//!
//! Fractions are multiplied along the path from the root mixture to each leaf:
//! in a recursive mixture leaf `i` receives `Π_{j<i}(1-f_j) * f_i`, the last
//! leaf `Π_j(1-f_j)`. Nested mixtures are unwound the same way. Extended sums
//! split by `y_i / Σ y`.
//!
//! The relative uncertainty of a leaf is the quadrature sum of the relative
//! errors of every factor on its path (`σ/f` for `f`, `σ/(1-f)` for `1-f`).
//! Correlations between fractions are ignored, which overestimates the
//! uncertainty; downstream systematics tables rely on this value.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::ComponentIntegrals;
use crate::error::{ModelError, Result};
use crate::workspace::{Arg, EvalContext, FuncHandle, Node, Workspace};

/// Split `total` over the leaf components of `mixture`.
///
/// Fractions are evaluated in `ctx`; their errors are the parameter errors set
/// after the fit (missing errors count as zero). A function that is not a
/// mixture is its own single leaf.
pub fn build_component_integrals(
    ws: &Workspace,
    mixture: FuncHandle,
    total: f64,
    ctx: &EvalContext,
) -> Result<ComponentIntegrals> {
    if !total.is_finite() {
        return Err(ModelError::invalid_range(
            ws.name_of(mixture),
            format!("non-finite total integral {total}"),
        ));
    }
    let mut out = ComponentIntegrals::default();
    let mut rel2 = BTreeMap::new();
    walk(ws, mixture, total, 0.0, ctx, &mut out, &mut rel2)?;
    out.rel_uncertainty = rel2.into_iter().map(|(k, v)| (k, v.sqrt())).collect();
    debug!(
        mixture = ws.name_of(mixture),
        total,
        leaves = out.integrals.len(),
        "built component integrals"
    );
    Ok(out)
}

/// `(value, error)` of a weight argument.
///
/// A bounded function carries its own error function, evaluated in `ctx`.
fn weight(ws: &Workspace, arg: Arg, ctx: &EvalContext) -> (f64, f64) {
    let value = ws.eval_arg(arg, ctx);
    let error = match arg {
        Arg::Param(h) => ws.parameter(h).and_then(|p| p.error).unwrap_or(0.0),
        Arg::Func(h) => match ws.function(h).map(|f| &f.node) {
            Some(Node::Bounded { error: Some(e), .. }) => ws.eval(*e, ctx).abs(),
            _ => 0.0,
        },
        Arg::Const(_) => 0.0,
    };
    (value, error)
}

fn rel(value: f64, error: f64) -> f64 {
    if value == 0.0 { 0.0 } else { error / value }
}

fn walk(
    ws: &Workspace,
    f: FuncHandle,
    scale: f64,
    path_rel2: f64,
    ctx: &EvalContext,
    out: &mut ComponentIntegrals,
    rel2: &mut BTreeMap<String, f64>,
) -> Result<()> {
    let func = ws
        .function(f)
        .ok_or_else(|| ModelError::MissingReference(format!("function #{f:?}")))?;

    match &func.node {
        Node::RecursiveSum {
            components,
            fractions,
        } => {
            let Some((last, head)) = components.split_last() else {
                return Ok(());
            };
            let mut remaining = scale;
            let mut acc = path_rel2;
            for (c, a) in head.iter().zip(fractions) {
                let (frac, err) = weight(ws, *a, ctx);
                let r = rel(frac, err);
                walk(ws, *c, remaining * frac, acc + r * r, ctx, out, rel2)?;
                let r_rest = rel(1.0 - frac, err);
                acc += r_rest * r_rest;
                remaining *= 1.0 - frac;
            }
            walk(ws, *last, remaining, acc, ctx, out, rel2)
        }
        Node::PairSum {
            first,
            second,
            fraction,
        } => {
            let (frac, err) = weight(ws, *fraction, ctx);
            let (r, r_rest) = (rel(frac, err), rel(1.0 - frac, err));
            walk(ws, *first, scale * frac, path_rel2 + r * r, ctx, out, rel2)?;
            walk(ws, *second, scale * (1.0 - frac), path_rel2 + r_rest * r_rest, ctx, out, rel2)
        }
        Node::ExtendedSum { components, yields } => {
            let weights: Vec<(f64, f64)> = yields.iter().map(|y| weight(ws, *y, ctx)).collect();
            let sum: f64 = weights.iter().map(|(v, _)| v).sum();
            if sum == 0.0 || !sum.is_finite() {
                return Err(ModelError::data_shape(
                    &func.name,
                    format!("yields sum to {sum}"),
                ));
            }
            for (c, (y, err)) in components.iter().zip(weights) {
                let r = rel(y, err);
                walk(ws, *c, scale * y / sum, path_rel2 + r * r, ctx, out, rel2)?;
            }
            Ok(())
        }
        _ => {
            *out.integrals.entry(func.name.clone()).or_insert(0.0) += scale;
            let slot = rel2.entry(func.name.clone()).or_insert(0.0);
            *slot = slot.max(path_rel2);
            Ok(())
        }
    }
}
