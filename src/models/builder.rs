//! Registering shapes in the workspace.
//!
//! A shape is registered from references to already-registered parameter
//! functions. [`build_morphed_shape`] produces those references from the fit
//! table: every shape parameter is morphed across the mass grid with the
//! region's systematic shifts and registered as `{param}_{shape}_{region}`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::{FitKey, FitTable, ShapeConfig, ShapeKind, SystematicVariation};
use crate::error::{ModelError, Result};
use crate::morph::TemplateMorpher;
use crate::workspace::{Arg, FuncHandle, Node, Workspace};

/// Register a density of `kind` over observable `observable` with the given parameters.
pub fn add_shape(
    ws: &mut Workspace,
    name: &str,
    kind: ShapeKind,
    observable: usize,
    params: Vec<Arg>,
) -> Result<FuncHandle> {
    let expected = kind.param_names().len();
    if params.len() != expected {
        return Err(ModelError::data_shape(
            name,
            format!(
                "{} takes {expected} parameter(s), got {}",
                kind.display_name(),
                params.len()
            ),
        ));
    }
    check_observable(ws, name, observable)?;
    ws.add_function(
        name,
        Node::Shape {
            kind,
            observable,
            params,
        },
    )
}

fn check_observable(ws: &Workspace, name: &str, observable: usize) -> Result<()> {
    if observable >= ws.observables().len() {
        return Err(ModelError::invalid_range(
            name,
            format!("observable index {observable} out of {}", ws.observables().len()),
        ));
    }
    Ok(())
}

/// Same as [`add_shape`] with parameters given by workspace name.
pub fn add_shape_by_names(
    ws: &mut Workspace,
    name: &str,
    kind: ShapeKind,
    observable: usize,
    params: &[&str],
) -> Result<FuncHandle> {
    let args = params.iter().map(|p| ws.arg(p)).collect::<Result<Vec<_>>>()?;
    add_shape(ws, name, kind, observable, args)
}

/// Register the product of shapes over pairwise different observables.
pub fn add_product(ws: &mut Workspace, name: &str, factors: &[FuncHandle]) -> Result<FuncHandle> {
    if factors.len() < 2 {
        return Err(ModelError::data_shape(name, "a product needs at least two factors"));
    }
    let mut seen = BTreeSet::new();
    for &f in factors {
        let Some(func) = ws.function(f) else {
            return Err(ModelError::MissingReference(format!("factor of {name}")));
        };
        let Node::Shape { observable, .. } = &func.node else {
            return Err(ModelError::data_shape(
                name,
                format!("factor '{}' is not a shape", func.name),
            ));
        };
        if !seen.insert(*observable) {
            return Err(ModelError::data_shape(
                name,
                format!("factors share observable {observable}"),
            ));
        }
    }
    ws.add_function(name, Node::Product(factors.to_vec()))
}

/// A shape built from fit results.
#[derive(Debug, Clone, PartialEq)]
pub struct MorphedShape {
    pub handle: FuncHandle,
    /// `(function, shift)` pairs dropped as negligible.
    pub dropped: Vec<(String, String)>,
}

/// Name of the parameter function of `param` for `shape` in `region`.
pub fn param_label(param: &str, shape: &str, region: &str) -> String {
    format!("{param}_{shape}_{region}")
}

/// Build `{shape}_{region}` with every parameter morphed from the fit table.
///
/// Parameters fitted across the mass grid are interpolated; shifted fits are
/// paired with the central fit by mass coordinates. A fit without mass
/// coordinates gives a constant parameter (scalar shifts still apply). A
/// parameter whose function is already registered is used as is.
///
/// Every interpolant is built and every name checked before the first
/// registration, so a failure leaves the workspace untouched.
pub fn build_morphed_shape(
    ws: &mut Workspace,
    morpher: &TemplateMorpher,
    table: &FitTable,
    shape: &ShapeConfig,
    region: &str,
    shifts: &[String],
) -> Result<MorphedShape> {
    let name = format!("{}_{region}", shape.name);
    let central_key = FitKey::central(&shape.name, region);
    let morpher = morpher.with_fit(shape.fit);

    if ws.contains(&name) {
        return Err(ModelError::DuplicateName(name));
    }
    check_observable(ws, &name, shape.observable)?;

    let mut plans = Vec::new();
    for param in shape.kind.param_names() {
        let label = param_label(param, &shape.name, region);
        if ws.contains(&label) {
            // Already provided, e.g. linked from another region.
            plans.push((label, None));
            continue;
        }
        let prepared = match table.grid(&central_key, param)? {
            Some(grid) => {
                grid.validate(&label)?;
                let mut variations = Vec::with_capacity(shifts.len());
                for shift in shifts {
                    let up = table.aligned_values(&FitKey::up(&shape.name, region, shift), param, &grid)?;
                    let down =
                        table.aligned_values(&FitKey::down(&shape.name, region, shift), param, &grid)?;
                    variations.push(SystematicVariation::new(shift.as_str(), up, down));
                }
                morpher.prepare(ws, &label, &grid, &variations)?
            }
            None => {
                let mut variations = Vec::with_capacity(shifts.len());
                for shift in shifts {
                    let up = table.scalar(&FitKey::up(&shape.name, region, shift), param)?.0;
                    let down = table.scalar(&FitKey::down(&shape.name, region, shift), param)?.0;
                    variations.push(SystematicVariation::new(shift.as_str(), vec![up], vec![down]));
                }
                let central = table.scalar(&central_key, param)?.0;
                morpher.prepare_scalar(&label, central, &variations)?
            }
        };
        prepared.check_names(ws)?;
        plans.push((label, Some(prepared)));
    }

    let mut args = Vec::with_capacity(plans.len());
    let mut dropped = Vec::new();
    for (label, prepared) in plans {
        let Some(prepared) = prepared else {
            args.push(ws.arg(&label)?);
            continue;
        };
        let morphed = morpher.register(ws, prepared)?;
        dropped.extend(morphed.dropped.into_iter().map(|s| (label.clone(), s)));
        args.push(Arg::Func(morphed.handle));
    }

    let handle = add_shape(ws, &name, shape.kind, shape.observable, args)?;
    debug!(shape = %name, kind = shape.kind.display_name(), "built morphed shape");
    Ok(MorphedShape { handle, dropped })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::{Axis, FitRecord, Observable, ParamFit};

    fn ws() -> Workspace {
        Workspace::new(
            vec![Axis::new("MA", 3.6, 21.0)],
            vec![Observable::new("x", 2.5, 25.0), Observable::new("y", 0.0, 1200.0)],
        )
        .unwrap()
    }

    fn record(m: f64, mean: f64, sigma: f64) -> FitRecord {
        FitRecord {
            coords: vec![m],
            values: BTreeMap::from([("mean".to_string(), mean), ("sigma".to_string(), sigma)]),
            integral: 1.0,
            ..FitRecord::default()
        }
    }

    fn table() -> FitTable {
        let mut t = FitTable::default();
        t.insert(
            FitKey::central("sig", "PP"),
            vec![record(5.0, 5.0, 0.1), record(10.0, 10.0, 0.2), record(15.0, 15.0, 0.3)],
        );
        t.insert(
            FitKey::up("sig", "PP", "pileup"),
            vec![record(5.0, 5.1, 0.1), record(10.0, 10.2, 0.2), record(15.0, 15.3, 0.3)],
        );
        t.insert(
            FitKey::down("sig", "PP", "pileup"),
            vec![record(5.0, 4.9, 0.1), record(10.0, 9.8, 0.2), record(15.0, 14.7, 0.3)],
        );
        t
    }

    fn gaussian() -> ShapeConfig {
        ShapeConfig {
            name: "sig".to_string(),
            kind: ShapeKind::Gaussian,
            observable: 0,
            fit: ParamFit::Interpolate,
        }
    }

    #[test]
    fn shape_checks_parameter_count_and_observable() {
        let mut ws = ws();
        let m = ws.add_function("m", Node::Constant(3.0)).unwrap();
        assert!(matches!(
            add_shape(&mut ws, "g", ShapeKind::Gaussian, 0, vec![m.into()]),
            Err(ModelError::DataShape { .. })
        ));
        assert!(matches!(
            add_shape(&mut ws, "g", ShapeKind::Uniform, 7, vec![]),
            Err(ModelError::InvalidRange { .. })
        ));
        assert!(matches!(
            add_shape_by_names(&mut ws, "g", ShapeKind::Gaussian, 0, &["m", "nope"]),
            Err(ModelError::MissingReference(_))
        ));
    }

    #[test]
    fn product_needs_distinct_observables() {
        let mut ws = ws();
        let a = add_shape(&mut ws, "a", ShapeKind::Uniform, 0, vec![]).unwrap();
        let b = add_shape(&mut ws, "b", ShapeKind::Uniform, 0, vec![]).unwrap();
        let c = add_shape(&mut ws, "c", ShapeKind::Uniform, 1, vec![]).unwrap();
        assert!(add_product(&mut ws, "ab", &[a, b]).is_err());
        let ac = add_product(&mut ws, "ac", &[a, c]).unwrap();
        let v = ws.eval(ac, &ws.context(&[5.0]));
        assert!((v - 1.0 / (22.5 * 1200.0)).abs() < 1e-15);
    }

    #[test]
    fn morphed_shape_registers_parameter_functions() {
        let mut ws = ws();
        let built = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &table(),
            &gaussian(),
            "PP",
            &["pileup".to_string()],
        )
        .unwrap();

        assert!(ws.func("mean_sig_PP").is_ok());
        assert!(ws.func("mean_sig_PP_pileupUp").is_ok());
        // sigma does not move with pileup.
        assert_eq!(
            built.dropped,
            vec![("sigma_sig_PP".to_string(), "pileup".to_string())]
        );
        assert!(ws.func("sigma_sig_PP_central").is_err());

        let nu = ws.param("pileup").unwrap();
        let mean = ws.func("mean_sig_PP").unwrap();
        let mut ctx = ws.context(&[10.0]);
        ctx.set(nu, 1.0);
        assert!((ws.eval(mean, &ctx) - 10.2).abs() < 1e-12);

        ctx.set(nu, 0.0).set_observable(0, 10.0);
        let peak = ws.eval(built.handle, &ctx);
        assert!((peak - 1.0 / (0.2 * (2.0 * std::f64::consts::PI).sqrt())).abs() < 1e-9);
    }

    #[test]
    fn missing_shift_fit_leaves_workspace_untouched() {
        let mut ws = ws();
        let err = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &table(),
            &gaussian(),
            "PP",
            &["fake".to_string()],
        );
        assert!(matches!(err, Err(ModelError::MissingReference(_))));
        assert_eq!(ws.n_functions(), 0);
        assert_eq!(ws.n_params(), 0);
    }

    #[test]
    fn shifted_fits_are_matched_by_mass_point() {
        let mut t = FitTable::default();
        t.insert(
            FitKey::central("sig", "PP"),
            vec![record(5.0, 10.0, 0.1), record(10.0, 20.0, 0.2), record(15.0, 15.0, 0.3)],
        );
        t.insert(
            FitKey::up("sig", "PP", "pileup"),
            vec![record(15.0, 16.0, 0.3), record(10.0, 22.0, 0.2), record(5.0, 11.0, 0.1)],
        );
        t.insert(
            FitKey::down("sig", "PP", "pileup"),
            vec![record(10.0, 18.0, 0.2), record(5.0, 9.0, 0.1), record(15.0, 14.0, 0.3)],
        );
        let mut ws = ws();
        let shifts = ["pileup".to_string()];
        build_morphed_shape(&mut ws, &TemplateMorpher::default(), &t, &gaussian(), "PP", &shifts)
            .unwrap();

        let nu = ws.param("pileup").unwrap();
        let mean = ws.func("mean_sig_PP").unwrap();
        for (m, up, down) in [(5.0, 11.0, 9.0), (10.0, 22.0, 18.0), (15.0, 16.0, 14.0)] {
            let mut ctx = ws.context(&[m]);
            ctx.set(nu, 1.0);
            assert!((ws.eval(mean, &ctx) - up).abs() < 1e-12, "up at {m}");
            ctx.set(nu, -1.0);
            assert!((ws.eval(mean, &ctx) - down).abs() < 1e-12, "down at {m}");
        }
    }

    #[test]
    fn shifted_fit_on_other_mass_points_is_rejected() {
        let mut t = table();
        t.insert(
            FitKey::up("sig", "PP", "pileup"),
            vec![record(5.0, 5.1, 0.1), record(10.0, 10.2, 0.2), record(12.5, 15.3, 0.3)],
        );
        let mut ws = ws();
        let err = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &t,
            &gaussian(),
            "PP",
            &["pileup".to_string()],
        );
        assert!(matches!(err, Err(ModelError::DataShape { .. })));
        assert_eq!(ws.n_functions(), 0);
    }

    #[test]
    fn failing_second_parameter_leaves_workspace_untouched() {
        // The mean morphs fine; the width's up template is not finite.
        let mut t = table();
        let mut bad = record(15.0, 15.3, 0.3);
        bad.values.insert("sigma".to_string(), f64::NAN);
        t.insert(
            FitKey::up("sig", "PP", "pileup"),
            vec![record(5.0, 5.1, 0.1), record(10.0, 10.2, 0.2), bad],
        );
        let mut ws = ws();
        let err = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &t,
            &gaussian(),
            "PP",
            &["pileup".to_string()],
        );
        assert!(matches!(err, Err(ModelError::DataShape { .. })));
        assert_eq!(ws.n_functions(), 0);
        assert_eq!(ws.n_params(), 0);

        // A two-point polynomial of order three cannot be fit.
        let mut short = FitTable::default();
        short.insert(
            FitKey::central("sig", "PP"),
            vec![record(5.0, 5.0, 0.1), record(10.0, 10.0, 0.2)],
        );
        let cubic = ShapeConfig {
            fit: ParamFit::Polynomial { order: 3 },
            ..gaussian()
        };
        let err = build_morphed_shape(&mut ws, &TemplateMorpher::default(), &short, &cubic, "PP", &[]);
        assert!(err.is_err());
        assert_eq!(ws.n_functions(), 0);
    }

    #[test]
    fn nuisance_clashing_with_a_function_registers_nothing() {
        let mut ws = ws();
        ws.add_function("pileup", Node::Constant(1.0)).unwrap();
        let err = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &table(),
            &gaussian(),
            "PP",
            &["pileup".to_string()],
        );
        assert!(matches!(err, Err(ModelError::DuplicateName(_))));
        assert_eq!(ws.n_functions(), 1);
        assert!(!ws.contains("mean_sig_PP_central"));
    }

    #[test]
    fn bad_observable_is_caught_before_registering() {
        let mut ws = ws();
        let cfg = ShapeConfig {
            observable: 5,
            ..gaussian()
        };
        let err = build_morphed_shape(&mut ws, &TemplateMorpher::default(), &table(), &cfg, "PP", &[]);
        assert!(matches!(err, Err(ModelError::InvalidRange { .. })));
        assert_eq!(ws.n_functions(), 0);
    }

    #[test]
    fn registered_parameter_is_reused() {
        let mut ws = ws();
        let width = ws.add_function("sigma_sig_PP", Node::Constant(0.5)).unwrap();
        let built = build_morphed_shape(
            &mut ws,
            &TemplateMorpher::default(),
            &table(),
            &gaussian(),
            "PP",
            &[],
        )
        .unwrap();
        let Some(Node::Shape { params, .. }) = ws.function(built.handle).map(|f| &f.node) else {
            panic!("not a shape");
        };
        assert_eq!(params[1], Arg::Func(width));
    }

    #[test]
    fn scalar_fit_gives_constant_parameters() {
        let mut ws = ws();
        let mut t = FitTable::default();
        t.insert(
            FitKey::central("bg", "FP"),
            vec![FitRecord {
                values: BTreeMap::from([("lambda".to_string(), -0.3)]),
                ..FitRecord::default()
            }],
        );
        let cfg = ShapeConfig {
            name: "bg".to_string(),
            kind: ShapeKind::Exponential,
            observable: 0,
            fit: ParamFit::Interpolate,
        };
        build_morphed_shape(&mut ws, &TemplateMorpher::default(), &t, &cfg, "FP", &[]).unwrap();
        let lambda = ws.func("lambda_bg_FP").unwrap();
        assert_eq!(ws.eval(lambda, &ws.context(&[7.0])), -0.3);
    }
}
