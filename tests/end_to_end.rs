use std::collections::BTreeMap;
use std::path::Path;

use approx::assert_relative_eq;

use shape_morph::app::pipeline::{build_model, reference_coords};
use shape_morph::domain::{
    Axis, FitKey, FitRecord, FitTable, Grid, MixtureMode, Settings, SystematicVariation,
    WeightSpec,
};
use shape_morph::error::{ModelError, Result};
use shape_morph::fit::{fill_table, missing_fits, plan_fits};
use shape_morph::io::{load_or_default, read_model_config, write_fit_table, write_model_json};
use shape_morph::mixture::{MixtureSpec, compose};
use shape_morph::morph::TemplateMorpher;
use shape_morph::workspace::{Node, Workspace};

const CONFIG: &str = r#"{
  "axes": [{ "name": "MA", "min": 5.0, "max": 15.0 }],
  "observables": [{ "name": "x", "min": 0.0, "max": 10.0 }],
  "regions": [
    {
      "name": "FP",
      "shifts": ["pileup"],
      "shapes": [
        { "name": "sig", "kind": "gaussian" },
        { "name": "cont", "kind": "exponential" }
      ],
      "mixtures": [
        {
          "name": "bg",
          "mode": "pair",
          "components": [
            { "name": "sig", "weight": [0.5, 0.0, 1.0] },
            { "name": "cont" }
          ]
        }
      ]
    },
    {
      "name": "PP",
      "shapes": [
        { "name": "sig", "kind": "gaussian" },
        { "name": "cont", "kind": "exponential" }
      ],
      "links": [{ "shape": "cont", "param": "lambda", "source_region": "FP" }],
      "mixtures": [
        {
          "name": "bg",
          "mode": "pair",
          "components": [
            { "name": "sig", "weight": [0.5, 0.0, 1.0] },
            { "name": "cont" }
          ]
        }
      ]
    }
  ]
}"#;

fn record(coords: &[f64], values: &[(&str, f64, f64)], integral: f64) -> FitRecord {
    FitRecord {
        coords: coords.to_vec(),
        values: values.iter().map(|(k, v, _)| (k.to_string(), *v)).collect(),
        errors: values.iter().map(|(k, _, e)| (k.to_string(), *e)).collect(),
        integral,
    }
}

/// Stand-in for the minimizer: a signal grid over MA, a flat continuum slope,
/// and a pileup shift that moves only the signal mean and the total yield.
fn fake_fit(key: &FitKey) -> Result<Vec<FitRecord>> {
    let scale = match key.shift.as_str() {
        "" => 1.0,
        "pileupUp" => 1.1,
        "pileupDown" => 0.9,
        other => return Err(ModelError::MissingReference(format!("shift {other}"))),
    };
    let records = match (key.shape.as_str(), key.region.as_str()) {
        ("sig", _) => [(5.0, 4.0, 0.5), (10.0, 5.0, 0.6), (15.0, 6.0, 0.7)]
            .iter()
            .map(|&(ma, mean, sigma)| {
                record(&[ma], &[("mean", mean * scale, 0.01), ("sigma", sigma, 0.01)], 0.0)
            })
            .collect(),
        ("cont", "FP") => vec![record(&[], &[("lambda", -0.5, 0.05)], 0.0)],
        ("cont", "PP") => vec![record(&[], &[("lambda", -0.6, 0.06)], 0.0)],
        ("bg", "FP") => vec![record(&[], &[("sig_FP_frac", 0.25, 0.025)], 1000.0 * scale)],
        ("bg", "PP") => vec![record(&[], &[("sig_PP_frac", 0.4, 0.04)], 500.0)],
        _ => return Err(ModelError::MissingReference(format!("fit {key}"))),
    };
    Ok(records)
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("model.json");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

#[test]
fn mass_grid_morphs_with_pileup() {
    let mut ws = Workspace::new(vec![Axis::new("MA", 5.0, 15.0)], vec![]).unwrap();
    let grid = Grid::one_d(vec![5.0, 10.0, 15.0], vec![10.0, 20.0, 15.0]);

    let plain = TemplateMorpher::default().build(&mut ws, "plain", &grid, &[]).unwrap();
    assert_eq!(ws.eval(plain.handle, &ws.context(&[10.0])), 20.0);

    let pileup = SystematicVariation::new("pileup", vec![11.0, 22.0, 16.0], vec![9.0, 18.0, 14.0]);
    let m = TemplateMorpher::default().build(&mut ws, "mean", &grid, &[pileup]).unwrap();
    let nu = ws.param("pileup").unwrap();
    let mut ctx = ws.context(&[10.0]);
    for (v, expected) in [(1.0, 22.0), (0.0, 20.0), (-1.0, 18.0), (0.5, 21.0)] {
        ctx.set(nu, v);
        assert_relative_eq!(ws.eval(m.handle, &ctx), expected, epsilon = 1e-12);
    }
}

#[test]
fn recursive_mixture_of_constants() {
    let mut ws = Workspace::new(vec![Axis::new("MA", 5.0, 15.0)], vec![]).unwrap();
    for (name, value) in [("A", 2.0), ("B", 3.0), ("C", 5.0)] {
        ws.add_function(name, Node::Constant(value)).unwrap();
    }
    let spec = MixtureSpec::new()
        .with("A", WeightSpec::range(0.5, 0.0, 1.0))
        .with("B", WeightSpec::range(0.4, 0.0, 1.0))
        .rest("C");
    let mix = compose(&mut ws, "abc", MixtureMode::Recursive, spec).unwrap();
    assert_relative_eq!(ws.eval(mix.handle, &ws.context(&[10.0])), 3.1, epsilon = 1e-12);

    let (fa, fb) = (ws.param("A_frac").unwrap(), ws.param("B_frac").unwrap());
    let mut ctx = ws.context(&[10.0]);
    for a in [0.0, 0.3, 1.0] {
        for b in [0.0, 0.7, 1.0] {
            ctx.set(fa, a).set(fb, b);
            assert!(ws.eval(mix.handle, &ctx) >= 0.0);
        }
    }
}

#[test]
fn config_driven_build_from_cached_fits() {
    let dir = tempfile::tempdir().unwrap();
    let config = read_model_config(&write_config(dir.path())).unwrap();

    let fits_path = dir.path().join("fits.json");
    let mut table = load_or_default(&fits_path).unwrap();
    let plan = plan_fits(&config);
    // FP: (sig, cont, bg) x (central, up, down); PP: (sig, cont, bg) central.
    assert_eq!(plan.len(), 12);
    assert_eq!(missing_fits(&table, &plan).len(), 12);

    let mut engine = |key: &FitKey| -> Result<Vec<FitRecord>> { fake_fit(key) };
    assert_eq!(fill_table(&mut engine, &mut table, &plan).unwrap(), 12);
    write_fit_table(&fits_path, &table).unwrap();

    let cached = load_or_default(&fits_path).unwrap();
    assert!(missing_fits(&cached, &plan).is_empty());

    let out = build_model(&config, &cached, &Settings::default()).unwrap();
    assert!(out.skipped_shapes.is_empty());

    let fp = &out.integrals["FP"];
    assert_relative_eq!(fp["sig_FP"], 250.0, epsilon = 1e-9);
    assert_relative_eq!(fp["cont_FP"], 750.0, epsilon = 1e-9);
    assert_relative_eq!(fp.values().sum::<f64>(), 1000.0, epsilon = 1e-9);
    assert_relative_eq!(out.uncertainties["FP"]["sig_FP"], 0.1, epsilon = 1e-12);
    assert_relative_eq!(out.uncertainties["FP"]["cont_FP"], 0.025 / 0.75, epsilon = 1e-12);

    let pp = &out.integrals["PP"];
    assert_relative_eq!(pp["sig_PP"], 200.0, epsilon = 1e-9);
    assert_relative_eq!(pp["cont_PP"], 300.0, epsilon = 1e-9);

    assert_eq!(out.links.len(), 1);
    assert_relative_eq!(out.links[0].scale, 1.2, epsilon = 1e-12);
    assert_relative_eq!(out.links[0].uncertainty, 1.2 * 0.02_f64.sqrt(), epsilon = 1e-12);

    let dropped: BTreeMap<&str, &str> = out
        .dropped_shifts
        .iter()
        .map(|d| (d.function.as_str(), d.shift.as_str()))
        .collect();
    assert_eq!(dropped.get("sigma_sig_FP"), Some(&"pileup"));
    assert_eq!(dropped.get("lambda_cont_FP"), Some(&"pileup"));
    assert!(!dropped.contains_key("mean_sig_FP"));
    assert!(!dropped.contains_key("integral_bg_FP"));

    let ws = &out.workspace;
    let mut ctx = ws.context(&reference_coords(ws));
    let total = ws.func("integral_bg_FP").unwrap();
    ctx.set(ws.param("pileup").unwrap(), 1.0);
    assert_relative_eq!(ws.eval(total, &ctx), 1100.0, epsilon = 1e-9);
    assert_relative_eq!(ws.eval(ws.func("mean_sig_FP").unwrap(), &ctx), 5.5, epsilon = 1e-12);

    let export = dir.path().join("model.json.out");
    write_model_json(&export, &out).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    assert_eq!(json["tool"], "morph");
    let sig_pp = json["integrals"]["PP"]["sig_PP"].as_f64().unwrap();
    assert_relative_eq!(sig_pp, 200.0, epsilon = 1e-9);
    assert_eq!(json["links"][0]["component"], "lambda_cont_PP");
}

#[test]
fn missing_shifted_mixture_fit_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let config = read_model_config(&write_config(dir.path())).unwrap();
    let mut table = FitTable::default();
    let mut engine = |key: &FitKey| -> Result<Vec<FitRecord>> { fake_fit(key) };
    let plan: Vec<FitKey> = plan_fits(&config)
        .into_iter()
        .filter(|k| !(k.shape == "bg" && k.shift == "pileupDown"))
        .collect();
    fill_table(&mut engine, &mut table, &plan).unwrap();

    let err = build_model(&config, &table, &Settings::default());
    assert!(matches!(err, Err(ModelError::MissingReference(_))));
}
