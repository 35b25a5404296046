//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - read from the model configuration and the fit-result cache (JSON)
//! - passed between the morphing, mixture and linking layers
//! - exported for the downstream datacard writer

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A morphing coordinate (e.g. the heavy resonance mass `MH`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl Axis {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// An observable the shapes are densities over (e.g. the dimuon mass `x`).
///
/// Same layout as [`Axis`]; kept as a distinct alias so signatures say which one they want.
pub type Observable = Axis;

/// Coordinates of a grid: one or two parallel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridAxes {
    One(Vec<f64>),
    Two(Vec<f64>, Vec<f64>),
}

impl GridAxes {
    pub fn len(&self) -> usize {
        match self {
            GridAxes::One(c) => c.len(),
            GridAxes::Two(c1, _) => c1.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        match self {
            GridAxes::One(_) => 1,
            GridAxes::Two(..) => 2,
        }
    }
}

/// One fitted point of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub coords: [f64; 2],
    pub value: f64,
    pub error: f64,
}

/// Fitted parameter values over the mass-hypothesis grid.
///
/// `errors` is either empty (unknown) or parallel to `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub axes: GridAxes,
    pub values: Vec<f64>,
    #[serde(default)]
    pub errors: Vec<f64>,
}

impl Grid {
    pub fn one_d(coords: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            axes: GridAxes::One(coords),
            values,
            errors: Vec::new(),
        }
    }

    pub fn two_d(c1: Vec<f64>, c2: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            axes: GridAxes::Two(c1, c2),
            values,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<f64>) -> Self {
        self.errors = errors;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check that every array has the same non-zero length and holds finite numbers.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.values.is_empty() || self.axes.is_empty() {
            return Err(ModelError::data_shape(name, "grid is empty"));
        }
        let n = self.values.len();
        let coords_ok = match &self.axes {
            GridAxes::One(c) => c.len() == n,
            GridAxes::Two(c1, c2) => c1.len() == n && c2.len() == n,
        };
        if !coords_ok {
            return Err(ModelError::data_shape(
                name,
                format!("coordinate arrays do not match {n} values"),
            ));
        }
        if !self.errors.is_empty() && self.errors.len() != n {
            return Err(ModelError::data_shape(
                name,
                format!("{} errors for {n} values", self.errors.len()),
            ));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::data_shape(name, "non-finite grid value"));
        }
        Ok(())
    }

    pub fn points(&self) -> Vec<GridPoint> {
        (0..self.values.len())
            .map(|i| {
                let coords = match &self.axes {
                    GridAxes::One(c) => [c[i], 0.0],
                    GridAxes::Two(c1, c2) => [c1[i], c2[i]],
                };
                GridPoint {
                    coords,
                    value: self.values[i],
                    error: self.errors.get(i).copied().unwrap_or(0.0),
                }
            })
            .collect()
    }

    /// Same coordinates, different values (used for up/down templates).
    pub fn with_values(&self, values: Vec<f64>) -> Self {
        Self {
            axes: self.axes.clone(),
            values,
            errors: Vec::new(),
        }
    }

    /// Values of `other` reordered to follow the points of `self`.
    ///
    /// Points are paired by coordinates, not by position. Both grids must hold
    /// the same set of points.
    pub fn align(&self, other: &Grid, name: &str) -> Result<Vec<f64>> {
        if self.axes.dim() != other.axes.dim() || self.len() != other.len() {
            return Err(ModelError::data_shape(
                name,
                format!(
                    "{} point(s) in {}-D do not match {} point(s) in {}-D",
                    other.len(),
                    other.axes.dim(),
                    self.len(),
                    self.axes.dim()
                ),
            ));
        }
        let theirs = other.points();
        let mut used = vec![false; theirs.len()];
        let mut out = Vec::with_capacity(theirs.len());
        for p in self.points() {
            let j = (0..theirs.len())
                .find(|&j| !used[j] && same_point(p.coords, theirs[j].coords))
                .ok_or_else(|| {
                    ModelError::data_shape(name, format!("no point at {:?}", &p.coords[..self.axes.dim()]))
                })?;
            used[j] = true;
            out.push(theirs[j].value);
        }
        Ok(out)
    }
}

fn same_point(a: [f64; 2], b: [f64; 2]) -> bool {
    a.iter()
        .zip(&b)
        .all(|(x, y)| (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0))
}

/// A named systematic source with its up/down grids (same layout as the central grid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicVariation {
    pub name: String,
    pub up: Vec<f64>,
    pub down: Vec<f64>,
}

impl SystematicVariation {
    pub fn new(name: impl Into<String>, up: Vec<f64>, down: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            up,
            down,
        }
    }
}

/// Weight of a mixture component.
///
/// In JSON: `[start, lo, hi]` for a new free fraction, or `"name"` for a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightSpec {
    Range([f64; 3]),
    Ref(String),
}

impl WeightSpec {
    pub fn range(start: f64, lo: f64, hi: f64) -> Self {
        WeightSpec::Range([start, lo, hi])
    }

    pub fn reference(name: impl Into<String>) -> Self {
        WeightSpec::Ref(name.into())
    }
}

/// How mixture components are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixtureMode {
    /// `f1*c1 + (1-f1)*(f2*c2 + (1-f2)*(...))`.
    Recursive,
    /// `f*c1 + (1-f)*c2`, exactly two components.
    Pair,
    /// `Σ y_i*c_i` with absolute yields.
    Extended,
}

/// Supported density shapes. Parameters are listed by [`ShapeKind::param_names`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Gaussian,
    #[serde(rename = "breitwigner")]
    BreitWigner,
    Exponential,
    Uniform,
}

impl ShapeKind {
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ShapeKind::Gaussian => &["mean", "sigma"],
            ShapeKind::BreitWigner => &["mean", "width"],
            ShapeKind::Exponential => &["lambda"],
            ShapeKind::Uniform => &[],
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ShapeKind::Gaussian => "Gaussian",
            ShapeKind::BreitWigner => "Breit-Wigner",
            ShapeKind::Exponential => "Exponential",
            ShapeKind::Uniform => "Uniform",
        }
    }
}

/// A derived cross-region scale factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleLink {
    pub source_region: String,
    pub target_region: String,
    pub component: String,
    pub scale: f64,
    pub uncertainty: f64,
}

/// What to do when a scale link's source value is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// Fail the region build.
    #[default]
    Fail,
    /// Use the target value as the scale (legacy behavior) and warn.
    #[serde(rename = "use-target")]
    #[value(name = "use-target")]
    UseTarget,
}

/// Identifies one fit of the external engine.
///
/// `shift` is empty for the central fit, `"{name}Up"` / `"{name}Down"` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FitKey {
    pub shape: String,
    pub region: String,
    #[serde(default)]
    pub shift: String,
}

impl FitKey {
    pub fn central(shape: &str, region: &str) -> Self {
        Self {
            shape: shape.to_string(),
            region: region.to_string(),
            shift: String::new(),
        }
    }

    pub fn up(shape: &str, region: &str, shift: &str) -> Self {
        Self {
            shape: shape.to_string(),
            region: region.to_string(),
            shift: format!("{shift}Up"),
        }
    }

    pub fn down(shape: &str, region: &str, shift: &str) -> Self {
        Self {
            shape: shape.to_string(),
            region: region.to_string(),
            shift: format!("{shift}Down"),
        }
    }
}

impl std::fmt::Display for FitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.shift.is_empty() {
            write!(f, "{}/{}", self.shape, self.region)
        } else {
            write!(f, "{}/{}/{}", self.shape, self.region, self.shift)
        }
    }
}

/// Best-fit values at one mass point.
///
/// `coords` is empty for a fit without a mass hypothesis (e.g. a background fit).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitRecord {
    #[serde(default)]
    pub coords: Vec<f64>,
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub errors: BTreeMap<String, f64>,
    #[serde(default)]
    pub integral: f64,
}

/// All records for one fit key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitEntry {
    pub key: FitKey,
    pub records: Vec<FitRecord>,
}

/// Cached fit results for a whole model build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitTable {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub entries: Vec<FitEntry>,
}

impl Default for FitTable {
    fn default() -> Self {
        Self {
            tool: "morph".to_string(),
            created: Utc::now(),
            entries: Vec::new(),
        }
    }
}

impl FitTable {
    pub fn get(&self, key: &FitKey) -> Option<&[FitRecord]> {
        self.entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.records.as_slice())
    }

    pub fn insert(&mut self, key: FitKey, records: Vec<FitRecord>) {
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.records = records,
            None => self.entries.push(FitEntry { key, records }),
        }
    }

    pub fn records(&self, key: &FitKey) -> Result<&[FitRecord]> {
        self.get(key)
            .ok_or_else(|| ModelError::MissingReference(format!("fit {key}")))
    }

    /// The grid of `param` across the mass points of `key`.
    ///
    /// Returns `None` when the records carry no coordinates (single fit).
    pub fn grid(&self, key: &FitKey, param: &str) -> Result<Option<Grid>> {
        self.collect_grid(key, param, |r| {
            r.values
                .get(param)
                .copied()
                .ok_or_else(|| ModelError::MissingReference(format!("{param} in fit {key}")))
        })
    }

    /// The grid of fitted integrals across the mass points of `key`.
    pub fn integral_grid(&self, key: &FitKey) -> Result<Option<Grid>> {
        self.collect_grid(key, "integral", |r| Ok(r.integral))
    }

    /// Values of `param` in `key`, paired point by point with `reference`.
    pub fn aligned_values(&self, key: &FitKey, param: &str, reference: &Grid) -> Result<Vec<f64>> {
        let grid = self.grid(key, param)?;
        align_to(reference, grid, key)
    }

    /// Integrals of `key`, paired point by point with `reference`.
    pub fn aligned_integrals(&self, key: &FitKey, reference: &Grid) -> Result<Vec<f64>> {
        let grid = self.integral_grid(key)?;
        align_to(reference, grid, key)
    }

    /// `(value, error)` of `param` for a fit without mass coordinates.
    pub fn scalar(&self, key: &FitKey, param: &str) -> Result<(f64, f64)> {
        let record = self.single(key)?;
        let value = record
            .values
            .get(param)
            .copied()
            .ok_or_else(|| ModelError::MissingReference(format!("{param} in fit {key}")))?;
        let error = record.errors.get(param).copied().unwrap_or(0.0);
        Ok((value, error))
    }

    pub fn single(&self, key: &FitKey) -> Result<&FitRecord> {
        match self.records(key)? {
            [record] if record.coords.is_empty() => Ok(record),
            records => Err(ModelError::data_shape(
                key.to_string(),
                format!("expected one fit without coordinates, found {}", records.len()),
            )),
        }
    }

    fn collect_grid(
        &self,
        key: &FitKey,
        param: &str,
        value_of: impl Fn(&FitRecord) -> Result<f64>,
    ) -> Result<Option<Grid>> {
        let records = self.records(key)?;
        if records.is_empty() {
            return Err(ModelError::data_shape(key.to_string(), "no fit records"));
        }
        let dim = records[0].coords.len();
        if records.iter().any(|r| r.coords.len() != dim) {
            return Err(ModelError::data_shape(
                key.to_string(),
                "records disagree on the number of coordinates",
            ));
        }

        let mut values = Vec::with_capacity(records.len());
        let mut errors = Vec::with_capacity(records.len());
        for r in records {
            values.push(value_of(r)?);
            errors.push(r.errors.get(param).copied().unwrap_or(0.0));
        }

        let axes = match dim {
            0 => return Ok(None),
            1 => GridAxes::One(records.iter().map(|r| r.coords[0]).collect()),
            2 => GridAxes::Two(
                records.iter().map(|r| r.coords[0]).collect(),
                records.iter().map(|r| r.coords[1]).collect(),
            ),
            d => {
                return Err(ModelError::data_shape(
                    key.to_string(),
                    format!("{d} coordinates per record (at most 2 supported)"),
                ));
            }
        };
        Ok(Some(Grid {
            axes,
            values,
            errors,
        }))
    }
}

fn align_to(reference: &Grid, grid: Option<Grid>, key: &FitKey) -> Result<Vec<f64>> {
    match grid {
        Some(grid) => reference.align(&grid, &key.to_string()),
        None => Err(ModelError::data_shape(
            key.to_string(),
            "shifted fit has no mass coordinates but the central fit does",
        )),
    }
}

/// Per-region yield attribution of a mixture's leaf components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentIntegrals {
    pub integrals: BTreeMap<String, f64>,
    /// Naive relative uncertainty (sum in quadrature of fraction relative errors).
    pub rel_uncertainty: BTreeMap<String, f64>,
}

impl ComponentIntegrals {
    pub fn total(&self) -> f64 {
        self.integrals.values().sum()
    }
}

/// How a shape parameter is made continuous over the mass grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "method")]
pub enum ParamFit {
    /// Interpolate the grid exactly.
    #[default]
    Interpolate,
    /// Weighted least-squares polynomial of the given order.
    Polynomial { order: usize },
}

/// A shape whose parameters are morphed across the mass grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeConfig {
    pub name: String,
    pub kind: ShapeKind,
    /// Index into `ModelConfig::observables`.
    #[serde(default)]
    pub observable: usize,
    #[serde(default)]
    pub fit: ParamFit,
}

/// A product of shapes over different observables (e.g. `x` times `y`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductConfig {
    pub name: String,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(default)]
    pub weight: Option<WeightSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureConfig {
    pub name: String,
    pub mode: MixtureMode,
    pub components: Vec<ComponentConfig>,
}

/// Express `{param}_{shape}` of this region as scale times the source region's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub shape: String,
    pub param: String,
    pub source_region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    #[serde(default)]
    pub shifts: Vec<String>,
    #[serde(default)]
    pub shapes: Vec<ShapeConfig>,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub mixtures: Vec<MixtureConfig>,
}

/// The full model description read by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub axes: Vec<Axis>,
    pub observables: Vec<Observable>,
    pub regions: Vec<RegionConfig>,
}

/// Numeric policies of a model build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Shifts whose relative deviation stays below this everywhere are dropped.
    pub shift_tolerance: f64,
    pub degenerate_policy: DegeneratePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shift_tolerance: 1e-6,
            degenerate_policy: DegeneratePolicy::Fail,
        }
    }
}

impl Settings {
    /// Defaults overridden by `MORPH_SHIFT_TOLERANCE` and `MORPH_DEGENERATE_POLICY`
    /// (a `.env` file is read first when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(raw) = lookup("MORPH_SHIFT_TOLERANCE") {
            let tol: f64 = raw.trim().parse().map_err(|_| {
                ModelError::invalid_range("MORPH_SHIFT_TOLERANCE", format!("not a number: '{raw}'"))
            })?;
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(ModelError::invalid_range(
                    "MORPH_SHIFT_TOLERANCE",
                    format!("must be a finite non-negative number, got {tol}"),
                ));
            }
            settings.shift_tolerance = tol;
        }
        if let Some(raw) = lookup("MORPH_DEGENERATE_POLICY") {
            settings.degenerate_policy = DegeneratePolicy::from_str(raw.trim(), true)
                .map_err(|e| ModelError::invalid_range("MORPH_DEGENERATE_POLICY", e))?;
        }
        Ok(settings)
    }
}
