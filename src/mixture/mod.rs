//! Constrained mixtures of shapes.
//!
//! Three compositions are supported, each with its own constructor:
//!
//! - [`RecursiveMixture`]: `f1*c1 + (1-f1)*(f2*c2 + (1-f2)*(... cn))`. A convex
//!   combination for fractions in `[0, 1]`, so non-negative components give a
//!   non-negative mixture for any number of components.
//! - [`PairMixture`]: `f*c1 + (1-f)*c2`, exactly two components.
//! - [`ExtendedSum`]: `Σ y_i*c_i` with absolute yields.
//!
//! A flat sum of more than two fractions is not expressible.
//!
//! Component weights come from a [`MixtureSpec`]: a literal `[start, lo, hi]`
//! registers a new parameter `{component}_frac`; a name refers to a
//! registered parameter or function.
//!
//! Recursive and pair fractions must stay in `[0, 1]`. A referenced parameter
//! needs bounds inside the unit interval; a referenced function must be a
//! constant in it or a [`Node::Bounded`] weight clamped inside it. Extended
//! yields are not restricted.

use tracing::debug;

use crate::domain::{MixtureConfig, MixtureMode, WeightSpec};
use crate::error::{ModelError, Result};
use crate::workspace::{Arg, FuncHandle, Node, ParamHandle, Workspace};

/// Ordered components and their weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixtureSpec {
    components: Vec<(String, Option<WeightSpec>)>,
}

impl MixtureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a weighted component.
    pub fn with(mut self, component: impl Into<String>, weight: WeightSpec) -> Self {
        self.components.push((component.into(), Some(weight)));
        self
    }

    /// Append the component absorbing the remainder.
    pub fn rest(mut self, component: impl Into<String>) -> Self {
        self.components.push((component.into(), None));
        self
    }

    pub fn push(&mut self, component: impl Into<String>, weight: Option<WeightSpec>) {
        self.components.push((component.into(), weight));
    }

    pub fn components(&self) -> &[(String, Option<WeightSpec>)] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Rename every component through `resolve` (e.g. `sig` to `sig_PP`).
    pub fn from_config(config: &MixtureConfig, resolve: impl Fn(&str) -> String) -> Self {
        Self {
            components: config
                .components
                .iter()
                .map(|c| (resolve(&c.name), c.weight.clone()))
                .collect(),
        }
    }
}

/// A registered mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    pub handle: FuncHandle,
    /// Weight parameters created from literal ranges.
    pub created: Vec<ParamHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecursiveMixture {
    spec: MixtureSpec,
}

impl RecursiveMixture {
    /// At least two components; every one but the last has a weight, the last has none.
    pub fn new(name: &str, spec: MixtureSpec) -> Result<Self> {
        let Some(((_, last), head)) = spec.components.split_last() else {
            return Err(ModelError::data_shape(name, "mixture has no components"));
        };
        if head.is_empty() {
            return Err(ModelError::data_shape(name, "a mixture needs at least two components"));
        }
        if let Some((c, _)) = head.iter().find(|(_, w)| w.is_none()) {
            return Err(ModelError::data_shape(
                name,
                format!("component '{c}' has no fraction"),
            ));
        }
        if last.is_some() {
            return Err(ModelError::data_shape(
                name,
                "the last component absorbs the remainder and takes no fraction",
            ));
        }
        for (c, w) in head {
            if let Some(WeightSpec::Range(r)) = w {
                check_fraction_range(c, *r)?;
            }
        }
        Ok(Self { spec })
    }

    pub fn compose(&self, ws: &mut Workspace, name: &str) -> Result<Composed> {
        let (components, weights) = resolve(ws, &self.spec, true)?;
        let mut created = Vec::new();
        let fractions = weights
            .into_iter()
            .flatten()
            .map(|w| register_weight(ws, w, &mut created))
            .collect::<Result<Vec<_>>>()?;
        let handle = ws.add_function(
            name,
            Node::RecursiveSum {
                components,
                fractions,
            },
        )?;
        debug!(mixture = name, n = self.spec.len(), "composed recursive mixture");
        Ok(Composed { handle, created })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairMixture {
    first: String,
    second: String,
    weight: WeightSpec,
}

impl PairMixture {
    pub fn new(
        first: impl Into<String>,
        weight: WeightSpec,
        second: impl Into<String>,
    ) -> Result<Self> {
        let first = first.into();
        if let WeightSpec::Range(r) = weight {
            check_fraction_range(&first, r)?;
        }
        Ok(Self {
            first,
            second: second.into(),
            weight,
        })
    }

    /// Accepts exactly `[(c1, Some(w)), (c2, None)]`.
    pub fn from_spec(name: &str, spec: MixtureSpec) -> Result<Self> {
        match <[_; 2]>::try_from(spec.components) {
            Ok([(first, Some(weight)), (second, None)]) => Self::new(first, weight, second),
            Ok(_) => Err(ModelError::data_shape(
                name,
                "a pair mixture weights its first component only",
            )),
            Err(v) => Err(ModelError::data_shape(
                name,
                format!("a pair mixture takes exactly two components, got {}", v.len()),
            )),
        }
    }

    pub fn compose(&self, ws: &mut Workspace, name: &str) -> Result<Composed> {
        let first = ws.func(&self.first)?;
        let second = ws.func(&self.second)?;
        let weight = pending_weight(ws, &self.first, &self.weight, true)?;
        let mut created = Vec::new();
        let fraction = register_weight(ws, weight, &mut created)?;
        let handle = ws.add_function(
            name,
            Node::PairSum {
                first,
                second,
                fraction,
            },
        )?;
        debug!(mixture = name, "composed pair mixture");
        Ok(Composed { handle, created })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedSum {
    spec: MixtureSpec,
}

impl ExtendedSum {
    /// Every component carries a yield.
    pub fn new(name: &str, spec: MixtureSpec) -> Result<Self> {
        if spec.is_empty() {
            return Err(ModelError::data_shape(name, "mixture has no components"));
        }
        if let Some((c, _)) = spec.components.iter().find(|(_, w)| w.is_none()) {
            return Err(ModelError::data_shape(name, format!("component '{c}' has no yield")));
        }
        Ok(Self { spec })
    }

    pub fn compose(&self, ws: &mut Workspace, name: &str) -> Result<Composed> {
        let (components, weights) = resolve(ws, &self.spec, false)?;
        let mut created = Vec::new();
        let yields = weights
            .into_iter()
            .flatten()
            .map(|w| register_weight(ws, w, &mut created))
            .collect::<Result<Vec<_>>>()?;
        let handle = ws.add_function(name, Node::ExtendedSum { components, yields })?;
        debug!(mixture = name, n = self.spec.len(), "composed extended sum");
        Ok(Composed { handle, created })
    }
}

/// Build and register a mixture of the given mode.
pub fn compose(
    ws: &mut Workspace,
    name: &str,
    mode: MixtureMode,
    spec: MixtureSpec,
) -> Result<Composed> {
    match mode {
        MixtureMode::Recursive => RecursiveMixture::new(name, spec)?.compose(ws, name),
        MixtureMode::Pair => PairMixture::from_spec(name, spec)?.compose(ws, name),
        MixtureMode::Extended => ExtendedSum::new(name, spec)?.compose(ws, name),
    }
}

/// A weight whose references are resolved but whose parameter may still need registering.
enum Pending {
    Existing(Arg),
    New { name: String, range: [f64; 3] },
}

/// Resolve every reference before anything is registered, so a missing
/// reference leaves the workspace untouched. `unit` restricts weights to `[0, 1]`.
fn resolve(
    ws: &Workspace,
    spec: &MixtureSpec,
    unit: bool,
) -> Result<(Vec<FuncHandle>, Vec<Option<Pending>>)> {
    let mut components = Vec::with_capacity(spec.len());
    let mut weights = Vec::with_capacity(spec.len());
    for (c, w) in &spec.components {
        components.push(ws.func(c)?);
        weights.push(match w {
            Some(w) => Some(pending_weight(ws, c, w, unit)?),
            None => None,
        });
    }
    Ok((components, weights))
}

fn pending_weight(ws: &Workspace, component: &str, weight: &WeightSpec, unit: bool) -> Result<Pending> {
    match weight {
        WeightSpec::Ref(r) => {
            let arg = ws.arg(r)?;
            if unit {
                check_unit_reference(ws, r, arg)?;
            }
            Ok(Pending::Existing(arg))
        }
        WeightSpec::Range(range) => {
            let name = format!("{component}_frac");
            if ws.contains(&name) {
                return Err(ModelError::DuplicateName(name));
            }
            Ok(Pending::New {
                name,
                range: *range,
            })
        }
    }
}

fn check_unit_reference(ws: &Workspace, name: &str, arg: Arg) -> Result<()> {
    let bounds = match arg {
        Arg::Param(h) => ws.parameter(h).map(|p| (p.lo, p.hi)),
        Arg::Func(h) => match ws.function(h).map(|f| &f.node) {
            Some(Node::Constant(v)) => Some((*v, *v)),
            Some(Node::Bounded { lo, hi, .. }) => Some((*lo, *hi)),
            _ => None,
        },
        Arg::Const(v) => Some((v, v)),
    };
    match bounds {
        Some((lo, hi)) if (0.0..=1.0).contains(&lo) && (0.0..=1.0).contains(&hi) => Ok(()),
        Some((lo, hi)) => Err(ModelError::invalid_range(
            name,
            format!("fraction bounds [{lo}, {hi}] leave [0, 1]"),
        )),
        None => Err(ModelError::invalid_range(
            name,
            "a fraction must be a bounded parameter or function within [0, 1]",
        )),
    }
}

fn register_weight(ws: &mut Workspace, weight: Pending, created: &mut Vec<ParamHandle>) -> Result<Arg> {
    match weight {
        Pending::Existing(arg) => Ok(arg),
        Pending::New {
            name,
            range: [start, lo, hi],
        } => {
            let h = ws.add_param(&name, start, lo, hi)?;
            created.push(h);
            Ok(Arg::Param(h))
        }
    }
}

fn check_fraction_range(component: &str, [start, lo, hi]: [f64; 3]) -> Result<()> {
    let unit = 0.0..=1.0;
    if !unit.contains(&lo) || !unit.contains(&hi) || lo > hi || !(lo..=hi).contains(&start) {
        return Err(ModelError::invalid_range(
            format!("{component}_frac"),
            format!("fraction [{start}, {lo}, {hi}] must satisfy 0 <= lo <= start <= hi <= 1"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::domain::Axis;

    fn ws_with(values: &[(&str, f64)]) -> Workspace {
        let mut ws = Workspace::new(vec![Axis::new("MA", 3.6, 21.0)], vec![]).unwrap();
        for (name, v) in values {
            ws.add_function(name, Node::Constant(*v)).unwrap();
        }
        ws
    }

    fn abc() -> MixtureSpec {
        MixtureSpec::new()
            .with("A", WeightSpec::range(0.5, 0.0, 1.0))
            .with("B", WeightSpec::range(0.4, 0.0, 1.0))
            .rest("C")
    }

    #[test]
    fn recursive_mixture_of_constants() {
        let mut ws = ws_with(&[("A", 2.0), ("B", 3.0), ("C", 5.0)]);
        let mix = compose(&mut ws, "bg", MixtureMode::Recursive, abc()).unwrap();
        assert_eq!(mix.created.len(), 2);
        assert!(ws.param("A_frac").is_ok());
        assert!(ws.param("B_frac").is_ok());
        assert!(ws.param("C_frac").is_err());
        assert_relative_eq!(ws.eval(mix.handle, &ws.context(&[5.0])), 3.1, epsilon = 1e-12);
    }

    #[test]
    fn references_do_not_register_parameters() {
        let mut ws = ws_with(&[("A", 2.0), ("B", 3.0)]);
        ws.add_param("shared", 0.25, 0.0, 1.0).unwrap();
        let spec = MixtureSpec::new().with("A", WeightSpec::reference("shared")).rest("B");
        let mix = compose(&mut ws, "pair", MixtureMode::Pair, spec).unwrap();
        assert!(mix.created.is_empty());
        assert_eq!(ws.n_params(), 1);
        assert_relative_eq!(ws.eval(mix.handle, &ws.context(&[5.0])), 2.75, epsilon = 1e-12);
    }

    #[test]
    fn fraction_references_must_stay_in_the_unit_interval() {
        let mut ws = ws_with(&[("A", 1.0), ("B", 5.0), ("n", 10.0)]);
        ws.add_param("f", 1.5, 0.0, 2.0).unwrap();
        let wide = || MixtureSpec::new().with("A", WeightSpec::reference("f")).rest("B");
        for mode in [MixtureMode::Recursive, MixtureMode::Pair] {
            assert!(matches!(
                compose(&mut ws, "mix", mode, wide()),
                Err(ModelError::InvalidRange { .. })
            ));
        }
        let yield_ref = MixtureSpec::new().with("A", WeightSpec::reference("n")).rest("B");
        assert!(matches!(
            compose(&mut ws, "mix", MixtureMode::Pair, yield_ref),
            Err(ModelError::InvalidRange { .. })
        ));
        assert!(!ws.contains("mix"));
        assert_eq!(ws.n_functions(), 3);
    }

    #[test]
    fn bounded_function_is_a_valid_fraction() {
        let mut ws = ws_with(&[("A", 1.0), ("B", 5.0), ("raw", 1.4)]);
        let raw = ws.func("raw").unwrap();
        ws.add_function(
            "A_frac",
            Node::Bounded {
                value: raw,
                error: None,
                lo: 0.0,
                hi: 1.0,
            },
        )
        .unwrap();
        let spec = MixtureSpec::new().with("A", WeightSpec::reference("A_frac")).rest("B");
        let mix = compose(&mut ws, "mix", MixtureMode::Recursive, spec).unwrap();
        assert_relative_eq!(ws.eval(mix.handle, &ws.context(&[5.0])), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_reference_aborts_without_registering() {
        let mut ws = ws_with(&[("A", 2.0), ("C", 5.0)]);
        let err = compose(&mut ws, "bg", MixtureMode::Recursive, abc());
        assert!(matches!(err, Err(ModelError::MissingReference(_))));
        assert_eq!(ws.n_params(), 0);
        assert!(!ws.contains("bg"));

        let spec = MixtureSpec::new().with("A", WeightSpec::reference("nope")).rest("C");
        assert!(matches!(
            compose(&mut ws, "bg", MixtureMode::Recursive, spec),
            Err(ModelError::MissingReference(_))
        ));
    }

    #[test]
    fn pair_mixture_takes_two_components() {
        assert!(PairMixture::from_spec("p", abc()).is_err());
        let spec = MixtureSpec::new()
            .with("A", WeightSpec::range(0.5, 0.0, 1.0))
            .with("B", WeightSpec::range(0.5, 0.0, 1.0));
        assert!(PairMixture::from_spec("p", spec).is_err());
    }

    #[test]
    fn recursive_mixture_checks_weights() {
        let no_rest = MixtureSpec::new()
            .with("A", WeightSpec::range(0.5, 0.0, 1.0))
            .with("B", WeightSpec::range(0.5, 0.0, 1.0));
        assert!(RecursiveMixture::new("m", no_rest).is_err());
        let single = MixtureSpec::new().rest("A");
        assert!(RecursiveMixture::new("m", single).is_err());
        let bad_range = MixtureSpec::new()
            .with("A", WeightSpec::range(0.5, -0.1, 1.0))
            .rest("B");
        assert!(matches!(
            RecursiveMixture::new("m", bad_range),
            Err(ModelError::InvalidRange { .. })
        ));
    }

    #[test]
    fn extended_sum_uses_yields() {
        let mut ws = ws_with(&[("A", 2.0), ("B", 3.0)]);
        ws.add_function("n_B", Node::Constant(10.0)).unwrap();
        let spec = MixtureSpec::new()
            .with("A", WeightSpec::range(100.0, 0.0, 1000.0))
            .with("B", WeightSpec::reference("n_B"));
        let sum = compose(&mut ws, "ext", MixtureMode::Extended, spec).unwrap();
        assert_relative_eq!(ws.eval(sum.handle, &ws.context(&[5.0])), 230.0, epsilon = 1e-12);

        let unweighted = MixtureSpec::new()
            .with("A", WeightSpec::range(1.0, 0.0, 2.0))
            .rest("B");
        assert!(ExtendedSum::new("e", unweighted).is_err());
    }

    #[test]
    fn nested_mixtures_compose() {
        let mut ws = ws_with(&[("A", 2.0), ("B", 3.0), ("C", 5.0)]);
        compose(
            &mut ws,
            "inner",
            MixtureMode::Pair,
            MixtureSpec::new().with("B", WeightSpec::range(0.4, 0.0, 1.0)).rest("C"),
        )
        .unwrap();
        let outer = compose(
            &mut ws,
            "outer",
            MixtureMode::Pair,
            MixtureSpec::new().with("A", WeightSpec::range(0.5, 0.0, 1.0)).rest("inner"),
        )
        .unwrap();
        assert_relative_eq!(ws.eval(outer.handle, &ws.context(&[5.0])), 3.1, epsilon = 1e-12);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn prop_recursive_mixture_is_non_negative(
            values in prop::collection::vec(0.0f64..100.0, 2..7),
            fractions in prop::collection::vec(0.0f64..=1.0, 6),
            m in 3.6f64..21.0,
        ) {
            let names: Vec<String> = (0..values.len()).map(|i| format!("c{i}")).collect();
            let mut ws = Workspace::new(vec![Axis::new("MA", 3.6, 21.0)], vec![]).unwrap();
            let mut spec = MixtureSpec::new();
            for (i, (name, v)) in names.iter().zip(&values).enumerate() {
                ws.add_function(name, Node::Constant(*v)).unwrap();
                if i + 1 < values.len() {
                    spec = spec.with(name.as_str(), WeightSpec::range(fractions[i], 0.0, 1.0));
                } else {
                    spec = spec.rest(name.as_str());
                }
            }
            let mix = compose(&mut ws, "mix", MixtureMode::Recursive, spec).unwrap();
            let v = ws.eval(mix.handle, &ws.context(&[m]));
            prop_assert!(v >= 0.0);
            let max = values.iter().copied().fold(0.0, f64::max);
            prop_assert!(v <= max * (1.0 + 1e-12));
        }
    }
}
