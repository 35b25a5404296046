//! The workspace registry.
//!
//! Parameters and functions are registered once under a unique name and are
//! addressed afterwards through typed handles. String lookups exist for the
//! config-driven paths and fail with `MissingReference`.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::{Axis, Observable};
use crate::error::{ModelError, Result};
use crate::models::density;
use crate::workspace::{Arg, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Param(ParamHandle),
    Func(FuncHandle),
}

/// A free (fit) parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub lo: f64,
    pub hi: f64,
    /// Symmetric fit error, once known.
    pub error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedFunction {
    pub name: String,
    pub node: Node,
}

/// Values at which functions are evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalContext {
    pub coords: Vec<f64>,
    pub observables: Vec<f64>,
    pub params: Vec<f64>,
}

impl EvalContext {
    pub fn set(&mut self, param: ParamHandle, value: f64) -> &mut Self {
        if let Some(slot) = self.params.get_mut(param.0) {
            *slot = value;
        }
        self
    }

    pub fn get(&self, param: ParamHandle) -> f64 {
        self.params.get(param.0).copied().unwrap_or(f64::NAN)
    }

    pub fn set_observable(&mut self, index: usize, value: f64) -> &mut Self {
        if let Some(slot) = self.observables.get_mut(index) {
            *slot = value;
        }
        self
    }

    pub fn set_coords(&mut self, coords: &[f64]) -> &mut Self {
        for (slot, &c) in self.coords.iter_mut().zip(coords) {
            *slot = c;
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    axes: Vec<Axis>,
    observables: Vec<Observable>,
    params: Vec<Parameter>,
    funcs: Vec<NamedFunction>,
    symbols: HashMap<String, Symbol>,
}

impl Workspace {
    pub fn new(axes: Vec<Axis>, observables: Vec<Observable>) -> Result<Self> {
        if axes.is_empty() || axes.len() > 2 {
            return Err(ModelError::invalid_range(
                "axes",
                format!("expected 1 or 2 morphing coordinates, got {}", axes.len()),
            ));
        }
        for obs in &observables {
            if !(obs.min.is_finite() && obs.max.is_finite() && obs.max > obs.min) {
                return Err(ModelError::invalid_range(
                    &obs.name,
                    format!("observable range [{}, {}] is empty", obs.min, obs.max),
                ));
            }
        }
        Ok(Self {
            axes,
            observables,
            ..Self::default()
        })
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn n_functions(&self) -> usize {
        self.funcs.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Register a free parameter with start value `init` in `[lo, hi]`.
    pub fn add_param(&mut self, name: &str, init: f64, lo: f64, hi: f64) -> Result<ParamHandle> {
        if !(lo.is_finite() && hi.is_finite() && lo <= hi && init >= lo && init <= hi) {
            return Err(ModelError::invalid_range(
                name,
                format!("start {init} outside [{lo}, {hi}]"),
            ));
        }
        if self.symbols.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }
        let handle = ParamHandle(self.params.len());
        self.params.push(Parameter {
            name: name.to_string(),
            value: init,
            lo,
            hi,
            error: None,
        });
        self.symbols.insert(name.to_string(), Symbol::Param(handle));
        debug!(param = name, init, lo, hi, "registered parameter");
        Ok(handle)
    }

    /// Return the parameter called `name`, registering it if needed.
    pub fn ensure_param(&mut self, name: &str, init: f64, lo: f64, hi: f64) -> Result<ParamHandle> {
        match self.symbols.get(name) {
            Some(Symbol::Param(h)) => Ok(*h),
            Some(Symbol::Func(_)) => Err(ModelError::DuplicateName(name.to_string())),
            None => self.add_param(name, init, lo, hi),
        }
    }

    /// Register an immutable function.
    pub fn add_function(&mut self, name: &str, node: Node) -> Result<FuncHandle> {
        if self.symbols.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }
        self.check_refs(name, &node)?;
        let handle = FuncHandle(self.funcs.len());
        debug!(function = name, kind = node.label(), "registered function");
        self.funcs.push(NamedFunction {
            name: name.to_string(),
            node,
        });
        self.symbols.insert(name.to_string(), Symbol::Func(handle));
        Ok(handle)
    }

    pub fn symbol(&self, name: &str) -> Result<Symbol> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::MissingReference(name.to_string()))
    }

    pub fn func(&self, name: &str) -> Result<FuncHandle> {
        match self.symbol(name)? {
            Symbol::Func(h) => Ok(h),
            Symbol::Param(_) => Err(ModelError::MissingReference(format!("function {name}"))),
        }
    }

    pub fn param(&self, name: &str) -> Result<ParamHandle> {
        match self.symbol(name)? {
            Symbol::Param(h) => Ok(h),
            Symbol::Func(_) => Err(ModelError::MissingReference(format!("parameter {name}"))),
        }
    }

    /// Resolve `name` to either kind of argument.
    pub fn arg(&self, name: &str) -> Result<Arg> {
        Ok(match self.symbol(name)? {
            Symbol::Param(h) => Arg::Param(h),
            Symbol::Func(h) => Arg::Func(h),
        })
    }

    pub fn parameter(&self, h: ParamHandle) -> Option<&Parameter> {
        self.params.get(h.0)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn function(&self, h: FuncHandle) -> Option<&NamedFunction> {
        self.funcs.get(h.0)
    }

    pub fn functions(&self) -> &[NamedFunction] {
        &self.funcs
    }

    pub fn name_of(&self, h: FuncHandle) -> &str {
        self.funcs.get(h.0).map(|f| f.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn param_name(&self, h: ParamHandle) -> &str {
        self.params.get(h.0).map(|p| p.name.as_str()).unwrap_or("<unknown>")
    }

    /// Update a parameter's current value (e.g. after an external fit).
    pub fn set_value(&mut self, h: ParamHandle, value: f64) -> Result<()> {
        let p = self
            .params
            .get_mut(h.0)
            .ok_or_else(|| ModelError::MissingReference(format!("parameter #{}", h.0)))?;
        if !(value >= p.lo && value <= p.hi) {
            return Err(ModelError::invalid_range(
                &p.name,
                format!("value {value} outside [{}, {}]", p.lo, p.hi),
            ));
        }
        p.value = value;
        Ok(())
    }

    pub fn set_error(&mut self, h: ParamHandle, error: f64) -> Result<()> {
        let p = self
            .params
            .get_mut(h.0)
            .ok_or_else(|| ModelError::MissingReference(format!("parameter #{}", h.0)))?;
        p.error = Some(error.abs());
        Ok(())
    }

    /// A context at `coords` with every parameter at its current value.
    ///
    /// Observables start at the lower edge of their range.
    pub fn context(&self, coords: &[f64]) -> EvalContext {
        let mut c = vec![0.0; self.axes.len()];
        for (slot, &v) in c.iter_mut().zip(coords) {
            *slot = v;
        }
        EvalContext {
            coords: c,
            observables: self.observables.iter().map(|o| o.min).collect(),
            params: self.params.iter().map(|p| p.value).collect(),
        }
    }

    /// Evaluate an argument.
    pub fn eval_arg(&self, arg: Arg, ctx: &EvalContext) -> f64 {
        match arg {
            Arg::Param(h) => ctx.get(h),
            Arg::Func(h) => self.eval(h, ctx),
            Arg::Const(v) => v,
        }
    }

    /// Evaluate a registered function.
    pub fn eval(&self, f: FuncHandle, ctx: &EvalContext) -> f64 {
        let Some(func) = self.funcs.get(f.0) else {
            return f64::NAN;
        };
        let coord = |i: usize| ctx.coords.get(i).copied().unwrap_or(f64::NAN);

        match &func.node {
            Node::Constant(v) => *v,
            Node::Spline { axis, spline } => spline.eval(coord(*axis)),
            Node::Surface { surface } => surface.eval(coord(0), coord(1)),
            Node::Poly { poly } => poly.eval(coord(0), coord(1)),
            Node::Morph { central, shifts } => {
                let c = self.eval(*central, ctx);
                let mut value = c;
                for s in shifts {
                    let nu = ctx.get(s.nuisance);
                    if nu > 0.0 {
                        value += nu * (self.eval(s.up, ctx) - c);
                    } else if nu < 0.0 {
                        value += nu * (c - self.eval(s.down, ctx));
                    }
                }
                value
            }
            Node::Shape {
                kind,
                observable,
                params,
            } => {
                let Some(obs) = self.observables.get(*observable) else {
                    return f64::NAN;
                };
                let x = ctx.observables.get(*observable).copied().unwrap_or(f64::NAN);
                let values: Vec<f64> = params.iter().map(|a| self.eval_arg(*a, ctx)).collect();
                density(*kind, x, &values, obs)
            }
            Node::Product(factors) => factors.iter().map(|h| self.eval(*h, ctx)).product(),
            Node::RecursiveSum {
                components,
                fractions,
            } => {
                // Fold from the innermost (last) component outwards.
                let Some((last, head)) = components.split_last() else {
                    return 0.0;
                };
                let mut acc = self.eval(*last, ctx);
                for (c, f) in head.iter().zip(fractions).rev() {
                    let f = self.eval_arg(*f, ctx);
                    acc = f * self.eval(*c, ctx) + (1.0 - f) * acc;
                }
                acc
            }
            Node::PairSum {
                first,
                second,
                fraction,
            } => {
                let f = self.eval_arg(*fraction, ctx);
                f * self.eval(*first, ctx) + (1.0 - f) * self.eval(*second, ctx)
            }
            Node::ExtendedSum { components, yields } => components
                .iter()
                .zip(yields)
                .map(|(c, y)| self.eval_arg(*y, ctx) * self.eval(*c, ctx))
                .sum(),
            Node::Scaled { scale, source } => self.eval_arg(*scale, ctx) * self.eval(*source, ctx),
            Node::Bounded { value, lo, hi, .. } => {
                let v = self.eval(*value, ctx);
                if v.is_nan() { v } else { v.max(*lo).min(*hi) }
            }
        }
    }

    fn check_refs(&self, name: &str, node: &Node) -> Result<()> {
        let func_ok = |h: &FuncHandle| h.0 < self.funcs.len();
        let arg_ok = |a: &Arg| match a {
            Arg::Param(h) => h.0 < self.params.len(),
            Arg::Func(h) => func_ok(h),
            Arg::Const(v) => v.is_finite(),
        };
        let ok = match node {
            Node::Constant(_) | Node::Spline { .. } | Node::Surface { .. } | Node::Poly { .. } => true,
            Node::Morph { central, shifts } => {
                func_ok(central)
                    && shifts.iter().all(|s| {
                        s.nuisance.0 < self.params.len() && func_ok(&s.up) && func_ok(&s.down)
                    })
            }
            Node::Shape { params, .. } => params.iter().all(arg_ok),
            Node::Product(factors) => factors.iter().all(func_ok),
            Node::RecursiveSum {
                components,
                fractions,
            } => components.iter().all(func_ok) && fractions.iter().all(arg_ok),
            Node::PairSum {
                first,
                second,
                fraction,
            } => func_ok(first) && func_ok(second) && arg_ok(fraction),
            Node::ExtendedSum { components, yields } => {
                components.iter().all(func_ok) && yields.iter().all(arg_ok)
            }
            Node::Scaled { scale, source } => arg_ok(scale) && func_ok(source),
            Node::Bounded {
                value,
                error,
                lo,
                hi,
            } => {
                if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                    return Err(ModelError::invalid_range(name, format!("bounds [{lo}, {hi}]")));
                }
                func_ok(value) && error.iter().all(func_ok)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ModelError::MissingReference(format!(
                "'{name}' refers to an unregistered handle"
            )))
        }
    }
}
